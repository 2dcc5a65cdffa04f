//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use crate::record::normalize_path;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_protocol() -> String {
    "https".to_string()
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_burst_threshold() -> usize {
    2
}

/// Configuration for sync operations.
///
/// Usually loaded from a JSON file with camelCase keys:
///
/// ```json
/// {
///   "roots": { "/home/dev/instance": { "host": "dev.example.com" } },
///   "folders": {
///     "script_includes": {
///       "table": "sys_script_include",
///       "key": "name",
///       "fields": { "js": "script" }
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Local root directories, each mapped to one remote instance.
    pub roots: BTreeMap<PathBuf, RootConfig>,
    /// First-level folder name to remote table mapping.
    #[serde(default)]
    pub folders: BTreeMap<String, FolderMapping>,
    /// Extra glob patterns the watcher ignores. Hidden paths are always ignored.
    #[serde(default)]
    pub ignore_files: Vec<String>,
    /// Refuse to write a local file from an empty remote field.
    #[serde(default)]
    pub reject_empty_writes: bool,
    /// Delay before the watch restarts after the transfer queue drains.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Above this many in-flight transfers, per-file notifications are
    /// replaced by a single summary.
    #[serde(default = "default_burst_threshold")]
    pub notify_burst_threshold: usize,
    /// Download every `preLoadList` entry at start-up.
    #[serde(default)]
    pub pre_load: bool,
    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

impl SyncConfig {
    /// Creates an empty configuration with default tuning.
    pub fn new() -> Self {
        Self {
            roots: BTreeMap::new(),
            folders: BTreeMap::new(),
            ignore_files: Vec::new(),
            reject_empty_writes: false,
            settle_delay_ms: default_settle_delay_ms(),
            notify_burst_threshold: default_burst_threshold(),
            pre_load: false,
            debug: false,
        }
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let data = std::fs::read(path).map_err(|e| SyncError::io(path, e))?;
        let config: SyncConfig = serde_json::from_slice(&data)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Adds a root directory.
    pub fn with_root(mut self, path: impl AsRef<Path>, root: RootConfig) -> Self {
        self.roots.insert(normalize_path(path.as_ref()), root);
        self
    }

    /// Adds a folder mapping.
    pub fn with_folder(mut self, name: impl Into<String>, mapping: FolderMapping) -> Self {
        self.folders.insert(name.into(), mapping);
        self
    }

    /// Adds a watch ignore pattern.
    pub fn with_ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_files.push(pattern.into());
        self
    }

    /// Sets whether empty remote fields are refused.
    pub fn with_reject_empty_writes(mut self, reject: bool) -> Self {
        self.reject_empty_writes = reject;
        self
    }

    /// Sets the watch settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the notification burst threshold.
    pub fn with_notify_burst_threshold(mut self, threshold: usize) -> Self {
        self.notify_burst_threshold = threshold;
        self
    }

    /// Returns the watch settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Returns the configuration for a root.
    pub fn root(&self, root: &Path) -> Option<&RootConfig> {
        self.roots.get(root)
    }

    /// Returns the first configured root, used for root-relative CLI paths.
    pub fn first_root(&self) -> Option<&Path> {
        self.roots.keys().next().map(PathBuf::as_path)
    }

    /// Returns the mapping for a first-level folder.
    pub fn folder(&self, name: &str) -> Option<&FolderMapping> {
        self.folders.get(name)
    }

    /// Checks that the configuration can drive a sync.
    pub fn validate(&self) -> SyncResult<()> {
        if self.roots.is_empty() {
            return Err(SyncError::Config("at least one root is required".into()));
        }
        for (path, root) in &self.roots {
            if root.host.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "root {} has no host",
                    path.display()
                )));
            }
        }
        for (name, folder) in &self.folders {
            if folder.table.is_empty() || folder.key.is_empty() {
                return Err(SyncError::Config(format!(
                    "folder {name} needs both a table and a key"
                )));
            }
            if folder.fields.is_empty() {
                return Err(SyncError::Config(format!(
                    "folder {name} maps no file suffixes"
                )));
            }
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.roots = std::mem::take(&mut self.roots)
            .into_iter()
            .map(|(path, root)| (normalize_path(&path), root))
            .collect();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection settings for one root.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    /// Remote host name.
    pub host: String,
    /// URL scheme.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// User name for basic authentication.
    #[serde(default)]
    pub user: Option<String>,
    /// Password for basic authentication.
    #[serde(default)]
    pub pass: Option<String>,
    /// Optional HTTP proxy.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Files to download at start-up, by folder.
    #[serde(default, alias = "preloadList")]
    pub pre_load_list: BTreeMap<String, Vec<String>>,
}

impl RootConfig {
    /// Creates root settings for a host, using https.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            protocol: default_protocol(),
            user: None,
            pass: None,
            proxy: None,
            pre_load_list: BTreeMap::new(),
        }
    }

    /// Sets the URL scheme.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Sets basic authentication credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    /// Adds a file to download at start-up.
    pub fn with_pre_load(mut self, folder: impl Into<String>, file: impl Into<String>) -> Self {
        self.pre_load_list
            .entry(folder.into())
            .or_default()
            .push(file.into());
        self
    }

    /// Base URL of the instance, e.g. `https://dev.example.com`.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host)
    }

    /// Browser link to a remote record.
    ///
    /// Spaces are percent-encoded so the link stays a single token.
    pub fn record_url(&self, table: &str, record_id: &str) -> String {
        format!("{}/{}.do?sys_id={}", self.base_url(), table, record_id).replace(' ', "%20")
    }
}

/// HTTP proxy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

/// Maps a first-level folder to a remote table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderMapping {
    /// Remote table name.
    pub table: String,
    /// Natural key field used for lookups by file name.
    pub key: String,
    /// File suffix to remote field. Suffixes may include a leading dot.
    pub fields: BTreeMap<String, String>,
    // `subDirPattern` only drives bulk downloads; serde skips it.
}

/// Field and natural key derived from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    /// Remote field.
    pub field: String,
    /// File name with the suffix stripped.
    pub key_value: String,
}

impl FolderMapping {
    /// Creates a mapping with no suffixes.
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Maps a file suffix to a field.
    pub fn with_field(mut self, suffix: impl Into<String>, field: impl Into<String>) -> Self {
        self.fields.insert(suffix.into(), field.into());
        self
    }

    /// Resolves a file name to a field, trying the longest suffix first so
    /// that `.condition.js` wins over `.js`.
    ///
    /// Sass sources share a table with the CSS they compile to; their
    /// records are keyed with a `_scss` suffix.
    pub fn match_file(&self, file_name: &str) -> Option<FieldMatch> {
        let mut suffixes: Vec<(&str, &String)> = self
            .fields
            .iter()
            .map(|(suffix, field)| (suffix.trim_start_matches('.'), field))
            .filter(|(suffix, _)| !suffix.is_empty())
            .collect();
        suffixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

        suffixes.into_iter().find_map(|(suffix, field)| {
            let stem = file_name.strip_suffix(suffix)?.strip_suffix('.')?;
            if stem.is_empty() {
                return None;
            }
            let mut key_value = stem.to_string();
            if is_scss(file_name) {
                key_value.push_str("_scss");
            }
            Some(FieldMatch {
                field: field.clone(),
                key_value,
            })
        })
    }
}

fn is_scss(file_name: &str) -> bool {
    file_name.find(".scss").is_some_and(|i| i > 0) || file_name.contains("_scss")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn script_mapping() -> FolderMapping {
        FolderMapping::new("sys_script", "name")
            .with_field(".js", "script")
            .with_field(".condition.js", "condition")
    }

    #[test]
    fn longest_suffix_wins() {
        let m = script_mapping();
        assert_eq!(
            m.match_file("script.condition.js"),
            Some(FieldMatch {
                field: "condition".into(),
                key_value: "script".into()
            })
        );
        assert_eq!(
            m.match_file("script.js"),
            Some(FieldMatch {
                field: "script".into(),
                key_value: "script".into()
            })
        );
    }

    #[test]
    fn suffix_without_dot_is_accepted() {
        let m = FolderMapping::new("sys_ui_page", "name").with_field("xhtml", "html");
        assert_eq!(m.match_file("attachment.xhtml").unwrap().key_value, "attachment");
        assert_eq!(m.match_file("attachmentxhtml"), None);
        assert_eq!(m.match_file(".xhtml"), None);
        assert_eq!(m.match_file("attachment.txt"), None);
    }

    #[test]
    fn dotted_key_values_survive() {
        let m = script_mapping();
        let found = m.match_file("my.util.v2.js").unwrap();
        assert_eq!(found.key_value, "my.util.v2");
        assert_eq!(found.field, "script");
    }

    #[test]
    fn sass_sources_get_their_own_key() {
        let m = FolderMapping::new("sp_css", "name")
            .with_field("scss", "css")
            .with_field("css", "css");
        assert_eq!(m.match_file("theme.scss").unwrap().key_value, "theme_scss");
        assert_eq!(m.match_file("theme.css").unwrap().key_value, "theme");
    }

    #[test]
    fn oversized_settle_delay_saturates() {
        let config = SyncConfig::new().with_settle_delay(Duration::MAX);
        assert_eq!(config.settle_delay_ms, u64::MAX);
        let config = SyncConfig::new().with_settle_delay(Duration::from_millis(750));
        assert_eq!(config.settle_delay(), Duration::from_millis(750));
    }

    #[test]
    fn bulk_download_keys_are_ignored() {
        let json = r#"{ "table": "sys_script", "key": "name", "fields": { "js": "script" },
                        "subDirPattern": "<collection>" }"#;
        let mapping: FolderMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.match_file("Util.js").unwrap().field, "script");
    }

    #[test]
    fn record_url_escapes_spaces() {
        let root = RootConfig::new("dev.example.com");
        assert_eq!(
            root.record_url("sys_script", "abc 123"),
            "https://dev.example.com/sys_script.do?sys_id=abc%20123"
        );
        let root = RootConfig::new("localhost:8080").with_protocol("http");
        assert_eq!(root.base_url(), "http://localhost:8080");
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{
            "roots": { "/work/dev\\": { "host": "dev.example.com", "user": "admin", "pass": "pw",
                       "preLoadList": { "script_includes": ["Util.js"] } } },
            "folders": { "script_includes": { "table": "sys_script_include", "key": "name",
                         "fields": { "js": "script" } } },
            "rejectEmptyWrites": true,
            "preLoad": true
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        let config = config.normalized();
        config.validate().unwrap();

        let root = config.root(Path::new("/work/dev")).unwrap();
        assert_eq!(root.protocol, "https");
        assert_eq!(root.pre_load_list["script_includes"], vec!["Util.js"]);
        assert!(config.reject_empty_writes);
        assert!(config.pre_load);
        assert_eq!(config.settle_delay(), Duration::from_millis(200));
        assert_eq!(config.notify_burst_threshold, 2);
    }

    #[test]
    fn validation_failures() {
        assert!(SyncConfig::new().validate().is_err());

        let config = SyncConfig::new()
            .with_root("/work", RootConfig::new("h"))
            .with_folder("empty", FolderMapping::new("t", "name"));
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = SyncConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    proptest! {
        #[test]
        fn match_strips_exactly_the_suffix(stem in "[a-zA-Z0-9_]{1,12}") {
            let m = script_mapping();
            let found = m.match_file(&format!("{stem}.condition.js")).unwrap();
            prop_assert_eq!(found.key_value, stem);
            prop_assert_eq!(found.field, "condition");
        }
    }
}
