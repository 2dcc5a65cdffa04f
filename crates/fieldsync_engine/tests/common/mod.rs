//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use fieldsync_engine::{
    FolderMapping, MemoryRemote, MockWatcher, Notifier, RecordingNotifier, RemoteRegistry,
    RemoteTable, RootConfig, SyncConfig, SyncEngine, WatchService,
};
use fieldsync_protocol::RemoteRecord;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const FOLDER: &str = "script_includes";
pub const TABLE: &str = "sys_script_include";

/// A temporary root wired to an in-memory remote.
pub struct TestEnv {
    pub dir: TempDir,
    pub remote: Arc<MemoryRemote>,
    pub watcher: Arc<MockWatcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<SyncEngine>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(customize: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = customize(base_config(&dir));
        let remote = Arc::new(MemoryRemote::new());
        let watcher = Arc::new(MockWatcher::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let remotes = RemoteRegistry::new()
            .with_root(dir.path(), Arc::clone(&remote) as Arc<dyn RemoteTable>);
        let engine = Arc::new(SyncEngine::new(
            config,
            remotes,
            Arc::clone(&watcher) as Arc<dyn WatchService>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        ));
        Self {
            dir,
            remote,
            watcher,
            notifier,
            engine,
        }
    }

    /// Absolute path of a file in the mapped folder.
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(FOLDER).join(file_name)
    }

    /// Path relative to the root, as the CLI takes it.
    pub fn relative(&self, file_name: &str) -> PathBuf {
        PathBuf::from(FOLDER).join(file_name)
    }

    pub fn write(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.path(file_name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn read(&self, file_name: &str) -> String {
        std::fs::read_to_string(self.path(file_name)).unwrap()
    }

    /// Adds a record whose `script` field holds `body`.
    pub fn remote_script(&self, record_id: &str, name: &str, body: &str) {
        self.remote.insert(
            TABLE,
            RemoteRecord::new(record_id)
                .with_field("name", name)
                .with_field("script", body)
                .with_updated("2024-05-02 08:30:00", "admin"),
        );
    }

    /// Waits until the queue has restarted the watch.
    pub async fn wait_for_watch(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.engine.queue().is_watching() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "watch was not restarted"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn base_config(dir: &TempDir) -> SyncConfig {
    SyncConfig::new()
        .with_root(dir.path(), RootConfig::new("dev.example.com"))
        .with_folder(FOLDER, FolderMapping::new(TABLE, "name").with_field(".js", "script"))
        .with_settle_delay(Duration::from_millis(20))
}
