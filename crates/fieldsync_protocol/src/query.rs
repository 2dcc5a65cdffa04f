//! Requests to and records from a remote table service.

use crate::hash::ContentHash;
use crate::meta::RemoteIdentity;
use std::collections::BTreeMap;
use std::fmt;

/// How a single remote record is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSelector {
    /// `field = value` equality on the table's natural key.
    Key {
        /// Key field name.
        field: String,
        /// Value to match.
        value: String,
    },
    /// Explicit record identifier.
    Id(String),
}

impl fmt::Display for RecordSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSelector::Key { field, value } => write!(f, "{field}={value}"),
            RecordSelector::Id(id) => write!(f, "record_id={id}"),
        }
    }
}

/// A query addressing one field of one remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Remote table.
    pub table: String,
    /// Field holding the synchronized content.
    pub field: String,
    /// Record selection.
    pub selector: RecordSelector,
}

impl RecordQuery {
    /// Creates a query selecting by natural key.
    pub fn by_key(
        table: impl Into<String>,
        field: impl Into<String>,
        key_field: impl Into<String>,
        key_value: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            selector: RecordSelector::Key {
                field: key_field.into(),
                value: key_value.into(),
            },
        }
    }

    /// Creates a query selecting by record identifier.
    pub fn by_id(
        table: impl Into<String>,
        field: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            selector: RecordSelector::Id(record_id.into()),
        }
    }
}

impl fmt::Display for RecordQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} [{}]", self.table, self.field, self.selector)
    }
}

/// A record returned by the remote table service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Record identity (id, last update time and user).
    pub identity: RemoteIdentity,
    /// Field values rendered as text.
    pub fields: BTreeMap<String, String>,
}

impl RemoteRecord {
    /// Creates a record with the given identifier and no fields.
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            identity: RemoteIdentity {
                record_id: Some(record_id.into()),
                ..Default::default()
            },
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the "last updated" identity fields.
    pub fn with_updated(mut self, at: impl Into<String>, by: impl Into<String>) -> Self {
        self.identity.updated_at = Some(at.into());
        self.identity.updated_by = Some(by.into());
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns the digest of a field value, if the field is present.
    pub fn field_hash(&self, name: &str) -> Option<ContentHash> {
        self.field(name).map(ContentHash::of_str)
    }
}

/// Field values to write in a single-record update.
pub type FieldPayload = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_display() {
        let q = RecordQuery::by_key("sys_script_include", "script", "name", "ActionUtils");
        assert_eq!(q.to_string(), "sys_script_include.script [name=ActionUtils]");

        let q = RecordQuery::by_id("sys_ui_page", "html", "b1b390");
        assert_eq!(q.to_string(), "sys_ui_page.html [record_id=b1b390]");
    }

    #[test]
    fn record_field_hash() {
        let record = RemoteRecord::new("abc").with_field("script", "var x = 1;");
        assert_eq!(
            record.field_hash("script"),
            Some(ContentHash::of(b"var x = 1;"))
        );
        assert_eq!(record.field_hash("missing"), None);
        assert_eq!(record.identity.record_id.as_deref(), Some("abc"));
    }
}
