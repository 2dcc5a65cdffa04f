//! Persisted per-file synchronization metadata.

use crate::error::ProtocolResult;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Identity of the remote record a file was last synchronized with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    /// Unique remote record identifier.
    pub record_id: Option<String>,
    /// Remote "last updated" timestamp, as reported by the server.
    pub updated_at: Option<String>,
    /// Remote "last updated by" user, as reported by the server.
    pub updated_by: Option<String>,
}

/// Sidecar state stored for every tracked file.
///
/// Serialized as a small JSON object:
///
/// ```json
/// {"recordId":"…","remoteUpdatedAt":"…","remoteUpdatedBy":"…","contentHash":"sha256:…"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Remote record identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Remote "last updated" timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_updated_at: Option<String>,
    /// Remote "last updated by" user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_updated_by: Option<String>,
    /// Digest of the content last known to be identical locally and remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
}

impl SyncMeta {
    /// Merges remote identity, leaving the content hash untouched.
    ///
    /// Fields absent from `identity` keep their previous value.
    pub fn merge_identity(&mut self, identity: &RemoteIdentity) {
        if let Some(id) = &identity.record_id {
            self.record_id = Some(id.clone());
        }
        if let Some(at) = &identity.updated_at {
            self.remote_updated_at = Some(at.clone());
        }
        if let Some(by) = &identity.updated_by {
            self.remote_updated_by = Some(by.clone());
        }
    }

    /// Returns the identity part of the metadata.
    pub fn identity(&self) -> RemoteIdentity {
        RemoteIdentity {
            record_id: self.record_id.clone(),
            updated_at: self.remote_updated_at.clone(),
            updated_by: self.remote_updated_by.clone(),
        }
    }

    /// Encodes to the on-disk JSON form.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from the on-disk JSON form.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
