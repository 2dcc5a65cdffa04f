//! Three-way conflict classification.
//!
//! Compares the digest of the new local content with the digest stored at
//! the last successful sync and the digest of the current remote value.
//! Divergence on both sides is never resolved automatically.

use crate::hash::ContentHash;

/// Outcome of comparing local, last-synced and remote content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncVerdict {
    /// Local content equals the last synced content. Nothing to do.
    Unchanged,
    /// Remote already holds the new local content. Nothing to push, but the
    /// stored baseline should move to the new content.
    RemoteMatches,
    /// Remote is unchanged since the last sync and local diverged: push.
    SafeToPush,
    /// Remote changed independently and differs from local: refuse.
    Diverged,
}

impl SyncVerdict {
    /// Returns true if local and remote are reconcilable without data loss.
    pub fn in_sync(&self) -> bool {
        !matches!(self, SyncVerdict::Diverged)
    }

    /// Returns true if the local content must be written to the remote.
    pub fn push_needed(&self) -> bool {
        matches!(self, SyncVerdict::SafeToPush)
    }

    /// Returns true if the new local digest should become the stored baseline
    /// without any transfer.
    pub fn adopts_local_baseline(&self) -> bool {
        matches!(self, SyncVerdict::RemoteMatches)
    }

    /// Checks the local side only.
    ///
    /// Returns `Some(Unchanged)` when no remote lookup is needed.
    pub fn local_only(new: &ContentHash, stored: Option<&ContentHash>) -> Option<Self> {
        (stored == Some(new)).then_some(SyncVerdict::Unchanged)
    }
}

/// Classifies a local change against the remote value.
///
/// `stored` is `None` for files that were never synced; such files can only
/// be in sync when the remote already matches.
pub fn classify(
    new: &ContentHash,
    stored: Option<&ContentHash>,
    remote: &ContentHash,
) -> SyncVerdict {
    if let Some(verdict) = SyncVerdict::local_only(new, stored) {
        return verdict;
    }
    if new == remote {
        SyncVerdict::RemoteMatches
    } else if stored == Some(remote) {
        SyncVerdict::SafeToPush
    } else {
        SyncVerdict::Diverged
    }
}
