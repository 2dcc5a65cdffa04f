//! Operator notifications.

use parking_lot::Mutex;
use std::fmt;
use tracing::{error, info, warn};

/// What happened, from the operator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyCode {
    /// A file was downloaded.
    ReceivedFile,
    /// A download could not be written.
    ReceivedFileError,
    /// The remote field was empty.
    ReceivedFileZeroBytes,
    /// The lookup matched no remote record.
    RecordNotFound,
    /// Local and remote diverged; the push was refused.
    NotInSync,
    /// A file was uploaded.
    UploadComplete,
    /// An upload failed.
    UploadError,
    /// A failure that needs the operator's attention.
    ComplexError,
    /// A burst of transfers finished and all succeeded.
    AllDownloadsComplete,
}

impl NotifyCode {
    /// Returns true for codes that report a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            NotifyCode::ReceivedFileError
                | NotifyCode::RecordNotFound
                | NotifyCode::NotInSync
                | NotifyCode::UploadError
                | NotifyCode::ComplexError
        )
    }
}

impl fmt::Display for NotifyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotifyCode::ReceivedFile => "Received file",
            NotifyCode::ReceivedFileError => "Could not write received file",
            NotifyCode::ReceivedFileZeroBytes => "Received empty field",
            NotifyCode::RecordNotFound => "Record not found",
            NotifyCode::NotInSync => "File not in sync with instance",
            NotifyCode::UploadComplete => "Upload complete",
            NotifyCode::UploadError => "Upload failed",
            NotifyCode::ComplexError => "Sync error, check the log",
            NotifyCode::AllDownloadsComplete => "All transfers complete",
        };
        f.write_str(text)
    }
}

/// Where a notification points the operator to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyContext {
    /// Remote table.
    pub table: Option<String>,
    /// Remote field.
    pub field: Option<String>,
    /// Natural key or file name.
    pub key: Option<String>,
    /// Link to the remote record.
    pub record_url: Option<String>,
}

impl NotifyContext {
    /// An empty context, used for aggregate notifications.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Delivers notifications to the operator.
///
/// Delivery is fire-and-forget: implementations must not block and must
/// swallow their own failures.
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    fn notify(&self, code: NotifyCode, context: &NotifyContext);
}

/// Renders notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, code: NotifyCode, context: &NotifyContext) {
        let table = context.table.as_deref().unwrap_or("-");
        let field = context.field.as_deref().unwrap_or("-");
        let key = context.key.as_deref().unwrap_or("-");
        let url = context.record_url.as_deref().unwrap_or("");
        match code {
            NotifyCode::ComplexError => error!(%table, %field, %key, %url, "{code}"),
            c if c.is_failure() => warn!(%table, %field, %key, %url, "{code}"),
            _ => info!(%table, %field, %key, "{code}"),
        }
    }
}

/// Captures notifications for testing.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<(NotifyCode, NotifyContext)>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the codes seen so far, in order.
    pub fn codes(&self) -> Vec<NotifyCode> {
        self.seen.lock().iter().map(|(code, _)| *code).collect()
    }

    /// Returns everything seen so far.
    pub fn events(&self) -> Vec<(NotifyCode, NotifyContext)> {
        self.seen.lock().clone()
    }

    /// Forgets everything seen so far.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, code: NotifyCode, context: &NotifyContext) {
        self.seen.lock().push((code, context.clone()));
    }
}
