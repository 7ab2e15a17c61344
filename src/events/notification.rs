use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Operator-facing message delivered by the notifier.
///
/// `kind` doubles as the mail subject and as the key for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
    pub created: DateTime<Local>,
}

impl Notification {
    pub fn new(kind: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
            attachment: None,
            created: Local::now(),
        }
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Local>) -> Self {
        self.created = created;
        self
    }
}
