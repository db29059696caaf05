//! Outbound notifications and the run log.
//!
//! The engine reports through a [`Notifier`] collaborator: once per task at
//! its final resolution and once per run with the captured run log attached.
//! Notifier failures are logged and swallowed; a broken push channel must
//! never take the run down with it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notifier {0} not implemented")]
    NotImplemented(&'static str),
}

/// A file-like payload attached to a notification.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }
}

/// Delivery seam for per-task and run-level messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(
        &self,
        message: &str,
        title: &str,
        attachments: &[Attachment],
    ) -> Result<(), NotifyError>;
}

/// Default notifier: writes everything to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(
        &self,
        message: &str,
        title: &str,
        attachments: &[Attachment],
    ) -> Result<(), NotifyError> {
        log::info!("{}\n{}", title, message);
        for attachment in attachments {
            log::debug!(
                "attachment '{}' ({} bytes)",
                attachment.filename,
                attachment.content.len()
            );
        }
        Ok(())
    }
}

/// In-memory copy of the run's log lines, collected for the run-level
/// notification attachment. Cheap to clone; all clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a line in the run log and mirror it to the logger.
    pub fn note(&self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{}", line);
        let stamped = format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), line);
        self.lines.lock().expect("run log poisoned").push(stamped);
    }

    /// Dump the collected lines as one text blob.
    pub fn dump(&self) -> String {
        self.lines.lock().expect("run log poisoned").join("\n")
    }

    /// Package the log as a notification attachment.
    pub fn attachment(&self) -> Attachment {
        let filename = Local::now()
            .format("autosign-log-%Y-%m-%d--%H-%M-%S.txt")
            .to_string();
        Attachment::new(filename, self.dump().into_bytes())
    }
}
