//! In-band notifications raised during resolution and execution.
//!
//! Logical incompleteness (partial coverage, rejected candidates, cycles) is
//! never an error: it is reported as a [`Notification`] carried by the
//! resolution and dataflow, and can be rendered by a [`NotificationSink`]:
//! terminal, JSON lines, tracing, or collected in memory (testing).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
    /// Observable the notification is about, in canonical form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observable: Option<String>,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            code: None,
            message: message.into(),
            observable: None,
        }
    }

    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            code: Some(code),
            message: message.into(),
            observable: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            code: Some(code),
            message: message.into(),
            observable: None,
        }
    }

    pub fn about(mut self, observable: impl Into<String>) -> Self {
        self.observable = Some(observable.into());
        self
    }

    /// Mirror this notification into the tracing log.
    pub fn trace(&self) {
        let code = self.code.map(ErrorCode::as_str).unwrap_or("-");
        let observable = self.observable.as_deref().unwrap_or("-");
        match self.level {
            Level::Info => tracing::info!(code, observable, "{}", self.message),
            Level::Warning => tracing::warn!(code, observable, "{}", self.message),
            Level::Error => tracing::error!(code, observable, "{}", self.message),
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}", self.level)?;
        if let Some(code) = self.code {
            write!(f, ":{code}")?;
        }
        f.write_str("] ")?;
        if let Some(obs) = &self.observable {
            write!(f, "{obs}: ")?;
        }
        f.write_str(&self.message)
    }
}

// ── NotificationSink trait ──────────────────────────────────────────────

/// A destination for notifications.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: &Notification);

    fn emit_batch(&self, notifications: &[Notification]) {
        for n in notifications {
            self.emit(n);
        }
    }
}

/// Plain terminal output; warnings and errors go to stderr.
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn emit(&self, notification: &Notification) {
        match notification.level {
            Level::Info => println!("{notification}"),
            Level::Warning | Level::Error => eprintln!("{notification}"),
        }
    }
}

/// Newline-delimited JSON.
pub struct JsonSink;

impl NotificationSink for JsonSink {
    fn emit(&self, notification: &Notification) {
        if let Ok(json) = serde_json::to_string(notification) {
            println!("{json}");
        }
    }
}

/// Forwards to `tracing`.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, notification: &Notification) {
        notification.trace();
    }
}

/// Collects notifications for testing.
pub struct VecSink {
    notifications: Mutex<Vec<Notification>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().expect("sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.notifications.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for VecSink {
    fn emit(&self, notification: &Notification) {
        self.notifications
            .lock()
            .expect("sink lock poisoned")
            .push(notification.clone());
    }
}
