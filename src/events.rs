//! Events emitted by a drive session
//!
//! Transfers report progress through `TransferEvent`s; every user-triggered
//! operation ends with at most one `Notification`. Front ends receive both
//! through an `EventSink`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferEventType {
    Start,
    Progress,
    Complete,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    pub transfer_id: String,
    pub filename: String,
    pub transferred: u64,
    pub total: u64,
    pub percentage: u8,
    pub direction: TransferDirection,
}

impl TransferProgress {
    pub fn new(
        transfer_id: &str,
        filename: &str,
        transferred: u64,
        total: u64,
        direction: TransferDirection,
    ) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            (transferred.min(total) * 100 / total) as u8
        };
        Self {
            transfer_id: transfer_id.to_string(),
            filename: filename.to_string(),
            transferred,
            total,
            percentage,
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub event_type: TransferEventType,
    pub transfer_id: String,
    pub filename: String,
    pub direction: TransferDirection,
    pub message: Option<String>,
    pub progress: Option<TransferProgress>,
}

impl TransferEvent {
    pub fn new(
        event_type: TransferEventType,
        transfer_id: &str,
        filename: &str,
        direction: TransferDirection,
    ) -> Self {
        Self {
            event_type,
            transfer_id: transfer_id.to_string(),
            filename: filename.to_string(),
            direction,
            message: None,
            progress: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(progress: TransferProgress) -> Self {
        Self {
            event_type: TransferEventType::Progress,
            transfer_id: progress.transfer_id.clone(),
            filename: progress.filename.clone(),
            direction: progress.direction,
            message: None,
            progress: Some(progress),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// User-visible outcome of an operation (toast)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Error, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriveEvent {
    Transfer(TransferEvent),
    Notification(Notification),
}

/// Receiver of session events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DriveEvent);
}

/// Sink that drops every event
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DriveEvent) {}
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<DriveEvent> {
    fn emit(&self, event: DriveEvent) {
        // A closed receiver only means nobody is listening anymore
        let _ = self.send(event);
    }
}
