use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { index: usize, attempt: u32 },
    Retrying { index: usize, attempt: u32, delay_ms: u64 },
    Submitted { index: usize, external_id: Option<String> },
    Failed { index: usize, error: String },
    Cancelled { index: usize },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { index, attempt: 0 } => println!("[job:{index}] submitting"),
            ProgressEvent::Started { index, attempt } => println!("[job:{index}] submitting (attempt {})", attempt + 1),
            ProgressEvent::Retrying { index, delay_ms, .. } => println!("[job:{index}] retrying in {delay_ms}ms"),
            ProgressEvent::Submitted { index, external_id: Some(id) } => println!("[job:{index}] submitted as {id}"),
            ProgressEvent::Submitted { index, external_id: None } => println!("[job:{index}] submitted"),
            ProgressEvent::Failed { index, error } => println!("[job:{index}] failed: {error}"),
            ProgressEvent::Cancelled { index } => println!("[job:{index}] cancelled"),
        }
    }
}

/// Discards events.
#[derive(Debug, Default)]
pub struct SilentProgressSink;

impl ProgressSink for SilentProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}

/// Keeps every event, for inspection.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
