//! Notification sink capability.
//!
//! The engine owns the decision of *when* to announce a state change;
//! delivery is an external concern. Emission is fire-and-forget: a sink
//! failure is logged and never rolls back the mutation that triggered it.

use crate::core::error::FundryError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Notification {
    pub ts: String,
    pub event_id: String,
    pub kind: String,
    pub subject_id: String,
    pub payload: JsonValue,
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &Notification) -> Result<(), FundryError>;
}

/// Emit after a committed mutation. Best-effort by contract: failure is
/// reported on stderr and otherwise dropped.
pub fn emit_best_effort(
    sink: &dyn NotificationSink,
    kind: &str,
    subject_id: &str,
    payload: JsonValue,
) {
    let event = Notification {
        ts: time::now_epoch_z(),
        event_id: time::new_event_id(),
        kind: kind.to_string(),
        subject_id: subject_id.to_string(),
        payload,
    };
    if let Err(e) = sink.emit(&event) {
        eprintln!("notification emit failed for {}: {}", kind, e);
    }
}

/// Default sink: appends JSONL records to `notifications.jsonl` at the
/// store root, one event per line.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join("notifications.jsonl"),
        }
    }
}

impl NotificationSink for JsonlSink {
    fn emit(&self, event: &Notification) -> Result<(), FundryError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(FundryError::Io)?;
        writeln!(f, "{}", serde_json::to_string(event).unwrap()).map_err(FundryError::Io)?;
        Ok(())
    }
}

/// In-memory sink; clones share one buffer so tests can hand a copy to
/// the engine and inspect emissions afterwards.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }
}

impl NotificationSink for MemorySink {
    fn emit(&self, event: &Notification) -> Result<(), FundryError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
