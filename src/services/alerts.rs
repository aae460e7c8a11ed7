//! Operational alerting.
//!
//! This subsystem runs in the background with no end-user-facing error
//! surface; persistent failures are raised here instead, for operators.

use std::sync::Mutex;

/// An operational alert event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A queue entry exhausted its retries and is terminally failed.
    RetriesExhausted {
        item_id: String,
        entry_id: u64,
        error: String,
    },
    /// The lease reclaim fired repeatedly for the same item; likely a
    /// systemic fetch failure rather than a crashed worker.
    RepeatedReclaim { item_id: String, count: u32 },
}

/// Sink for operational alerts.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert);
}

/// Default sink: alerts go to the error log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&self, alert: &Alert) {
        match alert {
            Alert::RetriesExhausted {
                item_id,
                entry_id,
                error,
            } => {
                log::error!(
                    "ALERT: retries exhausted for item {item_id} (entry {entry_id}): {error}"
                );
            }
            Alert::RepeatedReclaim { item_id, count } => {
                log::error!(
                    "ALERT: entry for item {item_id} reclaimed {count} times; possible systemic fetch failure"
                );
            }
        }
    }
}

/// Collecting sink for tests and embedders that forward alerts elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts emitted so far.
    pub fn drain(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for MemoryAlertSink {
    fn emit(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemoryAlertSink::new();
        assert!(sink.is_empty());

        sink.emit(&Alert::RepeatedReclaim {
            item_id: "a".into(),
            count: 3,
        });
        assert_eq!(sink.len(), 1);

        let alerts = sink.drain();
        assert_eq!(
            alerts,
            vec![Alert::RepeatedReclaim {
                item_id: "a".into(),
                count: 3
            }]
        );
        assert!(sink.is_empty());
    }
}
