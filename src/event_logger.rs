use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::diagnostics::{ContextKind, Marker, MarkerSink};
use crate::network::SpecTransport;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub event_name: String,
    pub metadata: serde_json::Value,
    pub logged_at: String,
}

/// Outbound event pipeline. Events accumulate in memory and leave in one
/// batch per flush; after shutdown the pipeline stops accepting so nothing
/// is logged through a closed transport.
pub struct EventLogger {
    transport: Arc<dyn SpecTransport>,
    events: Mutex<Vec<LogEvent>>,
    accepting: AtomicBool,
}

impl EventLogger {
    pub fn new(transport: Arc<dyn SpecTransport>) -> Self {
        Self {
            transport,
            events: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn enqueue(&self, event: LogEvent) {
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }
        self.events.lock().unwrap().push(event);
    }

    pub fn pending(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Deliver everything buffered so far. Delivery failures are reported
    /// and the batch is dropped; events are telemetry, not state.
    pub async fn flush(&self) {
        let batch: Vec<LogEvent> = {
            let mut events = self.events.lock().unwrap();
            events.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.transport.post_events(&batch).await {
            eprintln!(
                "flagsync: failed to deliver {} buffered events: {}",
                batch.len(),
                e
            );
        }
    }

    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.flush().await;
    }
}

impl MarkerSink for EventLogger {
    fn log_diagnostics(&self, context: ContextKind, markers: Vec<Marker>) {
        let metadata = serde_json::json!({
            "context": context,
            "markers": markers,
        });
        self.enqueue(LogEvent {
            event_name: "flagsync::diagnostics".to_string(),
            metadata,
            logged_at: chrono::Utc::now().to_rfc3339(),
        });
    }
}
