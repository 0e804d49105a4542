//! Event bus, heartbeat sink, and the in-process QA task queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per-item weight delta reported inside a `weights.updated.trace`
/// event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightUpdateReport {
    pub item_id: String,
    pub delta_global: f64,
    pub log_weight_new: f64,
    pub local_overlays: Vec<OverlayReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayReport {
    pub entity: String,
    pub delta: f64,
    pub overlay_after: f64,
    pub membership_weight: f64,
}

/// The event kinds emitted over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    #[serde(rename = "weights.updated.trace")]
    WeightsUpdatedTrace {
        frame_id: String,
        scope: String,
        cohort: String,
        entity_contexts: Vec<String>,
        global_context: bool,
        n: usize,
        d_mu: f64,
        d_sigma: f64,
        updates: Vec<WeightUpdateReport>,
    },
    #[serde(rename = "weights.updated.traversal")]
    WeightsUpdatedTraversal {
        frame_id: String,
        scope: String,
        cohort: String,
        entity_contexts: Vec<String>,
        global_context: bool,
        n: usize,
        d_mu: f64,
        d_sigma: f64,
        updates: Vec<WeightUpdateReport>,
    },
    #[serde(rename = "telemetry.write.denied")]
    TelemetryWriteDenied {
        expected: String,
        got: String,
        #[serde(rename = "fn")]
        function: String,
        ctx: Option<String>,
    },
    #[serde(rename = "graph.health.snapshot")]
    GraphHealthSnapshot { graph: String, snapshot: serde_json::Value },
    #[serde(rename = "graph.health.alert")]
    GraphHealthAlert {
        graph: String,
        metric: String,
        from_status: String,
        to_status: String,
    },
    #[serde(rename = "unit.aborted")]
    UnitAborted { reason: String },
}

/// Sink for emitted events. Implementations must never fail or block the
/// caller materially — this is fire-and-forget telemetry, not a
/// transactional log.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// No-op sink for tests and deployments with observability disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: Event) {}
}

/// Broadcast sink for production: fans events out to any number of
/// subscribers via a `tokio::sync::broadcast` channel. Sending to a
/// channel with no receivers is not an error — the send simply returns
/// `Err(SendError)`, which is ignored here: callers never check whether
/// a broadcaster is actually listening.
pub struct BroadcastSink {
    tx: tokio::sync::broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<Event>) {
        let (tx, rx) = tokio::sync::broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// A queued follow-up task raised by a non-blocking error: schema
/// violations, incomplete link metadata, unconfirmed writes that the
/// caller chose to log-and-continue on rather than abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaTask {
    pub kind: String,
    pub item_id: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl QaTask {
    pub fn new(kind: impl Into<String>, item_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            item_id: item_id.into(),
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

/// In-process QA task queue. No external ticketing system is in scope;
/// callers drain this periodically.
#[derive(Default)]
pub struct QaTaskQueue {
    tasks: parking_lot::Mutex<Vec<QaTask>>,
}

impl QaTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: QaTask) {
        self.tasks.lock().push(task);
    }

    pub fn drain(&self) -> Vec<QaTask> {
        std::mem::take(&mut *self.tasks.lock())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One per-item delta recorded into the heartbeat's rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatDelta {
    pub item_id: String,
    pub delta_global: f64,
    pub at: DateTime<Utc>,
}

/// Cumulative learning statistics plus the most recent per-item deltas,
/// written to periodic JSON files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeartbeatSnapshot {
    pub total_traces_processed: u64,
    pub total_weight_updates: u64,
    pub recent_deltas: Vec<HeartbeatDelta>,
}

const RECENT_DELTA_CAPACITY: usize = 100;

pub struct Heartbeat {
    state: parking_lot::Mutex<HeartbeatSnapshot>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(HeartbeatSnapshot::default()),
        }
    }

    pub fn record_trace_processing(&self) {
        self.state.lock().total_traces_processed += 1;
    }

    pub fn record_weight_update(&self, item_id: impl Into<String>, delta_global: f64) {
        let mut state = self.state.lock();
        state.total_weight_updates += 1;
        state.recent_deltas.push(HeartbeatDelta {
            item_id: item_id.into(),
            delta_global,
            at: Utc::now(),
        });
        if state.recent_deltas.len() > RECENT_DELTA_CAPACITY {
            let overflow = state.recent_deltas.len() - RECENT_DELTA_CAPACITY;
            state.recent_deltas.drain(0..overflow);
        }
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        self.state.lock().clone()
    }

    pub fn write_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| crate::Error::ExecutionError(format!("heartbeat serialize: {e}")))
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience constructor for a shared no-op sink.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_anything() {
        let sink = NoOpSink;
        sink.emit(Event::UnitAborted { reason: "test".into() });
    }

    #[test]
    fn broadcast_sink_delivers_to_subscriber() {
        let (sink, mut rx) = BroadcastSink::new(8);
        sink.emit(Event::TelemetryWriteDenied {
            expected: "L1:a".into(),
            got: "L2:b".into(),
            function: "upsert_node".into(),
            ctx: None,
        });
        let received = rx.try_recv().unwrap();
        matches!(received, Event::TelemetryWriteDenied { .. });
    }

    #[test]
    fn heartbeat_caps_recent_deltas() {
        let hb = Heartbeat::new();
        for i in 0..(RECENT_DELTA_CAPACITY + 10) {
            hb.record_weight_update(format!("n{i}"), 0.1);
        }
        assert_eq!(hb.snapshot().recent_deltas.len(), RECENT_DELTA_CAPACITY);
        assert_eq!(hb.snapshot().total_weight_updates, (RECENT_DELTA_CAPACITY + 10) as u64);
    }

    #[test]
    fn qa_task_queue_drains_once() {
        let q = QaTaskQueue::new();
        q.push(QaTask::new("incomplete_metadata", "link-1", "missing strength"));
        assert_eq!(q.len(), 1);
        let drained = q.drain();
        assert_eq!(drained.len(), 1);
        assert!(q.is_empty());
    }
}
