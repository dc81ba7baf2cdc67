use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Token usage reported by the generation capability. Both fields are
/// optional; a generator that reports nothing still produces a valid span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanPhase {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanOutcome {
    Ok,
    Error,
    /// The span guard was dropped without an explicit outcome, typically
    /// because the step body bailed out early.
    Aborted,
}

/// One timed record of an orchestration step. Every span produces exactly
/// one `Start` and one `End` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub run_id: Uuid,
    pub step: String,
    pub phase: SpanPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SpanOutcome>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_metrics: Option<TokenMetrics>,
}

/// External trace delivery. Strictly fire-and-forget: a sink that drops
/// events must never fail the run.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// Sink that forwards events to the process log.
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, event: &TraceEvent) {
        debug!(
            run_id = %event.run_id,
            step = %event.step,
            phase = ?event.phase,
            outcome = ?event.outcome,
            elapsed_ms = event.elapsed_ms,
            "trace event"
        );
    }
}

/// Sink that pushes events onto an unbounded channel for an external
/// collector. A closed receiver loses events silently.
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<TraceEvent>,
}

impl ChannelSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<TraceEvent>) -> Self {
        Self { sender }
    }
}

impl TraceSink for ChannelSink {
    fn record(&self, event: &TraceEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Records spans for one orchestration run: one root span plus one child
/// span per state. Events accumulate in the run's event log and are
/// mirrored to the sink.
pub struct Tracer {
    run_id: Uuid,
    sink: Arc<dyn TraceSink>,
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl Tracer {
    pub fn new(run_id: Uuid, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            run_id,
            sink,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Open a span and record its `Start` event. The returned guard records
    /// the matching `End` event on `finish`, or on drop if the step body
    /// bails out without finishing it.
    pub fn begin_span(&self, step: &str, attributes: &[(&str, String)]) -> SpanGuard {
        let attributes: BTreeMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let start = TraceEvent {
            run_id: self.run_id,
            step: step.to_string(),
            phase: SpanPhase::Start,
            outcome: None,
            attributes: attributes.clone(),
            elapsed_ms: None,
            token_metrics: None,
        };
        self.emit(start);

        SpanGuard {
            run_id: self.run_id,
            step: step.to_string(),
            attributes,
            started: Instant::now(),
            events: Arc::clone(&self.events),
            sink: Arc::clone(&self.sink),
            closed: false,
        }
    }

    /// Drain the recorded events into the finished run.
    pub fn take_events(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.events.lock().expect("trace buffer poisoned"))
    }

    fn emit(&self, event: TraceEvent) {
        self.sink.record(&event);
        self.events
            .lock()
            .expect("trace buffer poisoned")
            .push(event);
    }
}

/// Scoped span: closing is guaranteed on every exit path.
pub struct SpanGuard {
    run_id: Uuid,
    step: String,
    attributes: BTreeMap<String, String>,
    started: Instant,
    events: Arc<Mutex<Vec<TraceEvent>>>,
    sink: Arc<dyn TraceSink>,
    closed: bool,
}

impl SpanGuard {
    /// Attach an attribute to the span's `End` event.
    pub fn set_attr(&mut self, key: &str, value: String) {
        self.attributes.insert(key.to_string(), value);
    }

    pub fn finish(mut self, outcome: SpanOutcome, metrics: Option<TokenMetrics>) {
        self.close(outcome, metrics);
    }

    fn close(&mut self, outcome: SpanOutcome, metrics: Option<TokenMetrics>) {
        if self.closed {
            return;
        }
        self.closed = true;

        let event = TraceEvent {
            run_id: self.run_id,
            step: self.step.clone(),
            phase: SpanPhase::End,
            outcome: Some(outcome),
            attributes: std::mem::take(&mut self.attributes),
            elapsed_ms: Some(self.started.elapsed().as_millis() as u64),
            token_metrics: metrics,
        };
        self.sink.record(&event);
        self.events
            .lock()
            .expect("trace buffer poisoned")
            .push(event);
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.close(SpanOutcome::Aborted, None);
    }
}
