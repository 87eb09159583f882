//! Per-execution event streaming.
//!
//! Every execution gets its own broadcast channel keyed by [`ExecutionId`].
//! Publishing never blocks and never fails: with no subscriber the event is
//! dropped, and a lagging subscriber loses the oldest events.

use crate::RunStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// Identifies one execution of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a diagnostic event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// An escalation tier started.
    Tier,
    /// A click landed.
    Click,
    /// A fill landed.
    Fill,
    /// An action was skipped because the page already satisfied it.
    Skip,
    /// A fallback (assist, sweep, dropdown opener) was invoked.
    Fallback,
    /// Stability wait outcome.
    Stability,
}

/// Events emitted during an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "start")]
    Start {
        timestamp: DateTime<Utc>,
        test_id: String,
        test_name: String,
        total_steps: usize,
    },
    #[serde(rename = "step:start")]
    StepStart {
        timestamp: DateTime<Utc>,
        step: usize,
        action: String,
        target: String,
    },
    #[serde(rename = "step:end")]
    StepEnd {
        timestamp: DateTime<Utc>,
        step: usize,
        action: String,
        target: String,
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        duration_ms: u64,
    },
    #[serde(rename = "end")]
    End {
        timestamp: DateTime<Utc>,
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "login:detected")]
    LoginDetected { timestamp: DateTime<Utc>, url: String },
    #[serde(rename = "login:attempting")]
    LoginAttempting { timestamp: DateTime<Utc> },
    #[serde(rename = "login:email_filled")]
    LoginEmailFilled { timestamp: DateTime<Utc> },
    #[serde(rename = "login:password_filled")]
    LoginPasswordFilled { timestamp: DateTime<Utc> },
    #[serde(rename = "login:submitted")]
    LoginSubmitted { timestamp: DateTime<Utc> },
    #[serde(rename = "login:success")]
    LoginSuccess { timestamp: DateTime<Utc> },
    #[serde(rename = "login:failed")]
    LoginFailed {
        timestamp: DateTime<Utc>,
        message: String,
    },
    #[serde(rename = "login:error")]
    LoginError {
        timestamp: DateTime<Utc>,
        message: String,
    },
    #[serde(rename = "diagnostic")]
    Diagnostic {
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
        kind: DiagnosticKind,
        message: String,
    },
}

impl Event {
    /// The `type` tag as serialized.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StepStart { .. } => "step:start",
            Self::StepEnd { .. } => "step:end",
            Self::End { .. } => "end",
            Self::LoginDetected { .. } => "login:detected",
            Self::LoginAttempting { .. } => "login:attempting",
            Self::LoginEmailFilled { .. } => "login:email_filled",
            Self::LoginPasswordFilled { .. } => "login:password_filled",
            Self::LoginSubmitted { .. } => "login:submitted",
            Self::LoginSuccess { .. } => "login:success",
            Self::LoginFailed { .. } => "login:failed",
            Self::LoginError { .. } => "login:error",
            Self::Diagnostic { .. } => "diagnostic",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Start { timestamp, .. }
            | Self::StepStart { timestamp, .. }
            | Self::StepEnd { timestamp, .. }
            | Self::End { timestamp, .. }
            | Self::LoginDetected { timestamp, .. }
            | Self::LoginAttempting { timestamp }
            | Self::LoginEmailFilled { timestamp }
            | Self::LoginPasswordFilled { timestamp }
            | Self::LoginSubmitted { timestamp }
            | Self::LoginSuccess { timestamp }
            | Self::LoginFailed { timestamp, .. }
            | Self::LoginError { timestamp, .. }
            | Self::Diagnostic { timestamp, .. } => *timestamp,
        }
    }

    pub fn diagnostic(step: Option<usize>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::Diagnostic {
            timestamp: Utc::now(),
            step,
            kind,
            message: message.into(),
        }
    }
}

/// An event addressed to one execution.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub execution_id: ExecutionId,
    #[serde(flatten)]
    pub event: Event,
}

type Hook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry of per-execution channels.
#[derive(Clone, Default)]
pub struct EventBus {
    channels: Arc<Mutex<HashMap<ExecutionId, broadcast::Sender<Envelope>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ExecutionId, broadcast::Sender<Envelope>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open (or reuse) the channel for an execution and return its sink.
    pub fn open(&self, id: ExecutionId) -> EventSink {
        let sender = self
            .channels()
            .entry(id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        EventSink {
            id,
            sender: Some(sender),
            hook: None,
        }
    }

    /// Subscribe to an execution's events. Opens the channel if needed, so
    /// subscribing before the execution starts sees every event.
    pub fn subscribe(&self, id: ExecutionId) -> broadcast::Receiver<Envelope> {
        self.channels()
            .entry(id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish one event. A no-op when nobody listens.
    pub fn publish(&self, id: ExecutionId, event: Event) {
        let sender = self.channels().get(&id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(Envelope {
                execution_id: id,
                event,
            });
        }
    }

    /// Drop an execution's channel. Receivers drain what is buffered, then end.
    pub fn close(&self, id: ExecutionId) {
        self.channels().remove(&id);
    }

    /// Executions with an open channel.
    pub fn active(&self) -> usize {
        self.channels().len()
    }
}

/// Fire-and-forget emitter for one execution.
#[derive(Clone)]
pub struct EventSink {
    id: ExecutionId,
    sender: Option<broadcast::Sender<Envelope>>,
    hook: Option<Hook>,
}

impl EventSink {
    /// A sink that drops everything.
    pub fn detached(id: ExecutionId) -> Self {
        Self {
            id,
            sender: None,
            hook: None,
        }
    }

    /// Also deliver every event to `hook`, in order, on the executing task.
    pub fn with_hook(mut self, hook: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn emit(&self, event: Event) {
        if let Some(ref hook) = self.hook {
            hook(&event);
        }
        if let Some(ref sender) = self.sender {
            let _ = sender.send(Envelope {
                execution_id: self.id,
                event,
            });
        }
    }

    pub fn diagnostic(&self, step: Option<usize>, kind: DiagnosticKind, message: impl Into<String>) {
        self.emit(Event::diagnostic(step, kind, message));
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("id", &self.id)
            .field("hooked", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn serializes_with_type_tag() {
        let event = Event::StepStart {
            timestamp: Utc::now(),
            step: 2,
            action: "click".into(),
            target: "Sign In".into(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "step:start");
        assert_eq!(v["step"], 2);
        assert_eq!(v["target"], "Sign In");

        let login = Event::LoginEmailFilled { timestamp: Utc::now() };
        assert_eq!(serde_json::to_value(&login).unwrap()["type"], "login:email_filled");
        assert_eq!(login.name(), "login:email_filled");
    }

    #[test]
    fn diagnostic_kind_serializes_lowercase() {
        let v = serde_json::to_value(Event::diagnostic(Some(1), DiagnosticKind::Skip, "already selected"))
            .unwrap();
        assert_eq!(v["type"], "diagnostic");
        assert_eq!(v["kind"], "skip");
    }

    #[test]
    fn envelope_flattens_event() {
        let id = ExecutionId::new();
        let env = Envelope {
            execution_id: id,
            event: Event::LoginSuccess { timestamp: Utc::now() },
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["execution_id"], id.to_string());
        assert_eq!(v["type"], "login:success");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        let id = ExecutionId::new();
        bus.publish(id, Event::LoginAttempting { timestamp: Utc::now() });
        let sink = bus.open(id);
        sink.emit(Event::LoginAttempting { timestamp: Utc::now() });
        EventSink::detached(id).emit(Event::LoginAttempting { timestamp: Utc::now() });
    }

    #[tokio::test]
    async fn subscriber_receives_in_order() {
        let bus = EventBus::new();
        let id = ExecutionId::new();
        let mut rx = bus.subscribe(id);
        let sink = bus.open(id);
        for step in 1..=3 {
            sink.diagnostic(Some(step), DiagnosticKind::Tier, "quick");
        }
        bus.close(id);
        drop(sink);

        let mut seen = Vec::new();
        while let Ok(env) = rx.recv().await {
            if let Event::Diagnostic { step, .. } = env.event {
                seen.push(step.unwrap());
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(bus.active(), 0);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = EventBus::new();
        let (a, b) = (ExecutionId::new(), ExecutionId::new());
        let mut rx_a = bus.subscribe(a);
        let sink_b = bus.open(b);
        sink_b.diagnostic(None, DiagnosticKind::Click, "b only");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn hook_sees_every_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sink = EventSink::detached(ExecutionId::new()).with_hook(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        sink.diagnostic(None, DiagnosticKind::Fill, "a");
        sink.diagnostic(None, DiagnosticKind::Fill, "b");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
