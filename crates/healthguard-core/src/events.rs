//! Typed progress events and the channel they travel on.
//!
//! Events are constructed once as typed values and only turned into their wire
//! representation (`{"type", "agent", "content", "timestamp"}`) at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Subject used for pipeline-level coordination events.
pub const COORDINATOR: &str = "coordinator";
/// Subject used for infrastructure events (run ids, fatal errors).
pub const SYSTEM: &str = "system";

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    PhaseUpdate {
        subject: String,
        message: String,
    },
    AgentMessage {
        subject: String,
        content: String,
    },
    ToolCall {
        subject: String,
        tool_name: String,
        args: Value,
    },
    ToolResponse {
        subject: String,
        content: String,
    },
    FinalReport {
        content: String,
    },
    /// `fatal` marks the unrecoverable error that terminates a stream.
    Error {
        subject: String,
        message: String,
        fatal: bool,
    },
}

/// One timestamped notification of pipeline progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl ProgressEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::FinalReport { .. } | EventKind::Error { fatal: true, .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::PhaseUpdate { .. } => "phase_update",
            EventKind::AgentMessage { .. } => "agent_message",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolResponse { .. } => "tool_response",
            EventKind::FinalReport { .. } => "final_report",
            EventKind::Error { .. } => "error",
        }
    }

    pub fn subject(&self) -> &str {
        match &self.kind {
            EventKind::PhaseUpdate { subject, .. }
            | EventKind::AgentMessage { subject, .. }
            | EventKind::ToolCall { subject, .. }
            | EventKind::ToolResponse { subject, .. }
            | EventKind::Error { subject, .. } => subject,
            EventKind::FinalReport { .. } => COORDINATOR,
        }
    }

    /// Serialise to a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            serde_json::json!({
                "type": "error",
                "agent": SYSTEM,
                "content": format!("failed to serialise event: {err}"),
                "timestamp": self.timestamp,
            })
            .to_string()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    agent: String,
    content: Value,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    fatal: bool,
}

impl From<ProgressEvent> for WireEvent {
    fn from(event: ProgressEvent) -> Self {
        let kind = event.type_name().to_string();
        let agent = event.subject().to_string();
        let (content, fatal) = match event.kind {
            EventKind::PhaseUpdate { message, .. } => (Value::String(message), false),
            EventKind::AgentMessage { content, .. } => (Value::String(content), false),
            EventKind::ToolCall {
                tool_name, args, ..
            } => (serde_json::json!({ "tool": tool_name, "args": args }), false),
            EventKind::ToolResponse { content, .. } => (Value::String(content), false),
            EventKind::FinalReport { content } => (Value::String(content), false),
            EventKind::Error { message, fatal, .. } => (Value::String(message), fatal),
        };
        Self {
            kind,
            agent,
            content,
            timestamp: event.timestamp,
            fatal,
        }
    }
}

impl TryFrom<WireEvent> for ProgressEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let text = |content: Value| match content {
            Value::String(text) => text,
            other => other.to_string(),
        };
        let subject = wire.agent;
        let kind = match wire.kind.as_str() {
            "phase_update" => EventKind::PhaseUpdate {
                subject,
                message: text(wire.content),
            },
            "agent_message" => EventKind::AgentMessage {
                subject,
                content: text(wire.content),
            },
            "tool_call" => {
                let tool_name = wire
                    .content
                    .get("tool")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "tool_call event without `tool`".to_string())?
                    .to_string();
                let args = wire.content.get("args").cloned().unwrap_or(Value::Null);
                EventKind::ToolCall {
                    subject,
                    tool_name,
                    args,
                }
            }
            "tool_response" => EventKind::ToolResponse {
                subject,
                content: text(wire.content),
            },
            "final_report" => EventKind::FinalReport {
                content: text(wire.content),
            },
            "error" => EventKind::Error {
                subject,
                message: text(wire.content),
                fatal: wire.fatal,
            },
            other => return Err(format!("unknown event type `{other}`")),
        };
        Ok(Self {
            timestamp: wire.timestamp,
            kind,
        })
    }
}

/// Cloneable producer handle for progress events.
///
/// Sends never block and never fail the pipeline; a vanished consumer only
/// produces a debug log line.
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, kind: EventKind) {
        if let Err(err) = self.sender.send(ProgressEvent::new(kind)) {
            tracing::debug!(event = err.0.type_name(), "event consumer dropped");
        }
    }

    pub fn phase(&self, subject: &str, message: impl Into<String>) {
        self.emit(EventKind::PhaseUpdate {
            subject: subject.to_string(),
            message: message.into(),
        });
    }

    pub fn agent_message(&self, subject: &str, content: impl Into<String>) {
        self.emit(EventKind::AgentMessage {
            subject: subject.to_string(),
            content: content.into(),
        });
    }

    pub fn tool_call(&self, subject: &str, tool_name: impl Into<String>, args: Value) {
        self.emit(EventKind::ToolCall {
            subject: subject.to_string(),
            tool_name: tool_name.into(),
            args,
        });
    }

    pub fn tool_response(&self, subject: &str, content: impl Into<String>) {
        self.emit(EventKind::ToolResponse {
            subject: subject.to_string(),
            content: content.into(),
        });
    }

    pub fn error(&self, subject: &str, message: impl Into<String>) {
        self.emit(EventKind::Error {
            subject: subject.to_string(),
            message: message.into(),
            fatal: false,
        });
    }

    pub fn fatal(&self, subject: &str, message: impl Into<String>) {
        self.emit(EventKind::Error {
            subject: subject.to_string(),
            message: message.into(),
            fatal: true,
        });
    }

    pub fn final_report(&self, content: impl Into<String>) {
        self.emit(EventKind::FinalReport {
            content: content.into(),
        });
    }
}
