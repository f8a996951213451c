use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Specialist, SpecialistSink};
use crate::error::SpecialistError;
use crate::registry::SpecialistDescriptor;

const NO_RESULTS: &str = "No results";
const FRAME_TYPES: [&str; 3] = ["tool_call", "tool_response", "message"];
/// Longest frame line accepted before the body is rejected as malformed.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Specialist served by a remote research endpoint.
///
/// The request is `{"message", "system"}`; the response body is read line by
/// line as it arrives. Typed JSON frames become tool or message events, any
/// other non-empty line is treated as message text. The last message is the
/// final answer.
pub struct HttpSpecialist {
    descriptor: Arc<SpecialistDescriptor>,
    endpoint: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ResearchRequest<'a> {
    message: &'a str,
    system: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    ToolCall {
        tool: String,
        #[serde(default)]
        args: Value,
    },
    ToolResponse {
        #[serde(default)]
        content: Value,
    },
    Message {
        content: Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Frame {
    ToolCall { tool: String, args: Value },
    ToolResponse(String),
    Message(String),
}

impl HttpSpecialist {
    pub fn new(
        descriptor: Arc<SpecialistDescriptor>,
        endpoint: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            descriptor,
            endpoint: endpoint.into(),
            client,
        }
    }

    fn transport(&self, err: reqwest::Error) -> SpecialistError {
        SpecialistError::Transport {
            name: self.descriptor.name.clone(),
            reason: err.to_string(),
        }
    }

    fn handle_line(
        &self,
        raw: &[u8],
        sink: &mut SpecialistSink,
        latest: &mut Option<String>,
    ) -> Result<(), SpecialistError> {
        let line = String::from_utf8_lossy(raw);
        match parse_line(&self.descriptor.name, &line)? {
            None => {}
            Some(Frame::ToolCall { tool, args }) => sink.tool_call(tool, args),
            Some(Frame::ToolResponse(content)) => sink.tool_response(content),
            Some(Frame::Message(text)) => {
                if let Some(previous) = latest.replace(text) {
                    sink.message(previous);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Specialist for HttpSpecialist {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn invoke(
        &self,
        prompt: &str,
        sink: &mut SpecialistSink,
    ) -> Result<String, SpecialistError> {
        debug!(
            specialist = %self.descriptor.name,
            endpoint = %self.endpoint,
            "posting research request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ResearchRequest {
                message: prompt,
                system: &self.descriptor.instructions,
            })
            .send()
            .await
            .map_err(|err| self.transport(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpecialistError::Http {
                name: self.descriptor.name.clone(),
                status: status.as_u16(),
            });
        }

        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut latest: Option<String> = None;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| self.transport(err))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                self.handle_line(&line, sink, &mut latest)?;
            }
            if buffer.len() > MAX_LINE_BYTES {
                return Err(SpecialistError::Malformed {
                    name: self.descriptor.name.clone(),
                    reason: format!("frame line exceeds {MAX_LINE_BYTES} bytes"),
                });
            }
        }
        if !buffer.is_empty() {
            self.handle_line(&buffer, sink, &mut latest)?;
        }

        Ok(latest.unwrap_or_else(|| NO_RESULTS.to_string()))
    }
}

fn parse_line(name: &str, line: &str) -> Result<Option<Frame>, SpecialistError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Ok(Some(Frame::Message(line.to_string())));
    };
    let typed = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| FRAME_TYPES.contains(&kind));
    if !typed {
        return Ok(Some(Frame::Message(line.to_string())));
    }

    let frame: WireFrame =
        serde_json::from_value(value).map_err(|err| SpecialistError::Malformed {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
    Ok(Some(match frame {
        WireFrame::ToolCall { tool, args } => Frame::ToolCall { tool, args },
        WireFrame::ToolResponse { content } => Frame::ToolResponse(text_of(content)),
        WireFrame::Message { content } => Frame::Message(text_of(content)),
    }))
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventSender};
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    #[test]
    fn typed_frames_and_plain_lines_are_classified() {
        assert_eq!(parse_line("A", "   ").unwrap(), None);
        assert_eq!(
            parse_line(
                "A",
                r#"{"type":"tool_call","tool":"get_air_quality","args":{"state":"CA"}}"#
            )
            .unwrap(),
            Some(Frame::ToolCall {
                tool: "get_air_quality".into(),
                args: json!({"state": "CA"})
            })
        );
        assert_eq!(
            parse_line("A", r#"{"type":"tool_response","content":{"rows":3}}"#).unwrap(),
            Some(Frame::ToolResponse(r#"{"rows":3}"#.into()))
        );
        assert_eq!(
            parse_line("A", "PM2.5 levels rose 12%").unwrap(),
            Some(Frame::Message("PM2.5 levels rose 12%".into()))
        );
        assert_eq!(
            parse_line("A", r#"{"status":"ok"}"#).unwrap(),
            Some(Frame::Message(r#"{"status":"ok"}"#.into()))
        );
    }

    #[test]
    fn typed_frame_missing_fields_is_malformed() {
        let err = parse_line("EPHT_Agent", r#"{"type":"tool_call"}"#).unwrap_err();
        assert!(matches!(
            err,
            SpecialistError::Malformed { ref name, .. } if name == "EPHT_Agent"
        ));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/research")
    }

    fn descriptor() -> Arc<SpecialistDescriptor> {
        Arc::new(SpecialistDescriptor::new(
            "EPHT_Agent",
            "Environmental health",
            "You track air quality.",
        ))
    }

    #[tokio::test]
    async fn streams_frames_and_returns_last_message() {
        let app = Router::new().route(
            "/research",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["system"], "You track air quality.");
                let call = json!({
                    "type": "tool_call",
                    "tool": "get_air_quality",
                    "args": {"state": "CA"},
                });
                let response = json!({"type": "tool_response", "content": "PM2.5 12.1"});
                let answer = json!({"type": "message", "content": "Air quality is moderate."});
                format!(
                    "{call}\n{response}\nchecking {}\n{answer}\n",
                    body["message"].as_str().unwrap_or_default(),
                )
            }),
        );
        let endpoint = serve(app).await;
        let specialist = HttpSpecialist::new(descriptor(), endpoint, Client::new());
        let (events, mut receiver) = EventSender::channel();
        let mut sink = SpecialistSink::new("EPHT_Agent", events);

        let answer = specialist.invoke("asthma in CA", &mut sink).await.unwrap();
        assert_eq!(answer, "Air quality is moderate.");
        assert_eq!(sink.tool_names(), ["get_air_quality"]);
        drop(sink);

        let mut kinds = Vec::new();
        while let Some(event) = receiver.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[0], EventKind::ToolCall { .. }));
        assert!(matches!(kinds[1], EventKind::ToolResponse { .. }));
        assert!(matches!(
            &kinds[2],
            EventKind::AgentMessage { content, .. } if content == "checking asthma in CA"
        ));
    }

    #[tokio::test]
    async fn endless_line_is_rejected_as_malformed() {
        let app = Router::new().route(
            "/research",
            post(|| async { "x".repeat(MAX_LINE_BYTES + 4096) }),
        );
        let endpoint = serve(app).await;
        let specialist = HttpSpecialist::new(descriptor(), endpoint, Client::new());
        let (events, _receiver) = EventSender::channel();
        let mut sink = SpecialistSink::new("EPHT_Agent", events);

        let err = specialist.invoke("q", &mut sink).await.unwrap_err();
        match err {
            SpecialistError::Malformed { name, reason } => {
                assert_eq!(name, "EPHT_Agent");
                assert!(reason.contains("exceeds"), "{reason}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn empty_body_yields_no_results() {
        let app = Router::new().route("/research", post(|| async { "" }));
        let endpoint = serve(app).await;
        let specialist = HttpSpecialist::new(descriptor(), endpoint, Client::new());
        let (events, _receiver) = EventSender::channel();
        let mut sink = SpecialistSink::new("EPHT_Agent", events);
        assert_eq!(specialist.invoke("q", &mut sink).await.unwrap(), "No results");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_code_and_name() {
        let app = Router::new().route(
            "/research",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let endpoint = serve(app).await;
        let specialist = HttpSpecialist::new(descriptor(), endpoint, Client::new());
        let (events, _receiver) = EventSender::channel();
        let mut sink = SpecialistSink::new("EPHT_Agent", events);
        let err = specialist.invoke("q", &mut sink).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 503 from EPHT_Agent");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let specialist = HttpSpecialist::new(
            descriptor(),
            format!("http://{addr}/research"),
            Client::new(),
        );
        let (events, _receiver) = EventSender::channel();
        let mut sink = SpecialistSink::new("EPHT_Agent", events);
        let err = specialist.invoke("q", &mut sink).await.unwrap_err();
        assert!(err.to_string().starts_with("Connection error to EPHT_Agent: "));
    }
}
