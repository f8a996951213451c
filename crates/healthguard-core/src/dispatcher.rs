//! Concurrent fan-out of one refined prompt to the selected specialists.
//!
//! Every specialist runs in its own task with its own timeout, so a slow, failing
//! or panicking specialist only affects its own outcome. The dispatcher resolves
//! once every task has resolved and returns exactly one report per planned
//! specialist, in plan order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::SpecialistError;
use crate::events::EventSender;
use crate::metrics;
use crate::registry::SpecialistDescriptor;
use crate::specialist::{Specialist, SpecialistSink};

pub const DEFAULT_SPECIALIST_TIMEOUT: Duration = Duration::from_secs(300);

/// A selected specialist together with the capability that answers for it.
#[derive(Clone)]
pub struct PlannedSpecialist {
    pub descriptor: Arc<SpecialistDescriptor>,
    pub specialist: Arc<dyn Specialist>,
}

/// Per-request work order for the dispatcher.
#[derive(Clone)]
pub struct DispatchPlan {
    pub query: String,
    pub refined_prompt: String,
    pub specialists: Vec<PlannedSpecialist>,
}

impl DispatchPlan {
    pub fn names(&self) -> Vec<&str> {
        self.specialists
            .iter()
            .map(|entry| entry.descriptor.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpecialistOutcome {
    Success {
        text: String,
        tool_invocation_count: usize,
        tool_names: Vec<String>,
    },
    Failure {
        error: String,
    },
}

impl SpecialistOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Success { text, .. } => Some(text),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecialistReport {
    pub name: String,
    pub description: String,
    pub outcome: SpecialistOutcome,
    pub duration_ms: u64,
}

/// Outcomes of one dispatch, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DispatchResults {
    reports: Vec<SpecialistReport>,
}

impl DispatchResults {
    pub fn get(&self, name: &str) -> Option<&SpecialistReport> {
        self.reports.iter().find(|report| report.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpecialistReport> {
        self.reports.iter()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.is_success())
            .count()
    }

    pub fn into_reports(self) -> Vec<SpecialistReport> {
        self.reports
    }
}

impl From<Vec<SpecialistReport>> for DispatchResults {
    fn from(reports: Vec<SpecialistReport>) -> Self {
        Self { reports }
    }
}

#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    timeout: Duration,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SPECIALIST_TIMEOUT)
    }
}

impl ParallelDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip_all, fields(specialists = plan.len()))]
    pub async fn run(&self, plan: &DispatchPlan, events: &EventSender) -> DispatchResults {
        for entry in &plan.specialists {
            let name = &entry.descriptor.name;
            events.phase(name, format!("{name} starting research..."));
        }

        let started = Instant::now();
        let prompt: Arc<str> = Arc::from(plan.refined_prompt.as_str());
        let handles: Vec<_> = plan
            .specialists
            .iter()
            .map(|entry| {
                let name = entry.descriptor.name.clone();
                let specialist = Arc::clone(&entry.specialist);
                let events = events.clone();
                let prompt = Arc::clone(&prompt);
                let timeout = self.timeout;
                tokio::spawn(async move {
                    run_one(name, specialist, prompt, events, timeout).await
                })
            })
            .collect();

        let joined = join_all(handles).await;

        let reports = plan
            .specialists
            .iter()
            .zip(joined)
            .map(|(entry, joined)| {
                let name = entry.descriptor.name.clone();
                let (outcome, duration_ms) = match joined {
                    Ok(finished) => finished,
                    Err(join_err) => {
                        let reason = panic_reason(join_err);
                        let err = SpecialistError::Panicked {
                            name: name.clone(),
                            reason,
                        };
                        warn!(specialist = %name, error = %err, "specialist task aborted");
                        events.error(&name, err.to_string());
                        let elapsed = started.elapsed().as_millis() as u64;
                        metrics::record_specialist(&name, false, elapsed);
                        (
                            SpecialistOutcome::Failure {
                                error: err.to_string(),
                            },
                            elapsed,
                        )
                    }
                };
                SpecialistReport {
                    name,
                    description: entry.descriptor.description.clone(),
                    outcome,
                    duration_ms,
                }
            })
            .collect::<Vec<_>>();

        let results = DispatchResults { reports };
        info!(
            total = results.len(),
            succeeded = results.success_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch complete"
        );
        results
    }
}

async fn run_one(
    name: String,
    specialist: Arc<dyn Specialist>,
    prompt: Arc<str>,
    events: EventSender,
    timeout: Duration,
) -> (SpecialistOutcome, u64) {
    let started = Instant::now();
    let mut sink = SpecialistSink::new(name.clone(), events.clone());

    let result = match tokio::time::timeout(timeout, specialist.invoke(&prompt, &mut sink)).await
    {
        Ok(result) => result,
        Err(_) => Err(SpecialistError::Timeout {
            name: name.clone(),
            after: timeout,
        }),
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    let tool_names = sink.into_tool_names();

    let outcome = match result {
        Ok(text) => {
            events.agent_message(&name, text.clone());
            events.phase(&name, format!("{name} completed research"));
            info!(
                specialist = %name,
                duration_ms,
                tools = tool_names.len(),
                "specialist completed"
            );
            SpecialistOutcome::Success {
                text,
                tool_invocation_count: tool_names.len(),
                tool_names,
            }
        }
        Err(err) => {
            warn!(specialist = %name, duration_ms, error = %err, "specialist failed");
            events.error(&name, err.to_string());
            SpecialistOutcome::Failure {
                error: err.to_string(),
            }
        }
    };
    metrics::record_specialist(&name, outcome.is_success(), duration_ms);
    (outcome, duration_ms)
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, ProgressEvent};
    use async_trait::async_trait;
    use serde_json::json;

    enum Behaviour {
        Answer(&'static str),
        Fail(&'static str),
        Hang,
        Panic,
    }

    struct Fake {
        name: String,
        delay: Duration,
        tools: Vec<&'static str>,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Specialist for Fake {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(
            &self,
            _prompt: &str,
            sink: &mut SpecialistSink,
        ) -> Result<String, SpecialistError> {
            for tool in &self.tools {
                sink.tool_call(*tool, json!({}));
                sink.tool_response(format!("{tool} ok"));
            }
            tokio::time::sleep(self.delay).await;
            match self.behaviour {
                Behaviour::Answer(text) => Ok(text.to_string()),
                Behaviour::Fail(reason) => Err(SpecialistError::Transport {
                    name: self.name.clone(),
                    reason: reason.to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("never".into())
                }
                Behaviour::Panic => panic!("specialist exploded"),
            }
        }
    }

    fn planned(
        name: &str,
        delay_ms: u64,
        tools: Vec<&'static str>,
        behaviour: Behaviour,
    ) -> PlannedSpecialist {
        PlannedSpecialist {
            descriptor: Arc::new(SpecialistDescriptor::new(name, format!("{name} desc"), "i")),
            specialist: Arc::new(Fake {
                name: name.to_string(),
                delay: Duration::from_millis(delay_ms),
                tools,
                behaviour,
            }),
        }
    }

    fn plan(specialists: Vec<PlannedSpecialist>) -> DispatchPlan {
        DispatchPlan {
            query: "q".into(),
            refined_prompt: "refined".into(),
            specialists,
        }
    }

    fn drain(
        mut receiver: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
    ) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn one_failure_leaves_the_others_intact() {
        let plan = plan(vec![
            planned("A", 30, vec!["t1"], Behaviour::Answer("alpha")),
            planned("B", 5, vec![], Behaviour::Fail("refused")),
            planned("C", 10, vec!["t2", "t3"], Behaviour::Answer("gamma")),
        ]);
        let (events, receiver) = EventSender::channel();
        let results = ParallelDispatcher::new(Duration::from_secs(5))
            .run(&plan, &events)
            .await;

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(results.success_count(), 2);
        assert_eq!(results.get("A").unwrap().outcome.text(), Some("alpha"));
        assert_eq!(
            results.get("B").unwrap().outcome.error(),
            Some("Connection error to B: refused")
        );
        match &results.get("C").unwrap().outcome {
            SpecialistOutcome::Success {
                tool_invocation_count,
                tool_names,
                ..
            } => {
                assert_eq!(*tool_invocation_count, 2);
                assert_eq!(tool_names, &["t2", "t3"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let events = drain(receiver);
        let starts: Vec<_> = events[..3].iter().map(|e| e.subject().to_string()).collect();
        assert_eq!(starts, vec!["A", "B", "C"]);
        assert!(events[..3].iter().all(|e| e.type_name() == "phase_update"));
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Error { fatal: false, .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].subject(), "B");
    }

    #[tokio::test]
    async fn timeout_cancels_only_the_slow_specialist() {
        let plan = plan(vec![
            planned("Slow", 0, vec![], Behaviour::Hang),
            planned("Fast", 5, vec![], Behaviour::Answer("done")),
        ]);
        let (events, _receiver) = EventSender::channel();
        let started = Instant::now();
        let results = ParallelDispatcher::new(Duration::from_millis(100))
            .run(&plan, &events)
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(results.get("Slow").unwrap().outcome.error().unwrap().contains("timed out"));
        assert!(results.get("Fast").unwrap().outcome.is_success());
    }

    #[tokio::test]
    async fn panicking_specialist_becomes_a_failure() {
        let plan = plan(vec![
            planned("Boom", 0, vec![], Behaviour::Panic),
            planned("Calm", 0, vec![], Behaviour::Answer("fine")),
        ]);
        let (events, receiver) = EventSender::channel();
        let results = ParallelDispatcher::default().run(&plan, &events).await;

        assert_eq!(results.len(), 2);
        let error = results.get("Boom").unwrap().outcome.error().unwrap().to_string();
        assert!(error.contains("specialist exploded"), "{error}");
        assert!(results.get("Calm").unwrap().outcome.is_success());
        assert!(drain(receiver)
            .iter()
            .any(|e| e.subject() == "Boom" && e.type_name() == "error"));
    }

    #[tokio::test]
    async fn all_failures_still_return_every_outcome() {
        let plan = plan(vec![
            planned("A", 0, vec![], Behaviour::Fail("down")),
            planned("B", 0, vec![], Behaviour::Fail("down")),
            planned("C", 0, vec![], Behaviour::Fail("down")),
        ]);
        let (events, _receiver) = EventSender::channel();
        let results = ParallelDispatcher::default().run(&plan, &events).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.success_count(), 0);
    }

    #[tokio::test]
    async fn success_emits_final_text_then_completion() {
        let plan = plan(vec![planned(
            "Solo",
            0,
            vec!["lookup"],
            Behaviour::Answer("answer"),
        )]);
        let (events, receiver) = EventSender::channel();
        ParallelDispatcher::default().run(&plan, &events).await;

        let kinds: Vec<_> = drain(receiver).into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds.len(), 5);
        assert!(matches!(
            &kinds[0],
            EventKind::PhaseUpdate { message, .. } if message == "Solo starting research..."
        ));
        assert!(matches!(kinds[1], EventKind::ToolCall { .. }));
        assert!(matches!(kinds[2], EventKind::ToolResponse { .. }));
        assert!(matches!(
            &kinds[3],
            EventKind::AgentMessage { content, .. } if content == "answer"
        ));
        assert!(matches!(
            &kinds[4],
            EventKind::PhaseUpdate { message, .. } if message == "Solo completed research"
        ));
    }
}
