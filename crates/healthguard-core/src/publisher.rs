//! Phase tracking and the keepalive-aware event stream handed to consumers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::HealthGuardError;
use crate::events::{EventKind, ProgressEvent, SYSTEM};

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_millis(500);

/// Lifecycle of one research run. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    Routing,
    Refining,
    Dispatching { specialists: Vec<String> },
    Synthesizing,
    Completed,
    Failed { reason: String },
}

impl PipelinePhase {
    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Routing => 1,
            Self::Refining => 2,
            Self::Dispatching { .. } => 3,
            Self::Synthesizing => 4,
            Self::Completed | Self::Failed { .. } => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Routing => "routing",
            Self::Refining => "refining",
            Self::Dispatching { .. } => "dispatching",
            Self::Synthesizing => "synthesizing",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared, observable phase state for one run.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    sender: Arc<watch::Sender<PipelinePhase>>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PipelinePhase::Idle);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> PipelinePhase {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelinePhase> {
        self.sender.subscribe()
    }

    /// Move to `next`. Backward moves, repeats and moves out of a terminal
    /// phase are rejected.
    pub fn advance(&self, next: PipelinePhase) -> Result<(), HealthGuardError> {
        let mut rejected_from = None;
        let target = next.label();
        self.sender.send_if_modified(|current| {
            if current.is_terminal() || next.rank() <= current.rank() {
                rejected_from = Some(current.label());
                false
            } else {
                *current = next;
                true
            }
        });
        match rejected_from {
            Some(from) => Err(HealthGuardError::Phase {
                from: from.to_string(),
                to: target.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// What a consumer receives from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(ProgressEvent),
    /// Nothing happened within the keepalive interval; not a progress event.
    KeepAlive,
}

/// Single-consumer view over a run's events, terminated by exactly one
/// terminal event.
pub struct ResearchStream {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    keepalive: Duration,
    finished: bool,
}

impl ResearchStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<ProgressEvent>, keepalive: Duration) -> Self {
        Self {
            receiver,
            keepalive,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait up to the keepalive interval for the next event.
    ///
    /// Returns `None` once the terminal event has been handed out. A producer
    /// that goes away without a terminal event yields one synthesized fatal
    /// error instead.
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }

        match tokio::time::timeout(self.keepalive, self.receiver.recv()).await {
            Err(_) => Some(StreamItem::KeepAlive),
            Ok(Some(event)) => {
                if event.is_terminal() {
                    self.finish();
                }
                Some(StreamItem::Event(event))
            }
            Ok(None) => {
                self.finish();
                Some(StreamItem::Event(ProgressEvent::new(EventKind::Error {
                    subject: SYSTEM.to_string(),
                    message: "research pipeline stopped without producing a report".to_string(),
                    fatal: true,
                })))
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamItem> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_item().await.map(|item| (item, stream))
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSender;
    use futures::StreamExt;

    #[test]
    fn phases_only_move_forward() {
        let tracker = PhaseTracker::new();
        let observer = tracker.subscribe();
        tracker.advance(PipelinePhase::Routing).unwrap();
        tracker.advance(PipelinePhase::Refining).unwrap();
        tracker
            .advance(PipelinePhase::Dispatching {
                specialists: vec!["EPHT_Agent".into()],
            })
            .unwrap();

        match tracker.advance(PipelinePhase::Refining).unwrap_err() {
            HealthGuardError::Phase { from, to } => {
                assert_eq!(from, "dispatching");
                assert_eq!(to, "refining");
            }
            other => panic!("unexpected error {other}"),
        }

        tracker.advance(PipelinePhase::Synthesizing).unwrap();
        tracker.advance(PipelinePhase::Completed).unwrap();
        assert!(
            tracker
                .advance(PipelinePhase::Failed {
                    reason: "late".into()
                })
                .is_err()
        );
        assert_eq!(*observer.borrow(), PipelinePhase::Completed);
    }

    #[test]
    fn failure_is_reachable_from_any_open_phase() {
        let tracker = PhaseTracker::new();
        tracker.advance(PipelinePhase::Routing).unwrap();
        tracker
            .advance(PipelinePhase::Failed {
                reason: "refiner down".into(),
            })
            .unwrap();
        assert!(tracker.current().is_terminal());
    }

    #[tokio::test]
    async fn keepalive_is_emitted_while_the_producer_is_quiet() {
        let (events, receiver) = EventSender::channel();
        let mut stream = ResearchStream::new(receiver, Duration::from_millis(20));

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            events.phase("coordinator", "still working");
            events.final_report("done");
        });

        let mut items = Vec::new();
        while let Some(item) = stream.next_item().await {
            items.push(item);
        }
        producer.await.unwrap();

        let first_event = items
            .iter()
            .position(|item| matches!(item, StreamItem::Event(_)))
            .unwrap();
        assert!(first_event >= 1);
        assert!(
            items[..first_event]
                .iter()
                .all(|item| *item == StreamItem::KeepAlive)
        );
        assert!(matches!(
            items.last(),
            Some(StreamItem::Event(e)) if e.type_name() == "final_report"
        ));
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_the_terminal_event() {
        let (events, receiver) = EventSender::channel();
        events.phase("coordinator", "one");
        events.fatal(SYSTEM, "System error: refiner unavailable");
        events.phase("coordinator", "too late");
        events.final_report("too late");

        let stream = ResearchStream::new(receiver, Duration::from_millis(20));
        let items: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        let terminal: Vec<_> = items
            .iter()
            .filter(|item| matches!(item, StreamItem::Event(e) if e.is_terminal()))
            .collect();
        assert_eq!(terminal.len(), 1);
    }

    #[tokio::test]
    async fn vanished_producer_yields_one_fatal_error() {
        let (events, receiver) = EventSender::channel();
        events.phase("coordinator", "starting");
        drop(events);

        let mut stream = ResearchStream::new(receiver, Duration::from_millis(20));
        assert!(matches!(stream.next_item().await, Some(StreamItem::Event(_))));
        match stream.next_item().await {
            Some(StreamItem::Event(event)) => {
                assert!(matches!(event.kind, EventKind::Error { fatal: true, .. }));
            }
            other => panic!("unexpected item {other:?}"),
        }
        assert!(stream.next_item().await.is_none());
        assert!(stream.is_finished());
    }
}
