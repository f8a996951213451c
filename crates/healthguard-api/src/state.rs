use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use healthguard_core::{FinalReport, PhaseTracker, PipelinePhase, ResearchPipeline, ResearchStream};
use serde::Serialize;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ResearchPipeline>,
    runs: Arc<DashMap<Uuid, RunRecord>>,
    permits: Arc<Semaphore>,
    finished: Arc<Mutex<VecDeque<Uuid>>>,
    max_concurrent_runs: usize,
    max_retained_runs: usize,
}

const DEFAULT_MAX_RETAINED_RUNS: usize = 200;

impl AppState {
    pub fn new(pipeline: Arc<ResearchPipeline>, max_concurrent_runs: usize) -> Self {
        let max_concurrent_runs = max_concurrent_runs.max(1);
        Self {
            pipeline,
            runs: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_runs)),
            finished: Arc::new(Mutex::new(VecDeque::new())),
            max_concurrent_runs,
            max_retained_runs: DEFAULT_MAX_RETAINED_RUNS,
        }
    }

    /// Cap on finished runs kept for status lookups. Running runs never count.
    pub fn with_max_retained_runs(mut self, max_retained_runs: usize) -> Self {
        self.max_retained_runs = max_retained_runs.max(1);
        self
    }

    pub fn pipeline(&self) -> &Arc<ResearchPipeline> {
        &self.pipeline
    }

    /// Start a run if a slot is free. The slot is held until the run finishes,
    /// whether or not anyone is still reading its stream.
    pub fn start_run(&self, query: String) -> Result<(Uuid, ResearchStream), AppError> {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                return Err(AppError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "run capacity reached; retry once a slot frees up",
                ));
            }
            Err(TryAcquireError::Closed) => {
                return Err(AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "research executor unavailable",
                ));
            }
        };

        let run = self.pipeline.spawn(query.clone());
        let run_id = run.run_id;
        self.runs.insert(
            run_id,
            RunRecord::Running {
                query: query.clone(),
                started_at: Utc::now(),
                phases: run.phases.clone(),
            },
        );

        let runs = Arc::clone(&self.runs);
        let finished = Arc::clone(&self.finished);
        let max_retained_runs = self.max_retained_runs;
        let outcome = run.outcome;
        tokio::spawn(async move {
            let record = match outcome.await {
                Ok(Ok(report)) => {
                    info!(%run_id, "run completed");
                    RunRecord::Completed {
                        report: Box::new(report),
                    }
                }
                Ok(Err(err)) => RunRecord::Failed {
                    query,
                    error: err.to_string(),
                },
                Err(join_err) => {
                    error!(%run_id, error = %join_err, "run task aborted");
                    RunRecord::Failed {
                        query,
                        error: format!("run aborted: {join_err}"),
                    }
                }
            };
            runs.insert(run_id, record);
            retain_finished(&runs, &finished, run_id, max_retained_runs);
            drop(permit);
        });

        Ok((run_id, run.stream))
    }

    pub fn status(&self, run_id: &Uuid) -> Option<RunStatus> {
        self.runs.get(run_id).map(|record| match record.value() {
            RunRecord::Running {
                query,
                started_at,
                phases,
            } => RunStatus {
                run_id: *run_id,
                state: RunState::Running,
                query: query.clone(),
                started_at: Some(*started_at),
                phase: Some(phases.current()),
                report: None,
                error: None,
            },
            RunRecord::Completed { report } => RunStatus {
                run_id: *run_id,
                state: RunState::Completed,
                query: report.query.clone(),
                started_at: None,
                phase: Some(PipelinePhase::Completed),
                report: Some(report.as_ref().clone()),
                error: None,
            },
            RunRecord::Failed { query, error } => RunStatus {
                run_id: *run_id,
                state: RunState::Failed,
                query: query.clone(),
                started_at: None,
                phase: None,
                report: None,
                error: Some(error.clone()),
            },
        })
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        let available_permits = self.permits.available_permits();
        let running_runs = self
            .runs
            .iter()
            .filter(|entry| matches!(entry.value(), RunRecord::Running { .. }))
            .count();
        CapacitySnapshot {
            max_concurrent_runs: self.max_concurrent_runs,
            available_permits,
            running_runs,
            total_runs: self.runs.len(),
        }
    }
}

/// Remember `run_id` as finished and evict the oldest finished records past
/// the cap.
fn retain_finished(
    runs: &DashMap<Uuid, RunRecord>,
    finished: &Mutex<VecDeque<Uuid>>,
    run_id: Uuid,
    max_retained_runs: usize,
) {
    let mut finished = finished
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    finished.push_back(run_id);
    while finished.len() > max_retained_runs {
        if let Some(evicted) = finished.pop_front() {
            runs.remove(&evicted);
            debug!(run_id = %evicted, "finished run evicted");
        }
    }
}

enum RunRecord {
    Running {
        query: String,
        started_at: DateTime<Utc>,
        phases: PhaseTracker,
    },
    Completed {
        report: Box<FinalReport>,
    },
    Failed {
        query: String,
        error: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub state: RunState,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PipelinePhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<FinalReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CapacitySnapshot {
    pub max_concurrent_runs: usize,
    pub available_permits: usize,
    pub running_runs: usize,
    pub total_runs: usize,
}
