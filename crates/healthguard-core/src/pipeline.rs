//! End-to-end research run: route, refine, dispatch, synthesize, persist.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::HealthGuardError;
use crate::audit::{AuditLog, RunLogInput};
use crate::config::Config;
use crate::dispatcher::{
    DEFAULT_SPECIALIST_TIMEOUT, DispatchPlan, ParallelDispatcher, PlannedSpecialist,
    SpecialistReport,
};
use crate::events::{COORDINATOR, EventSender, SYSTEM};
use crate::llm::{AnthropicModel, LanguageModelGateway};
use crate::publisher::{DEFAULT_KEEPALIVE, PhaseTracker, PipelinePhase, ResearchStream};
use crate::refiner::PromptRefiner;
use crate::registry::SpecialistRegistry;
use crate::reports::{ReportArtifact, ReportStore};
use crate::router::TaskRouter;
use crate::specialist::{Specialist, specialist_for};
use crate::synthesizer::Synthesizer;

/// Result of one successful run.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub run_id: Uuid,
    pub query: String,
    pub refined_prompt: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub specialists: Vec<SpecialistReport>,
    pub report_path: Option<PathBuf>,
}

/// A run executing in the background.
pub struct ResearchRun {
    pub run_id: Uuid,
    pub stream: ResearchStream,
    pub phases: PhaseTracker,
    pub outcome: JoinHandle<Result<FinalReport, HealthGuardError>>,
}

pub struct ResearchPipeline {
    registry: Arc<SpecialistRegistry>,
    router: TaskRouter,
    refiner: PromptRefiner,
    synthesizer: Synthesizer,
    dispatcher: ParallelDispatcher,
    specialists: HashMap<String, Arc<dyn Specialist>>,
    reports: Option<ReportStore>,
    audit: Option<AuditLog>,
    keepalive: Duration,
}

impl ResearchPipeline {
    pub fn builder(
        registry: Arc<SpecialistRegistry>,
        gateway: Arc<LanguageModelGateway>,
    ) -> ResearchPipelineBuilder {
        ResearchPipelineBuilder::new(registry, gateway)
    }

    /// Wire the production pipeline from configuration. Requires the language
    /// model secret to be present in the environment.
    pub fn from_config(config: &Config) -> Result<Self, HealthGuardError> {
        let registry = Arc::new(config.registry()?);
        let model = AnthropicModel::from_config(&config.llm)?;
        let gateway = Arc::new(LanguageModelGateway::new(
            Arc::new(model),
            config.llm.gateway_policy(),
        ));

        let mut builder = Self::builder(registry, gateway)
            .specialist_timeout(config.dispatch.specialist_timeout())
            .keepalive(config.stream.keepalive());
        if let Some(store) = config.report_store() {
            builder = builder.reports(store);
        }
        if let Some(log) = config.audit_log() {
            builder = builder.audit(log);
        }
        builder.build()
    }

    pub fn registry(&self) -> &Arc<SpecialistRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Start a run in the background and hand back its event stream.
    ///
    /// The run keeps going if the stream is dropped; its result stays available
    /// through `outcome`.
    pub fn spawn(self: &Arc<Self>, query: impl Into<String>) -> ResearchRun {
        let run_id = Uuid::new_v4();
        let query = query.into();
        let (events, receiver) = EventSender::channel();
        let phases = PhaseTracker::new();
        let stream = ResearchStream::new(receiver, self.keepalive);

        let pipeline = Arc::clone(self);
        let tracker = phases.clone();
        let span = info_span!("research_run", %run_id);
        let outcome = tokio::spawn(
            async move { pipeline.execute(run_id, &query, &events, &tracker).await }
                .instrument(span),
        );

        ResearchRun {
            run_id,
            stream,
            phases,
            outcome,
        }
    }

    /// Run to completion, converting any failure into the one fatal event.
    pub async fn execute(
        &self,
        run_id: Uuid,
        query: &str,
        events: &EventSender,
        phases: &PhaseTracker,
    ) -> Result<FinalReport, HealthGuardError> {
        events.phase(SYSTEM, format!("Run started: {run_id}"));
        match self.run(run_id, query, events, phases).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(%run_id, error = %err, "research run failed");
                if let Err(phase_err) = phases.advance(PipelinePhase::Failed {
                    reason: err.to_string(),
                }) {
                    warn!(%run_id, error = %phase_err, "could not record failed phase");
                }
                events.fatal(SYSTEM, format!("System error: {err}"));
                Err(err)
            }
        }
    }

    #[instrument(name = "pipeline.run", skip(self, events, phases))]
    pub async fn run(
        &self,
        run_id: Uuid,
        query: &str,
        events: &EventSender,
        phases: &PhaseTracker,
    ) -> Result<FinalReport, HealthGuardError> {
        phases.advance(PipelinePhase::Routing)?;
        let names = self.router.select(query);
        let plan_entries = self.plan_entries(&names)?;
        info!(specialists = ?names, "specialists selected");
        events.phase(
            COORDINATOR,
            format!("Selected specialists: {}", names.join(", ")),
        );

        phases.advance(PipelinePhase::Refining)?;
        events.phase(COORDINATOR, "Creating specialized research prompt...");
        let descriptors: Vec<_> = plan_entries
            .iter()
            .map(|entry| Arc::clone(&entry.descriptor))
            .collect();
        let refined_prompt = self.refiner.refine(query, &descriptors).await?;
        events.agent_message(COORDINATOR, format!("Research prompt: {refined_prompt}"));

        phases.advance(PipelinePhase::Dispatching {
            specialists: names.clone(),
        })?;
        let plan = DispatchPlan {
            query: query.to_string(),
            refined_prompt,
            specialists: plan_entries,
        };
        let results = self.dispatcher.run(&plan, events).await;

        phases.advance(PipelinePhase::Synthesizing)?;
        events.phase(COORDINATOR, "Synthesizing results from all agents...");
        let content = self.synthesizer.synthesize(query, &results).await?;

        phases.advance(PipelinePhase::Completed)?;
        events.final_report(content.clone());

        let mut report = FinalReport {
            run_id,
            query: plan.query,
            refined_prompt: plan.refined_prompt,
            content,
            created_at: Utc::now(),
            specialists: results.into_reports(),
            report_path: None,
        };
        self.persist(&mut report).await;
        info!(
            succeeded = report
                .specialists
                .iter()
                .filter(|s| s.outcome.is_success())
                .count(),
            total = report.specialists.len(),
            "research run completed"
        );
        Ok(report)
    }

    fn plan_entries(&self, names: &[String]) -> Result<Vec<PlannedSpecialist>, HealthGuardError> {
        names
            .iter()
            .map(|name| {
                let descriptor = self.registry.get(name).ok_or_else(|| {
                    HealthGuardError::registry(format!(
                        "router selected unknown specialist `{name}`"
                    ))
                })?;
                let specialist = self.specialists.get(name).ok_or_else(|| {
                    HealthGuardError::registry(format!("no capability bound to `{name}`"))
                })?;
                Ok(PlannedSpecialist {
                    descriptor: Arc::clone(descriptor),
                    specialist: Arc::clone(specialist),
                })
            })
            .collect()
    }

    /// Best effort; persistence problems never fail a completed run. The file
    /// writes run on the blocking pool.
    async fn persist(&self, report: &mut FinalReport) {
        if self.reports.is_none() && self.audit.is_none() {
            return;
        }
        let reports = self.reports.clone();
        let audit = self.audit.clone();
        let run_id = report.run_id.to_string();
        let query = report.query.clone();
        let refined_prompt = report.refined_prompt.clone();
        let content = report.content.clone();
        let created_at = report.created_at;
        let specialists: Vec<(String, bool)> = report
            .specialists
            .iter()
            .map(|s| (s.name.clone(), s.outcome.is_success()))
            .collect();

        let written = tokio::task::spawn_blocking(move || {
            let report_path = reports.and_then(|store| {
                let artifact = ReportArtifact {
                    run_id: &run_id,
                    query: &query,
                    refined_prompt: &refined_prompt,
                    content: &content,
                    created_at,
                };
                match store.persist(&artifact) {
                    Ok(path) => {
                        info!(path = %path.display(), "report saved");
                        Some(path)
                    }
                    Err(err) => {
                        warn!(error = %err, "unable to save report");
                        None
                    }
                }
            });

            if let Some(log) = audit {
                let input = RunLogInput {
                    run_id,
                    query,
                    refined_prompt,
                    specialists,
                    report_chars: content.chars().count(),
                    report_path: report_path.as_ref().map(|p| p.display().to_string()),
                };
                if let Err(err) = log.log_run(input) {
                    warn!(error = %err, "unable to append run log");
                }
            }
            report_path
        })
        .await;

        match written {
            Ok(path) => report.report_path = path,
            Err(err) => warn!(error = %err, "persistence task aborted"),
        }
    }
}

pub struct ResearchPipelineBuilder {
    registry: Arc<SpecialistRegistry>,
    gateway: Arc<LanguageModelGateway>,
    overrides: HashMap<String, Arc<dyn Specialist>>,
    http_client: Option<reqwest::Client>,
    specialist_timeout: Duration,
    keepalive: Duration,
    reports: Option<ReportStore>,
    audit: Option<AuditLog>,
}

impl ResearchPipelineBuilder {
    pub fn new(registry: Arc<SpecialistRegistry>, gateway: Arc<LanguageModelGateway>) -> Self {
        Self {
            registry,
            gateway,
            overrides: HashMap::new(),
            http_client: None,
            specialist_timeout: DEFAULT_SPECIALIST_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
            reports: None,
            audit: None,
        }
    }

    /// Bind `name` to a custom capability instead of the transport its
    /// descriptor implies.
    pub fn specialist(
        mut self,
        name: impl Into<String>,
        specialist: Arc<dyn Specialist>,
    ) -> Self {
        self.overrides.insert(name.into(), specialist);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn specialist_timeout(mut self, timeout: Duration) -> Self {
        self.specialist_timeout = timeout;
        self
    }

    pub fn keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn reports(mut self, store: ReportStore) -> Self {
        self.reports = Some(store);
        self
    }

    pub fn audit(mut self, log: AuditLog) -> Self {
        self.audit = Some(log);
        self
    }

    pub fn build(mut self) -> Result<ResearchPipeline, HealthGuardError> {
        if let Some(unknown) = self
            .overrides
            .keys()
            .find(|name| self.registry.get(name).is_none())
        {
            return Err(HealthGuardError::registry(format!(
                "override for unknown specialist `{unknown}`"
            )));
        }
        if let Some((key, specialist)) = self
            .overrides
            .iter()
            .find(|(key, specialist)| specialist.name() != key.as_str())
        {
            return Err(HealthGuardError::registry(format!(
                "override bound to `{key}` identifies itself as `{}`",
                specialist.name()
            )));
        }

        let client = self.http_client.take().unwrap_or_default();
        let specialists = self
            .registry
            .iter()
            .map(|descriptor| {
                let specialist = self.overrides.remove(&descriptor.name).unwrap_or_else(|| {
                    specialist_for(
                        Arc::clone(descriptor),
                        Arc::clone(&self.gateway),
                        client.clone(),
                    )
                });
                (descriptor.name.clone(), specialist)
            })
            .collect();

        Ok(ResearchPipeline {
            router: TaskRouter::new(Arc::clone(&self.registry)),
            refiner: PromptRefiner::new(Arc::clone(&self.gateway)),
            synthesizer: Synthesizer::new(Arc::clone(&self.gateway)),
            dispatcher: ParallelDispatcher::new(self.specialist_timeout),
            registry: self.registry,
            specialists,
            reports: self.reports,
            audit: self.audit,
            keepalive: self.keepalive,
        })
    }
}
