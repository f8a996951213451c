//! HealthGuard core: parallel specialist research orchestration.
//!
//! One query is routed to the relevant specialists, refined once into a shared
//! research prompt, dispatched to every selected specialist concurrently, and
//! synthesized into a single report. Progress is published as typed events
//! while the run proceeds.

pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod refiner;
pub mod registry;
pub mod reports;
pub mod router;
pub mod security;
pub mod specialist;
pub mod synthesizer;
pub mod telemetry;

pub use audit::{AuditLog, RunLogInput};
pub use config::{Config, ConfigLoader};
pub use dispatcher::{
    DispatchPlan, DispatchResults, ParallelDispatcher, PlannedSpecialist, SpecialistOutcome,
    SpecialistReport,
};
pub use error::{GatewayError, HealthGuardError, ModelError, SpecialistError};
pub use events::{COORDINATOR, EventKind, EventSender, ProgressEvent, SYSTEM};
pub use llm::{
    AnthropicModel, ChatMessage, GatewayPolicy, LanguageModel, LanguageModelGateway, Role,
};
pub use pipeline::{FinalReport, ResearchPipeline, ResearchPipelineBuilder, ResearchRun};
pub use publisher::{PhaseTracker, PipelinePhase, ResearchStream, StreamItem};
pub use refiner::PromptRefiner;
pub use registry::{CompoundTrigger, SpecialistDescriptor, SpecialistRegistry};
pub use reports::ReportStore;
pub use router::TaskRouter;
pub use security::{SecretValue, require_env};
pub use specialist::{HttpSpecialist, ModelSpecialist, Specialist, SpecialistSink};
pub use synthesizer::Synthesizer;
pub use telemetry::{TelemetryOptions, init_telemetry};
