pub mod config;
pub mod deadline;
pub mod errors;
pub mod fallback;
pub(crate) mod metrics;
pub mod orchestrator;
pub mod outcome;
pub mod request;
pub mod scripted;
pub mod session;
pub mod turn_stream;

pub use config::{
    OrchestratorConfig, DEADLINE_SECS_ENV, DEFAULT_DEADLINE, DEFAULT_MAX_TURNS,
    DEFAULT_RELEASE_TIMEOUT, MAX_TURNS_ENV, RELEASE_TIMEOUT_MS_ENV,
};
pub use deadline::Deadline;
pub use errors::{ConfigError, DeadlineElapsed, FallbackError, InvokeError};
pub use fallback::{
    ColumnCategory, ColumnProfile, DegradedResult, FallbackAnalyzer, StructuralAnalyzer,
};
pub use metrics::OrchestratorMetricsSnapshot;
pub use orchestrator::Orchestrator;
pub use outcome::{InvocationOutcome, OutcomeStatus, ReleaseIssue};
pub use request::{Dataset, InvocationRequest};
pub use session::{HandleState, RemoteServices, ResourceKind, SessionHandle, SessionResources};
pub use tabula_contract::{
    ArtifactPurpose, ArtifactStore, BoxTurnStream, RemoteError, RemoteFuture, Turn, TurnMessage,
    TurnRole, TurnStream, TurnTransport, WorkerProvisioner, WorkerSpec, WorkerTool,
};
pub use turn_stream::{
    read_turns, CompletionCause, CompletionDetector, MarkerCompletionDetector, StopReason,
    TurnLimits, TurnLog, TurnStreamReader, DEFAULT_COMPLETION_MARKERS,
};
