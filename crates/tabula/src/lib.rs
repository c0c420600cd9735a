//! Public facade for the tabula workspace.
//! Default path: use `Analyst` first. Use `tabula::runtime` for direct orchestrator control.

mod analyst;
mod policy;

pub use analyst::{
    export_outcome, quick_analyze, Analyst, AnalystConfig, AnalystError, DEFAULT_INSTRUCTIONS,
};
pub use policy::{ModelPolicy, ALT_MODEL_ENV, DEFAULT_MODEL, MODEL_ENV, VISUALIZATION_KEYWORDS};
pub use tabula_runtime::{
    ArtifactPurpose, ArtifactStore, ColumnCategory, ColumnProfile, CompletionDetector,
    ConfigError, Dataset, Deadline, DegradedResult, FallbackAnalyzer, FallbackError,
    InvocationOutcome, InvocationRequest, InvokeError, MarkerCompletionDetector, Orchestrator,
    OrchestratorConfig, OrchestratorMetricsSnapshot, OutcomeStatus, ReleaseIssue, RemoteError,
    RemoteFuture, RemoteServices, ResourceKind, StructuralAnalyzer, Turn, TurnMessage, TurnRole,
    TurnStream, TurnTransport, WorkerProvisioner, WorkerSpec, WorkerTool,
};

pub use tabula_runtime as runtime;
