use serde_json::json;
use tabula_runtime::{
    ConfigError, Dataset, InvocationOutcome, InvocationRequest, InvokeError, Orchestrator,
    OrchestratorConfig, OrchestratorMetricsSnapshot, RemoteServices, WorkerSpec, WorkerTool,
};
use thiserror::Error;

use crate::policy::ModelPolicy;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a careful data analyst. \
Inspect the attached dataset before answering, state assumptions about column meaning, \
show the figures your answer depends on, and end your last message with the line \
'Analysis complete.'";

/// One explicit data model for analyst defaults: orchestration limits, model routing and the
/// worker definition.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalystConfig {
    pub orchestrator: OrchestratorConfig,
    pub models: ModelPolicy,
    pub instructions: String,
    pub tools: Vec<WorkerTool>,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            models: ModelPolicy::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            tools: vec![WorkerTool::CodeInterpreter],
        }
    }
}

impl AnalystConfig {
    /// Create config with defaults:
    /// - 5 minute deadline, 20 turn budget, default completion markers
    /// - default model, no alternate, code interpreter tool
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `TABULA_*` process env.
    /// Side effects: reads process env.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.orchestrator = self.orchestrator.overlay_env(&lookup)?;
        self.models = self.models.overlay_env(&lookup)?;
        Ok(self)
    }

    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_models(mut self, models: ModelPolicy) -> Self {
        self.models = models;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool(mut self, tool: WorkerTool) -> Self {
        if !self.tools.contains(&tool) {
            self.tools.push(tool);
        }
        self
    }

    /// Worker definition for one question, model chosen by the policy.
    pub fn worker_spec(&self, question: &str) -> WorkerSpec {
        let mut spec = WorkerSpec::new(self.models.select(question), self.instructions.clone());
        for tool in &self.tools {
            spec = spec.with_tool(*tool);
        }
        spec.metadata = json!({
            "visualization": self.models.is_visualization_request(question),
        });
        spec
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalystError {
    #[error("invalid analyst config: {0}")]
    Config(#[from] ConfigError),
    #[error("analysis could not start: {0}")]
    Invoke(#[from] InvokeError),
    #[error("failed to export outcome: {0}")]
    Export(String),
}

/// Reusable analyst handle:
/// - simple path: `analyze(question, dataset)`
/// - expert path: config mutation via `AnalystConfig`, raw requests via `orchestrator()`
#[derive(Clone)]
pub struct Analyst {
    orchestrator: Orchestrator,
    config: AnalystConfig,
}

impl Analyst {
    pub fn new(services: RemoteServices, config: AnalystConfig) -> Result<Self, AnalystError> {
        config.orchestrator.validate()?;
        let orchestrator = Orchestrator::new(services, config.orchestrator.clone());
        Ok(Self {
            orchestrator,
            config,
        })
    }

    pub fn with_defaults(services: RemoteServices) -> Self {
        Self {
            orchestrator: Orchestrator::new(services, OrchestratorConfig::default()),
            config: AnalystConfig::default(),
        }
    }

    pub fn request(
        &self,
        question: impl Into<String>,
        dataset: Option<Dataset>,
    ) -> InvocationRequest {
        let question = question.into();
        let worker = self.config.worker_spec(&question);
        InvocationRequest {
            question,
            dataset,
            worker,
        }
    }

    /// Analyze one dataset. Errors only when the remote session cannot be set up.
    pub async fn analyze(
        &self,
        question: impl Into<String>,
        dataset: Dataset,
    ) -> Result<InvocationOutcome, AnalystError> {
        self.run(self.request(question, Some(dataset))).await
    }

    /// Ask a question with no dataset attached.
    pub async fn ask(
        &self,
        question: impl Into<String>,
    ) -> Result<InvocationOutcome, AnalystError> {
        self.run(self.request(question, None)).await
    }

    pub async fn run(&self, request: InvocationRequest) -> Result<InvocationOutcome, AnalystError> {
        tracing::debug!(
            model = %request.worker.model,
            dataset = request.dataset.as_ref().map(|d| d.name.as_str()),
            "starting analysis"
        );
        Ok(self.orchestrator.invoke(request).await?)
    }

    pub fn config(&self) -> &AnalystConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn metrics_snapshot(&self) -> OrchestratorMetricsSnapshot {
        self.orchestrator.metrics_snapshot()
    }
}

/// One-shot convenience: defaults -> analyze.
pub async fn quick_analyze(
    services: RemoteServices,
    question: impl Into<String>,
    dataset: Dataset,
) -> Result<InvocationOutcome, AnalystError> {
    Analyst::with_defaults(services)
        .analyze(question, dataset)
        .await
}

/// Pretty JSON export of one outcome.
pub fn export_outcome(outcome: &InvocationOutcome) -> Result<String, AnalystError> {
    serde_json::to_string_pretty(outcome).map_err(|err| AnalystError::Export(err.to_string()))
}
