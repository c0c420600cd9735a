//! Contract between the tabula orchestrator and the remote collaborators it drives.
//! Every remote call returns a boxed `Send` future so the traits stay object-safe.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by any remote collaborator.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RemoteError {
    #[error("remote service unavailable: {0}")]
    Unavailable(String),
    #[error("remote request rejected ({code}): {message}")]
    Rejected { code: u16, message: String },
    #[error("remote resource not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote call timed out")]
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnRole {
    Requester,
    Worker,
    Tool,
    System,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Worker => "worker",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

/// One unit of output as emitted by the transport, before sequencing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMessage {
    pub role: TurnRole,
    pub text: Option<String>,
}

impl TurnMessage {
    pub fn new(role: TurnRole, text: Option<String>) -> Self {
        Self { role, text }
    }

    pub fn worker(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Worker, Some(text.into()))
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Tool, Some(text.into()))
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, Some(text.into()))
    }
}

/// One sequenced turn. `sequence` starts at 1 and follows arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub sequence: u64,
    pub role: TurnRole,
    pub text: Option<String>,
}

impl Turn {
    pub fn from_message(sequence: u64, message: TurnMessage) -> Self {
        Self {
            sequence,
            role: message.role,
            text: message.text,
        }
    }

    /// Text content, treating whitespace-only content as absent.
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactPurpose {
    Dataset,
    Attachment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerTool {
    CodeInterpreter,
    FileSearch,
}

/// Everything a provisioner needs to create one remote worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    pub model: String,
    pub instructions: String,
    pub tools: Vec<WorkerTool>,
    pub artifact_ids: Vec<String>,
    pub metadata: Value,
}

impl WorkerSpec {
    pub fn new(model: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
            artifact_ids: Vec::new(),
            metadata: Value::Null,
        }
    }

    pub fn with_tool(mut self, tool: WorkerTool) -> Self {
        if !self.tools.contains(&tool) {
            self.tools.push(tool);
        }
        self
    }
}

pub trait ArtifactStore: Send + Sync + 'static {
    fn upload<'a>(
        &'a self,
        bytes: &'a [u8],
        purpose: ArtifactPurpose,
        name: &'a str,
    ) -> RemoteFuture<'a, Result<String, RemoteError>>;

    fn delete<'a>(&'a self, artifact_id: &'a str) -> RemoteFuture<'a, Result<(), RemoteError>>;
}

pub trait WorkerProvisioner: Send + Sync + 'static {
    fn create_worker<'a>(
        &'a self,
        spec: &'a WorkerSpec,
    ) -> RemoteFuture<'a, Result<String, RemoteError>>;

    fn delete_worker<'a>(&'a self, worker_id: &'a str)
        -> RemoteFuture<'a, Result<(), RemoteError>>;

    fn create_thread<'a>(&'a self) -> RemoteFuture<'a, Result<String, RemoteError>>;

    fn delete_thread<'a>(&'a self, thread_id: &'a str)
        -> RemoteFuture<'a, Result<(), RemoteError>>;
}

/// Finite, non-restartable stream of turns for one submitted input.
/// `Ok(None)` means the remote side closed the stream.
pub trait TurnStream: Send {
    fn next_turn(&mut self) -> RemoteFuture<'_, Result<Option<TurnMessage>, RemoteError>>;
}

pub type BoxTurnStream = Box<dyn TurnStream>;

pub trait TurnTransport: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        thread_id: &'a str,
        worker_id: &'a str,
        text: &'a str,
    ) -> RemoteFuture<'a, Result<BoxTurnStream, RemoteError>>;
}
