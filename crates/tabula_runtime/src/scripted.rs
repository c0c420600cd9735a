//! Scripted in-memory collaborators.
//!
//! `ScriptedRemote` implements every collaborator trait against one shared state: it hands out
//! sequential ids, replays a scripted turn stream, injects failures and delays on request, and
//! records every remote call so tests can assert on allocation and release.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tabula_contract::{
    ArtifactPurpose, ArtifactStore, BoxTurnStream, RemoteError, RemoteFuture, TurnMessage,
    TurnStream, TurnTransport, WorkerProvisioner, WorkerSpec,
};

use crate::session::{RemoteServices, ResourceKind};

/// One step of a scripted turn stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    Turn(TurnMessage),
    Delay(Duration),
    Fail(RemoteError),
    /// Never yields again.
    Stall,
}

/// Every remote call observed, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteCall {
    Upload {
        name: String,
        purpose: ArtifactPurpose,
        bytes: usize,
    },
    DeleteArtifact(String),
    CreateWorker {
        model: String,
        artifact_ids: Vec<String>,
    },
    DeleteWorker(String),
    CreateThread,
    DeleteThread(String),
    Send {
        thread_id: String,
        worker_id: String,
        text: String,
    },
}

#[derive(Debug, Default)]
struct ScriptState {
    next_id: u64,
    calls: Vec<RemoteCall>,
    live: HashSet<(ResourceKind, String)>,
    allocate_failures: HashMap<ResourceKind, RemoteError>,
    allocate_delays: HashMap<ResourceKind, Duration>,
    release_failures: HashMap<ResourceKind, RemoteError>,
    release_delays: HashMap<ResourceKind, Duration>,
    send_failure: Option<RemoteError>,
    send_delay: Option<Duration>,
    script: Vec<ScriptStep>,
}

impl ScriptState {
    fn allocate_id(&mut self, kind: ResourceKind) -> String {
        self.next_id += 1;
        let prefix = match kind {
            ResourceKind::Artifact => "file",
            ResourceKind::Worker => "wrk",
            ResourceKind::Thread => "thr",
        };
        let id = format!("{prefix}_{}", self.next_id);
        self.live.insert((kind, id.clone()));
        id
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedRemote {
    inner: Arc<Mutex<ScriptState>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a stream that yields `turns` and then closes.
    pub fn with_turns<I>(self, turns: I) -> Self
    where
        I: IntoIterator<Item = TurnMessage>,
    {
        let steps: Vec<ScriptStep> = turns.into_iter().map(ScriptStep::Turn).collect();
        self.with_script(steps)
    }

    /// Replace the whole stream script.
    pub fn with_script(self, steps: Vec<ScriptStep>) -> Self {
        self.state().script = steps;
        self
    }

    pub fn fail_allocate(self, kind: ResourceKind, error: RemoteError) -> Self {
        self.state().allocate_failures.insert(kind, error);
        self
    }

    pub fn delay_allocate(self, kind: ResourceKind, delay: Duration) -> Self {
        self.state().allocate_delays.insert(kind, delay);
        self
    }

    pub fn fail_release(self, kind: ResourceKind, error: RemoteError) -> Self {
        self.state().release_failures.insert(kind, error);
        self
    }

    pub fn delay_release(self, kind: ResourceKind, delay: Duration) -> Self {
        self.state().release_delays.insert(kind, delay);
        self
    }

    pub fn fail_send(self, error: RemoteError) -> Self {
        self.state().send_failure = Some(error);
        self
    }

    pub fn delay_send(self, delay: Duration) -> Self {
        self.state().send_delay = Some(delay);
        self
    }

    /// Bundle this remote as all three collaborators.
    pub fn services(&self) -> RemoteServices {
        let shared = Arc::new(self.clone());
        RemoteServices::new(shared.clone(), shared.clone(), shared)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Number of release calls issued for `kind`, failed ones included.
    pub fn release_calls(&self, kind: ResourceKind) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| {
                matches!(
                    (kind, call),
                    (ResourceKind::Artifact, RemoteCall::DeleteArtifact(_))
                        | (ResourceKind::Worker, RemoteCall::DeleteWorker(_))
                        | (ResourceKind::Thread, RemoteCall::DeleteThread(_))
                )
            })
            .count()
    }

    /// Resources allocated and not yet successfully released.
    pub fn live_resources(&self) -> Vec<(ResourceKind, String)> {
        let mut live: Vec<_> = self.state().live.iter().cloned().collect();
        live.sort_by(|a, b| a.1.cmp(&b.1));
        live
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        // A panicking test thread must not hide the recorded calls from later assertions.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn allocate(&self, kind: ResourceKind, call: RemoteCall) -> Result<String, RemoteError> {
        let delay = {
            let mut state = self.state();
            state.calls.push(call);
            state.allocate_delays.get(&kind).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(err) = state.allocate_failures.get(&kind) {
            return Err(err.clone());
        }
        Ok(state.allocate_id(kind))
    }

    async fn release(
        &self,
        kind: ResourceKind,
        id: &str,
        call: RemoteCall,
    ) -> Result<(), RemoteError> {
        let delay = {
            let mut state = self.state();
            state.calls.push(call);
            state.release_delays.get(&kind).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if let Some(err) = state.release_failures.get(&kind) {
            return Err(err.clone());
        }
        if state.live.remove(&(kind, id.to_owned())) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(id.to_owned()))
        }
    }
}

impl ArtifactStore for ScriptedRemote {
    fn upload<'a>(
        &'a self,
        bytes: &'a [u8],
        purpose: ArtifactPurpose,
        name: &'a str,
    ) -> RemoteFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            let call = RemoteCall::Upload {
                name: name.to_owned(),
                purpose,
                bytes: bytes.len(),
            };
            self.allocate(ResourceKind::Artifact, call).await
        })
    }

    fn delete<'a>(&'a self, artifact_id: &'a str) -> RemoteFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.release(
                ResourceKind::Artifact,
                artifact_id,
                RemoteCall::DeleteArtifact(artifact_id.to_owned()),
            )
            .await
        })
    }
}

impl WorkerProvisioner for ScriptedRemote {
    fn create_worker<'a>(
        &'a self,
        spec: &'a WorkerSpec,
    ) -> RemoteFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            let call = RemoteCall::CreateWorker {
                model: spec.model.clone(),
                artifact_ids: spec.artifact_ids.clone(),
            };
            self.allocate(ResourceKind::Worker, call).await
        })
    }

    fn delete_worker<'a>(
        &'a self,
        worker_id: &'a str,
    ) -> RemoteFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.release(
                ResourceKind::Worker,
                worker_id,
                RemoteCall::DeleteWorker(worker_id.to_owned()),
            )
            .await
        })
    }

    fn create_thread<'a>(&'a self) -> RemoteFuture<'a, Result<String, RemoteError>> {
        Box::pin(async move {
            self.allocate(ResourceKind::Thread, RemoteCall::CreateThread)
                .await
        })
    }

    fn delete_thread<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> RemoteFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.release(
                ResourceKind::Thread,
                thread_id,
                RemoteCall::DeleteThread(thread_id.to_owned()),
            )
            .await
        })
    }
}

impl TurnTransport for ScriptedRemote {
    fn send<'a>(
        &'a self,
        thread_id: &'a str,
        worker_id: &'a str,
        text: &'a str,
    ) -> RemoteFuture<'a, Result<BoxTurnStream, RemoteError>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.calls.push(RemoteCall::Send {
                    thread_id: thread_id.to_owned(),
                    worker_id: worker_id.to_owned(),
                    text: text.to_owned(),
                });
                state.send_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let state = self.state();
            if let Some(err) = state.send_failure.as_ref() {
                return Err(err.clone());
            }
            let stream = ScriptedStream {
                steps: state.script.iter().cloned().collect(),
            };
            Ok(Box::new(stream) as BoxTurnStream)
        })
    }
}

struct ScriptedStream {
    steps: VecDeque<ScriptStep>,
}

impl TurnStream for ScriptedStream {
    fn next_turn(&mut self) -> RemoteFuture<'_, Result<Option<TurnMessage>, RemoteError>> {
        Box::pin(async move {
            loop {
                match self.steps.pop_front() {
                    None => return Ok(None),
                    Some(ScriptStep::Turn(message)) => return Ok(Some(message)),
                    Some(ScriptStep::Fail(err)) => return Err(err),
                    Some(ScriptStep::Delay(delay)) => tokio::time::sleep(delay).await,
                    Some(ScriptStep::Stall) => std::future::pending::<()>().await,
                }
            }
        })
    }
}
