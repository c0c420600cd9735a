use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabula_contract::{ArtifactPurpose, ArtifactStore, TurnTransport, WorkerProvisioner};
use tokio::time::timeout;

use crate::deadline::Deadline;
use crate::errors::InvokeError;
use crate::outcome::ReleaseIssue;
use crate::request::InvocationRequest;

/// The remote collaborators one orchestrator drives.
#[derive(Clone)]
pub struct RemoteServices {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub provisioner: Arc<dyn WorkerProvisioner>,
    pub transport: Arc<dyn TurnTransport>,
}

impl RemoteServices {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        provisioner: Arc<dyn WorkerProvisioner>,
        transport: Arc<dyn TurnTransport>,
    ) -> Self {
        Self {
            artifacts,
            provisioner,
            transport,
        }
    }
}

impl fmt::Debug for RemoteServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteServices").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Artifact,
    Worker,
    Thread,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Artifact => "artifact",
            Self::Worker => "worker",
            Self::Thread => "thread",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleState {
    Unallocated,
    Allocated,
    Released,
}

/// Remote identifiers held by one handle. A `None` slot is either never allocated or already
/// handed to release.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResources {
    pub artifact_id: Option<String>,
    pub worker_id: Option<String>,
    pub thread_id: Option<String>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.artifact_id.is_none() && self.worker_id.is_none() && self.thread_id.is_none()
    }
}

/// Exclusive owner of one invocation's remote resources.
///
/// `release` attempts every allocated sub-resource once, independently of the others.
/// If the handle is dropped while still holding resources (the invocation future was dropped
/// or its body panicked), release continues on a detached tokio task.
pub struct SessionHandle {
    services: RemoteServices,
    resources: SessionResources,
    state: HandleState,
    release_timeout: Duration,
    invocation_id: String,
}

impl SessionHandle {
    fn unallocated(
        services: &RemoteServices,
        release_timeout: Duration,
        invocation_id: &str,
    ) -> Self {
        Self {
            services: services.clone(),
            resources: SessionResources::default(),
            state: HandleState::Unallocated,
            release_timeout,
            invocation_id: invocation_id.to_owned(),
        }
    }

    /// Allocate artifact (when a dataset is present), worker and thread, in that order.
    /// Each remote call is bounded by `deadline`. On failure every sub-resource allocated so far
    /// is released before the error is returned.
    pub async fn acquire(
        services: &RemoteServices,
        request: &InvocationRequest,
        deadline: Deadline,
        release_timeout: Duration,
        invocation_id: &str,
    ) -> Result<Self, InvokeError> {
        let mut handle = Self::unallocated(services, release_timeout, invocation_id);
        match handle.allocate(request, deadline).await {
            Ok(()) => {
                handle.state = HandleState::Allocated;
                tracing::debug!(
                    invocation_id,
                    worker_id = ?handle.resources.worker_id,
                    thread_id = ?handle.resources.thread_id,
                    artifact_id = ?handle.resources.artifact_id,
                    "session resources allocated"
                );
                Ok(handle)
            }
            Err(err) => {
                tracing::warn!(invocation_id, error = %err, "session acquisition failed");
                handle.release().await;
                Err(err)
            }
        }
    }

    async fn allocate(
        &mut self,
        request: &InvocationRequest,
        deadline: Deadline,
    ) -> Result<(), InvokeError> {
        let mut worker_spec = request.worker.clone();

        if let Some(dataset) = request.dataset.as_ref() {
            let name = dataset.upload_name();
            let artifact_id = deadline
                .run(self.services.artifacts.upload(
                    &dataset.bytes,
                    ArtifactPurpose::Dataset,
                    &name,
                ))
                .await
                .map_err(|_| InvokeError::DeadlineElapsed(ResourceKind::Artifact))?
                .map_err(|error| InvokeError::Acquisition {
                    kind: ResourceKind::Artifact,
                    error,
                })?;
            self.resources.artifact_id = Some(artifact_id.clone());
            worker_spec.artifact_ids.push(artifact_id);
        }

        let worker_id = deadline
            .run(self.services.provisioner.create_worker(&worker_spec))
            .await
            .map_err(|_| InvokeError::DeadlineElapsed(ResourceKind::Worker))?
            .map_err(|error| InvokeError::Acquisition {
                kind: ResourceKind::Worker,
                error,
            })?;
        self.resources.worker_id = Some(worker_id);

        let thread_id = deadline
            .run(self.services.provisioner.create_thread())
            .await
            .map_err(|_| InvokeError::DeadlineElapsed(ResourceKind::Thread))?
            .map_err(|error| InvokeError::Acquisition {
                kind: ResourceKind::Thread,
                error,
            })?;
        self.resources.thread_id = Some(thread_id);
        Ok(())
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn resources(&self) -> &SessionResources {
        &self.resources
    }

    pub fn worker_id(&self) -> Option<&str> {
        self.resources.worker_id.as_deref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.resources.thread_id.as_deref()
    }

    /// Release every held sub-resource. Idempotent: a second call is a no-op.
    /// Runs after deadline expiry too; each call has its own `release_timeout`.
    pub async fn release(&mut self) -> Vec<ReleaseIssue> {
        if self.state == HandleState::Released {
            return Vec::new();
        }
        self.state = HandleState::Released;
        release_resources(
            &self.services,
            &mut self.resources,
            self.release_timeout,
            &self.invocation_id,
        )
        .await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("resources", &self.resources)
            .field("state", &self.state)
            .field("invocation_id", &self.invocation_id)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.resources.is_empty() {
            return;
        }
        let mut resources = std::mem::take(&mut self.resources);
        let services = self.services.clone();
        let release_timeout = self.release_timeout;
        let invocation_id = std::mem::take(&mut self.invocation_id);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(
                    invocation_id = %invocation_id,
                    "session handle dropped before release; releasing in background"
                );
                runtime.spawn(async move {
                    release_resources(&services, &mut resources, release_timeout, &invocation_id)
                        .await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    invocation_id = %invocation_id,
                    resources = ?resources,
                    "session handle dropped outside a tokio runtime; remote resources leaked"
                );
            }
        }
    }
}

/// Release thread, worker, then artifact. A slot is cleared only once its call resolves, so a
/// release cancelled mid-call leaves that id for the drop guard; one failure never skips the
/// others.
async fn release_resources(
    services: &RemoteServices,
    resources: &mut SessionResources,
    release_timeout: Duration,
    invocation_id: &str,
) -> Vec<ReleaseIssue> {
    let mut issues = Vec::new();

    if let Some(thread_id) = resources.thread_id.clone() {
        let result = timeout(
            release_timeout,
            services.provisioner.delete_thread(&thread_id),
        )
        .await;
        resources.thread_id = None;
        record_release(
            &mut issues,
            ResourceKind::Thread,
            thread_id,
            result,
            invocation_id,
        );
    }
    if let Some(worker_id) = resources.worker_id.clone() {
        let result = timeout(
            release_timeout,
            services.provisioner.delete_worker(&worker_id),
        )
        .await;
        resources.worker_id = None;
        record_release(
            &mut issues,
            ResourceKind::Worker,
            worker_id,
            result,
            invocation_id,
        );
    }
    if let Some(artifact_id) = resources.artifact_id.clone() {
        let result = timeout(release_timeout, services.artifacts.delete(&artifact_id)).await;
        resources.artifact_id = None;
        record_release(
            &mut issues,
            ResourceKind::Artifact,
            artifact_id,
            result,
            invocation_id,
        );
    }

    issues
}

fn record_release(
    issues: &mut Vec<ReleaseIssue>,
    kind: ResourceKind,
    resource_id: String,
    result: Result<Result<(), tabula_contract::RemoteError>, tokio::time::error::Elapsed>,
    invocation_id: &str,
) {
    let message = match result {
        Ok(Ok(())) => {
            tracing::debug!(invocation_id, %kind, resource_id = %resource_id, "released");
            return;
        }
        Ok(Err(err)) => err.to_string(),
        Err(_) => "release call timed out".to_owned(),
    };
    tracing::warn!(
        invocation_id,
        %kind,
        resource_id = %resource_id,
        error = %message,
        "failed to release remote resource"
    );
    issues.push(ReleaseIssue {
        kind,
        resource_id,
        message,
    });
}
