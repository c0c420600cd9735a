use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tabula_contract::RemoteError;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::deadline::Deadline;
use crate::errors::{panic_message, FallbackError, InvokeError};
use crate::fallback::{DegradedResult, FallbackAnalyzer, StructuralAnalyzer};
use crate::metrics::{OrchestratorMetrics, OrchestratorMetricsSnapshot};
use crate::outcome::{assemble_text, InvocationOutcome, OutcomeStatus};
use crate::request::InvocationRequest;
use crate::session::{RemoteServices, SessionHandle};
use crate::turn_stream::{
    read_turns, CompletionDetector, MarkerCompletionDetector, StopReason, TurnLimits, TurnLog,
    TurnStreamReader,
};

/// Drives one remote analysis session per call under a deadline and a turn budget.
///
/// Cloning is cheap and clones share metrics; concurrent invocations share nothing else.
#[derive(Clone)]
pub struct Orchestrator {
    services: RemoteServices,
    config: OrchestratorConfig,
    detector: Arc<dyn CompletionDetector>,
    fallback: Arc<dyn FallbackAnalyzer>,
    metrics: Arc<OrchestratorMetrics>,
}

/// How the streamed part of one invocation settled, before release.
struct Settled {
    status: OutcomeStatus,
    assembled_text: String,
    fallback: Option<DegradedResult>,
    stream_error: Option<RemoteError>,
}

impl Orchestrator {
    /// Orchestrator with marker-based completion and the structural fallback analyzer.
    pub fn new(services: RemoteServices, config: OrchestratorConfig) -> Self {
        let detector = MarkerCompletionDetector::new(&config.completion_markers);
        Self {
            services,
            config,
            detector: Arc::new(detector),
            fallback: Arc::new(StructuralAnalyzer::new()),
            metrics: Arc::new(OrchestratorMetrics::new()),
        }
    }

    /// Replace the completion detector. A detector panic ends the turn loop as a stream
    /// failure; panics inside a `TurnStream` implementation propagate out of `invoke`, with
    /// session resources still released by the handle's drop guard.
    pub fn with_completion_detector(mut self, detector: Arc<dyn CompletionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_fallback_analyzer(mut self, fallback: Arc<dyn FallbackAnalyzer>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metrics_snapshot(&self) -> OrchestratorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one invocation with a deadline of `config.deadline` from now.
    pub async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationOutcome, InvokeError> {
        self.invoke_with_deadline(request, Deadline::after(self.config.deadline))
            .await
    }

    /// Run one invocation against a caller-fixed deadline.
    ///
    /// Returns `Err` only when session resources cannot be acquired. After acquisition every
    /// path yields an outcome, and every allocated sub-resource is released before returning.
    pub async fn invoke_with_deadline(
        &self,
        request: InvocationRequest,
        deadline: Deadline,
    ) -> Result<InvocationOutcome, InvokeError> {
        let invocation_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let mut handle = match SessionHandle::acquire(
            &self.services,
            &request,
            deadline,
            self.config.release_timeout,
            &invocation_id,
        )
        .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.metrics.record_acquisition_failure();
                return Err(err);
            }
        };

        let log = self
            .stream_session(&handle, &request, deadline, &invocation_id)
            .await;
        let settled = self.settle(&log, &request, &invocation_id);
        let release_issues = handle.release().await;

        let outcome = InvocationOutcome {
            invocation_id,
            status: settled.status,
            assembled_text: settled.assembled_text,
            used_fallback: settled.fallback.is_some(),
            turns: log.turns,
            fallback: settled.fallback,
            stream_error: settled.stream_error,
            release_issues,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        self.metrics.record_outcome(
            outcome.status,
            outcome.turns.len(),
            outcome.release_issues.len(),
        );
        tracing::info!(
            invocation_id = %outcome.invocation_id,
            status = outcome.status.as_str(),
            turns = outcome.turns.len(),
            used_fallback = outcome.used_fallback,
            release_issues = outcome.release_issues.len(),
            elapsed_ms = outcome.elapsed_ms,
            "invocation finished"
        );
        Ok(outcome)
    }

    async fn stream_session(
        &self,
        handle: &SessionHandle,
        request: &InvocationRequest,
        deadline: Deadline,
        invocation_id: &str,
    ) -> TurnLog {
        let (Some(thread_id), Some(worker_id)) = (handle.thread_id(), handle.worker_id()) else {
            return TurnLog::empty(StopReason::StreamFailed(RemoteError::NotFound(
                "session handle holds no thread or worker".to_owned(),
            )));
        };

        let stream = match deadline
            .run(
                self.services
                    .transport
                    .send(thread_id, worker_id, &request.question),
            )
            .await
        {
            Err(_) => return TurnLog::empty(StopReason::TimedOut),
            Ok(Err(err)) => return TurnLog::empty(StopReason::StreamFailed(err)),
            Ok(Ok(stream)) => stream,
        };

        let mut reader = TurnStreamReader::new(stream);
        let limits = TurnLimits {
            max_turns: self.config.max_turns,
            deadline,
        };
        read_turns(&mut reader, limits, self.detector.as_ref(), invocation_id).await
    }

    fn settle(&self, log: &TurnLog, request: &InvocationRequest, invocation_id: &str) -> Settled {
        let partial = assemble_text(&log.turns);
        let status = match &log.stop {
            StopReason::Completed(_) => OutcomeStatus::Completed,
            StopReason::TurnBudgetExceeded => OutcomeStatus::TurnBudgetExceeded,
            StopReason::TimedOut => OutcomeStatus::TimedOut,
            StopReason::StreamFailed(err) => {
                tracing::warn!(
                    invocation_id,
                    turns = log.turns.len(),
                    error = %err,
                    "turn stream failed; falling back to structural analysis"
                );
                return self.settle_with_fallback(partial, err.clone(), request, invocation_id);
            }
        };
        Settled {
            status,
            assembled_text: partial,
            fallback: None,
            stream_error: None,
        }
    }

    fn settle_with_fallback(
        &self,
        partial: String,
        stream_error: RemoteError,
        request: &InvocationRequest,
        invocation_id: &str,
    ) -> Settled {
        match self.run_fallback(request) {
            Ok(result) => Settled {
                status: OutcomeStatus::Degraded,
                assembled_text: join_sections(&partial, &result.summary),
                fallback: Some(result),
                stream_error: Some(stream_error),
            },
            Err(err) => {
                tracing::warn!(invocation_id, error = %err, "fallback analyzer failed");
                let note = format!(
                    "[analysis unavailable: remote stream failed ({stream_error}); {err}]"
                );
                Settled {
                    status: OutcomeStatus::Failed,
                    assembled_text: join_sections(&partial, &note),
                    fallback: None,
                    stream_error: Some(stream_error),
                }
            }
        }
    }

    /// Run the fallback analyzer, converting a panic into `FallbackError::Panicked`.
    fn run_fallback(&self, request: &InvocationRequest) -> Result<DegradedResult, FallbackError> {
        let raw_input = request.raw_input();
        let analyzer = self.fallback.as_ref();
        catch_unwind(AssertUnwindSafe(|| {
            analyzer.analyze(&raw_input, &request.question)
        }))
        .unwrap_or_else(|payload| Err(FallbackError::Panicked(panic_message(payload.as_ref()))))
    }
}

fn join_sections(head: &str, tail: &str) -> String {
    if head.is_empty() {
        tail.to_owned()
    } else {
        format!("{head}\n\n{tail}")
    }
}

#[cfg(test)]
mod tests;
