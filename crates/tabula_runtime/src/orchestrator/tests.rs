use std::time::Duration;

use pretty_assertions::assert_eq;
use tabula_contract::{RemoteError, TurnMessage, WorkerSpec};
use tracing_test::traced_test;

use super::*;
use crate::request::Dataset;
use crate::scripted::{RemoteCall, ScriptStep, ScriptedRemote};
use crate::session::ResourceKind;

const VENDOR_CSV: &str = "Vendor,Amount,Date\nAcme,120.50,2024-01-03\nGlobex,75.00,2024-01-09\nInitech,310.25,2024-02-14\n";

fn vendor_request() -> InvocationRequest {
    InvocationRequest::new(
        "Which vendor did we pay the most?",
        WorkerSpec::new("model-a", "You are a data analyst."),
    )
    .with_dataset(Dataset::new("vendors.csv", VENDOR_CSV))
}

fn orchestrator(remote: &ScriptedRemote) -> Orchestrator {
    Orchestrator::new(remote.services(), OrchestratorConfig::new())
}

fn assert_all_released(remote: &ScriptedRemote) {
    assert!(remote.live_resources().is_empty(), "{:?}", remote.live_resources());
    for kind in [ResourceKind::Artifact, ResourceKind::Worker, ResourceKind::Thread] {
        assert_eq!(remote.release_calls(kind), 1, "{kind}");
    }
}

struct FailingAnalyzer;

impl FallbackAnalyzer for FailingAnalyzer {
    fn analyze(&self, _raw: &str, _question: &str) -> Result<DegradedResult, FallbackError> {
        Err(FallbackError::Analyzer("profiler offline".to_owned()))
    }
}

struct PanickingAnalyzer;

impl FallbackAnalyzer for PanickingAnalyzer {
    fn analyze(&self, _raw: &str, _question: &str) -> Result<DegradedResult, FallbackError> {
        panic!("malformed row index");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn completes_on_marker_in_third_turn() {
    let remote = ScriptedRemote::new().with_turns(vec![
        TurnMessage::worker("Loading vendors.csv"),
        TurnMessage::tool("df.groupby('Vendor').sum()"),
        TurnMessage::worker("Final result: Initech received the most (310.25)."),
        TurnMessage::worker("unreachable"),
    ]);

    let outcome = orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.turns.len(), 3);
    assert!(!outcome.used_fallback);
    assert_eq!(
        outcome.assembled_text,
        "Loading vendors.csv\n\ndf.groupby('Vendor').sum()\n\nFinal result: Initech received the most (310.25)."
    );
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn sends_question_on_acquired_thread_and_worker() {
    let remote = ScriptedRemote::new().with_turns(vec![TurnMessage::worker("ok")]);

    orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert!(remote.calls().contains(&RemoteCall::Send {
        thread_id: "thr_3".to_owned(),
        worker_id: "wrk_2".to_owned(),
        text: "Which vendor did we pay the most?".to_owned(),
    }));
}

#[tokio::test(flavor = "current_thread")]
async fn stream_close_without_marker_is_completed() {
    let remote = ScriptedRemote::new().with_turns(vec![
        TurnMessage::worker("one"),
        TurnMessage::worker("two"),
    ]);

    let outcome = orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.assembled_text, "one\n\ntwo");
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
#[traced_test]
async fn twenty_five_turns_stop_at_budget_with_warning() {
    let turns = (1..=25).map(|n| TurnMessage::worker(format!("step {n}")));
    let remote = ScriptedRemote::new().with_turns(turns);

    let outcome = orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::TurnBudgetExceeded);
    assert_eq!(outcome.turns.len(), 20);
    assert!(!outcome.assembled_text.is_empty());
    assert!(outcome.assembled_text.ends_with("step 20"));
    assert!(logs_contain("turn budget exhausted"));
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn deadline_mid_stream_returns_partial_text() {
    let remote = ScriptedRemote::new().with_script(vec![
        ScriptStep::Turn(TurnMessage::worker("Amount column parsed")),
        ScriptStep::Turn(TurnMessage::worker("Computing totals")),
        ScriptStep::Stall,
    ]);
    let started = std::time::Instant::now();

    let outcome = orchestrator(&remote)
        .invoke_with_deadline(vendor_request(), Deadline::after(Duration::from_millis(80)))
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert_eq!(
        outcome.assembled_text,
        "Amount column parsed\n\nComputing totals"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn deadline_during_send_times_out_with_empty_text() {
    let remote = ScriptedRemote::new()
        .delay_send(Duration::from_secs(30))
        .with_turns(vec![TurnMessage::worker("late")]);

    let outcome = orchestrator(&remote)
        .invoke_with_deadline(vendor_request(), Deadline::after(Duration::from_millis(50)))
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert!(outcome.turns.is_empty());
    assert_eq!(outcome.assembled_text, "");
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn immediate_transport_failure_degrades_to_structural_summary() {
    let remote =
        ScriptedRemote::new().fail_send(RemoteError::Unavailable("503 from gateway".to_owned()));

    let outcome = orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Degraded);
    assert!(outcome.used_fallback);
    assert_eq!(
        outcome.stream_error,
        Some(RemoteError::Unavailable("503 from gateway".to_owned()))
    );
    for needle in ["Total columns: 3", "Total rows: 3", "Vendor", "Amount", "Date"] {
        assert!(
            outcome.assembled_text.contains(needle),
            "missing {needle:?} in {}",
            outcome.assembled_text
        );
    }
    assert!(outcome.assembled_text.starts_with("Fallback analysis (degraded"));
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn failure_after_turns_keeps_them_before_fallback() {
    let remote = ScriptedRemote::new().with_script(vec![
        ScriptStep::Turn(TurnMessage::worker("first insight")),
        ScriptStep::Turn(TurnMessage::worker("second insight")),
        ScriptStep::Fail(RemoteError::Transport("stream reset".to_owned())),
    ]);

    let outcome = orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Degraded);
    assert_eq!(outcome.turns.len(), 2);
    let fallback = outcome.fallback.as_ref().expect("fallback result");
    assert_eq!(
        outcome.assembled_text,
        format!("first insight\n\nsecond insight\n\n{}", fallback.summary)
    );
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn stream_failure_without_dataset_still_degrades() {
    let remote = ScriptedRemote::new().fail_send(RemoteError::Timeout);
    let request = InvocationRequest::new("anything?", WorkerSpec::new("model-a", "analyze"));

    let outcome = orchestrator(&remote).invoke(request).await.expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Degraded);
    assert!(outcome.assembled_text.contains("Could not parse input"));
}

#[tokio::test(flavor = "current_thread")]
async fn fallback_error_yields_failed_outcome_with_note() {
    let remote = ScriptedRemote::new().with_script(vec![
        ScriptStep::Turn(TurnMessage::worker("partial")),
        ScriptStep::Fail(RemoteError::Transport("reset".to_owned())),
    ]);

    let outcome = orchestrator(&remote)
        .with_fallback_analyzer(Arc::new(FailingAnalyzer))
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(!outcome.used_fallback);
    assert!(outcome.assembled_text.starts_with("partial\n\n[analysis unavailable"));
    assert!(outcome.assembled_text.contains("profiler offline"));
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn fallback_panic_is_contained() {
    let remote = ScriptedRemote::new().fail_send(RemoteError::Transport("down".to_owned()));

    let outcome = orchestrator(&remote)
        .with_fallback_analyzer(Arc::new(PanickingAnalyzer))
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert!(outcome.assembled_text.contains("malformed row index"));
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn acquisition_failure_is_the_only_error() {
    let remote = ScriptedRemote::new().fail_allocate(
        ResourceKind::Artifact,
        RemoteError::Rejected {
            code: 413,
            message: "file too large".to_owned(),
        },
    );
    let orchestrator = orchestrator(&remote);

    let err = orchestrator
        .invoke(vendor_request())
        .await
        .expect_err("upload fails");

    assert_eq!(err.kind(), ResourceKind::Artifact);
    assert!(!remote
        .calls()
        .iter()
        .any(|call| matches!(call, RemoteCall::Send { .. })));
    assert_eq!(orchestrator.metrics_snapshot().acquisition_failures, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn release_failures_are_reported_without_changing_status() {
    let remote = ScriptedRemote::new()
        .with_turns(vec![TurnMessage::worker("analysis complete")])
        .fail_release(ResourceKind::Thread, RemoteError::NotFound("thr_3".to_owned()))
        .fail_release(ResourceKind::Artifact, RemoteError::Timeout);

    let outcome = orchestrator(&remote)
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    let kinds: Vec<ResourceKind> = outcome.release_issues.iter().map(|i| i.kind).collect();
    assert_eq!(kinds, vec![ResourceKind::Thread, ResourceKind::Artifact]);
    assert_eq!(remote.release_calls(ResourceKind::Worker), 1);
    assert!(outcome.transcript().contains("release warning: thread thr_3"));
}

#[tokio::test(flavor = "current_thread")]
async fn custom_detector_replaces_markers() {
    let remote = ScriptedRemote::new().with_turns(vec![
        TurnMessage::worker("final result: but keep going"),
        TurnMessage::worker("DONE"),
        TurnMessage::worker("ignored"),
    ]);
    let detector = |turn: &tabula_contract::Turn| turn.text() == Some("DONE");

    let outcome = orchestrator(&remote)
        .with_completion_detector(Arc::new(detector))
        .invoke(vendor_request())
        .await
        .expect("invoke");

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.turns.len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_invocations_own_separate_sessions() {
    let remote = ScriptedRemote::new().with_script(vec![
        ScriptStep::Delay(Duration::from_millis(20)),
        ScriptStep::Turn(TurnMessage::worker("final result")),
    ]);
    let orchestrator = orchestrator(&remote);

    let (a, b) = tokio::join!(
        orchestrator.invoke(vendor_request()),
        orchestrator.invoke(vendor_request())
    );
    let (a, b) = (a.expect("a"), b.expect("b"));

    assert_eq!(a.status, OutcomeStatus::Completed);
    assert_eq!(b.status, OutcomeStatus::Completed);
    assert_ne!(a.invocation_id, b.invocation_id);
    assert!(remote.live_resources().is_empty());
    for kind in [ResourceKind::Artifact, ResourceKind::Worker, ResourceKind::Thread] {
        assert_eq!(remote.release_calls(kind), 2, "{kind}");
    }
    let snapshot = orchestrator.metrics_snapshot();
    assert_eq!(snapshot.invocations_total, 2);
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.turns_observed, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn dropped_invocation_future_still_releases() {
    let remote = ScriptedRemote::new().with_script(vec![ScriptStep::Stall]);
    let orchestrator = orchestrator(&remote);

    let run = orchestrator.invoke(vendor_request());
    let cut = tokio::time::timeout(Duration::from_millis(50), run).await;
    assert!(cut.is_err());

    for _ in 0..10 {
        if remote.live_resources().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_all_released(&remote);
}

#[tokio::test(flavor = "current_thread")]
async fn panicking_detector_degrades_instead_of_escaping() {
    let remote = ScriptedRemote::new().with_turns(vec![
        TurnMessage::worker("looking at columns"),
        TurnMessage::worker("more"),
    ]);
    let detector = |_: &tabula_contract::Turn| -> bool { panic!("detector bug") };
    let orchestrator = orchestrator(&remote).with_completion_detector(Arc::new(detector));

    let outcome = orchestrator
        .invoke(vendor_request())
        .await
        .expect("outcome despite detector panic");

    assert_eq!(outcome.status, OutcomeStatus::Degraded);
    assert_eq!(outcome.turns.len(), 1);
    assert!(outcome
        .stream_error
        .as_ref()
        .is_some_and(|err| err.to_string().contains("detector bug")));
    assert!(outcome.assembled_text.contains("Total columns: 3"));
    assert!(outcome.elapsed_ms < 5_000);
    assert_all_released(&remote);
}
