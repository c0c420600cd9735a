use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tabula_contract::{RemoteError, Turn};

use crate::fallback::DegradedResult;
use crate::session::ResourceKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// Completion marker seen or remote stream closed.
    Completed,
    /// Turn budget reached; text may be incomplete.
    TurnBudgetExceeded,
    /// Deadline fired; text holds everything observed before it.
    TimedOut,
    /// Streaming failed; text ends with the fallback analyzer's report.
    Degraded,
    /// Streaming failed and the fallback analyzer failed too.
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TurnBudgetExceeded => "turn_budget_exceeded",
            Self::TimedOut => "timed_out",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// True only for a full remote answer.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One sub-resource whose release failed. Never changes the outcome status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseIssue {
    pub kind: ResourceKind,
    pub resource_id: String,
    pub message: String,
}

/// Result of one invocation. Built once after release has run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOutcome {
    pub invocation_id: String,
    pub status: OutcomeStatus,
    pub assembled_text: String,
    pub used_fallback: bool,
    pub turns: Vec<Turn>,
    pub fallback: Option<DegradedResult>,
    pub stream_error: Option<RemoteError>,
    pub release_issues: Vec<ReleaseIssue>,
    pub elapsed_ms: u64,
}

impl InvocationOutcome {
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Human-readable transcript: one line per turn, then status and any release notes.
    /// Allocation: one String. Complexity: O(n), n = total turn text length.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            let text = turn.text().unwrap_or("(no text)");
            let _ = writeln!(out, "[{} #{}] {}", turn.role.as_str(), turn.sequence, text);
        }
        if let Some(fallback) = self.fallback.as_ref() {
            let _ = writeln!(out, "[fallback] {}", fallback.summary);
        }
        if let Some(err) = self.stream_error.as_ref() {
            let _ = writeln!(out, "stream error: {err}");
        }
        let _ = writeln!(
            out,
            "status: {} ({} turns, {} ms)",
            self.status.as_str(),
            self.turns.len(),
            self.elapsed_ms
        );
        for issue in &self.release_issues {
            let _ = writeln!(
                out,
                "release warning: {} {}: {}",
                issue.kind, issue.resource_id, issue.message
            );
        }
        out
    }
}

/// Join the text of every turn that carries any, in sequence order.
pub(crate) fn assemble_text(turns: &[Turn]) -> String {
    turns
        .iter()
        .filter_map(Turn::text)
        .collect::<Vec<_>>()
        .join("\n\n")
}
