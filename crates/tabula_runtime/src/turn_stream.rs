use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tabula_contract::{BoxTurnStream, RemoteError, Turn};

use crate::deadline::Deadline;
use crate::errors::panic_message;

pub const DEFAULT_COMPLETION_MARKERS: [&str; 2] = ["analysis complete", "final result"];

/// Decides whether one turn signals that the remote task is finished.
/// Implementations are heuristics; false positives and negatives are expected.
pub trait CompletionDetector: Send + Sync {
    fn is_complete(&self, turn: &Turn) -> bool;
}

impl<F> CompletionDetector for F
where
    F: Fn(&Turn) -> bool + Send + Sync,
{
    fn is_complete(&self, turn: &Turn) -> bool {
        self(turn)
    }
}

/// Case-insensitive substring match against a fixed marker set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerCompletionDetector {
    markers: Vec<String>,
}

impl MarkerCompletionDetector {
    /// Blank markers are dropped; the rest are lowercased once here.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|marker| marker.as_ref().trim().to_lowercase())
            .filter(|marker| !marker.is_empty())
            .collect();
        Self { markers }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for MarkerCompletionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_MARKERS)
    }
}

impl CompletionDetector for MarkerCompletionDetector {
    fn is_complete(&self, turn: &Turn) -> bool {
        let Some(text) = turn.text() else {
            return false;
        };
        let text = text.to_lowercase();
        self.markers.iter().any(|marker| text.contains(marker.as_str()))
    }
}

/// Pulls turns from one remote stream and stamps arrival-order sequence numbers.
/// Once the stream reports its end, every later pull returns `Ok(None)` without touching it.
pub struct TurnStreamReader {
    stream: BoxTurnStream,
    observed: u64,
    exhausted: bool,
}

impl TurnStreamReader {
    pub fn new(stream: BoxTurnStream) -> Self {
        Self {
            stream,
            observed: 0,
            exhausted: false,
        }
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub async fn next_turn(&mut self) -> Result<Option<Turn>, RemoteError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.stream.next_turn().await? {
            Some(message) => {
                self.observed += 1;
                Ok(Some(Turn::from_message(self.observed, message)))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionCause {
    Marker,
    StreamClosed,
}

/// Why the turn loop stopped. Exactly one applies per loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Completed(CompletionCause),
    TurnBudgetExceeded,
    TimedOut,
    StreamFailed(RemoteError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnLimits {
    pub max_turns: usize,
    pub deadline: Deadline,
}

/// Every turn observed by one loop, plus the rule that ended it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnLog {
    pub turns: Vec<Turn>,
    pub stop: StopReason,
}

impl TurnLog {
    pub(crate) fn empty(stop: StopReason) -> Self {
        Self {
            turns: Vec::new(),
            stop,
        }
    }
}

/// Drive `reader` until one stopping rule fires.
///
/// Per iteration: deadline first, then the turn budget, then a pull bounded by the deadline;
/// a pulled turn is logged before the completion detector looks at it.
///
/// Once `max_turns` turns are logged, one more pull decides between a clean close and
/// truncation: `Ok(None)` completes, anything still arriving (or still pending at the deadline)
/// exceeds the budget and is discarded. A panicking detector ends the loop as a stream failure.
pub async fn read_turns(
    reader: &mut TurnStreamReader,
    limits: TurnLimits,
    detector: &dyn CompletionDetector,
    invocation_id: &str,
) -> TurnLog {
    let mut turns: Vec<Turn> = Vec::new();
    let stop = loop {
        if limits.deadline.is_expired() {
            break StopReason::TimedOut;
        }
        if turns.len() >= limits.max_turns {
            break check_budget_overrun(reader, limits, invocation_id).await;
        }

        let turn = match limits.deadline.run(reader.next_turn()).await {
            Err(_) => break StopReason::TimedOut,
            Ok(Err(err)) => break StopReason::StreamFailed(err),
            Ok(Ok(None)) => break StopReason::Completed(CompletionCause::StreamClosed),
            Ok(Ok(Some(turn))) => turn,
        };

        tracing::debug!(
            invocation_id,
            sequence = turn.sequence,
            role = turn.role.as_str(),
            "turn received"
        );
        let complete = catch_unwind(AssertUnwindSafe(|| detector.is_complete(&turn)));
        turns.push(turn);
        match complete {
            Ok(true) => break StopReason::Completed(CompletionCause::Marker),
            Ok(false) => {}
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(invocation_id, panic = %message, "completion detector panicked");
                break StopReason::StreamFailed(RemoteError::Unavailable(format!(
                    "completion detector panicked: {message}"
                )));
            }
        }
    };

    TurnLog { turns, stop }
}

async fn check_budget_overrun(
    reader: &mut TurnStreamReader,
    limits: TurnLimits,
    invocation_id: &str,
) -> StopReason {
    match limits.deadline.run(reader.next_turn()).await {
        Ok(Ok(None)) => StopReason::Completed(CompletionCause::StreamClosed),
        Ok(Err(err)) => StopReason::StreamFailed(err),
        Ok(Ok(Some(_))) | Err(_) => {
            tracing::warn!(
                invocation_id,
                max_turns = limits.max_turns,
                "turn budget exhausted; output truncated"
            );
            StopReason::TurnBudgetExceeded
        }
    }
}
