use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::errors::DeadlineElapsed;

/// One absolute expiry instant, fixed when the invocation starts and never extended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Fix a deadline `budget` from now.
    /// Allocation: none. Complexity: O(1).
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Fix a deadline at an explicit instant.
    pub fn at(at: Instant) -> Self {
        Self {
            at,
            budget: at.saturating_duration_since(Instant::now()),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Budget the deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Drive `fut` until it finishes or the deadline fires, whichever is first.
    /// An already expired deadline never polls `fut`.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, DeadlineElapsed>
    where
        F: Future,
    {
        if self.is_expired() {
            return Err(DeadlineElapsed);
        }
        timeout_at(self.at, fut).await.map_err(|_| DeadlineElapsed)
    }
}
