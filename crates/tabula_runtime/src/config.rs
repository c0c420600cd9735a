use std::time::Duration;

use crate::errors::ConfigError;
use crate::turn_stream::DEFAULT_COMPLETION_MARKERS;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEADLINE_SECS_ENV: &str = "TABULA_DEADLINE_SECS";
pub const MAX_TURNS_ENV: &str = "TABULA_MAX_TURNS";
pub const RELEASE_TIMEOUT_MS_ENV: &str = "TABULA_RELEASE_TIMEOUT_MS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Wall-clock budget for one invocation, fixed at entry.
    pub deadline: Duration,
    pub max_turns: usize,
    pub completion_markers: Vec<String>,
    /// Per-call bound on each release request; independent of the invocation deadline.
    pub release_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            max_turns: DEFAULT_MAX_TURNS,
            completion_markers: DEFAULT_COMPLETION_MARKERS
                .iter()
                .map(|marker| (*marker).to_owned())
                .collect(),
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Replace the completion marker set.
    pub fn with_completion_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completion_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_release_timeout(mut self, release_timeout: Duration) -> Self {
        self.release_timeout = release_timeout;
        self
    }

    /// Defaults overlaid with process env.
    /// Side effects: reads process env.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`; blank values are ignored.
    /// Allocation: O(1) per key. Complexity: O(k), k = recognized keys.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = parse_env_u64(&lookup, DEADLINE_SECS_ENV)? {
            self.deadline = Duration::from_secs(secs);
        }
        if let Some(turns) = parse_env_u64(&lookup, MAX_TURNS_ENV)? {
            self.max_turns = usize::try_from(turns).map_err(|_| ConfigError::InvalidValue {
                key: MAX_TURNS_ENV.to_owned(),
                value: turns.to_string(),
            })?;
        }
        if let Some(millis) = parse_env_u64(&lookup, RELEASE_TIMEOUT_MS_ENV)? {
            self.release_timeout = Duration::from_millis(millis);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ZeroMaxTurns);
        }
        if self.deadline.is_zero() {
            return Err(ConfigError::ZeroDeadline);
        }
        Ok(())
    }
}

fn parse_env_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_owned(),
            value: raw,
        })
}
