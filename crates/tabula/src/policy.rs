use serde::{Deserialize, Serialize};
use tabula_runtime::ConfigError;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const MODEL_ENV: &str = "TABULA_MODEL";
pub const ALT_MODEL_ENV: &str = "TABULA_ALT_MODEL";
pub const VISUALIZATION_KEYWORDS: [&str; 8] = [
    "chart",
    "plot",
    "graph",
    "visualize",
    "visualization",
    "visualise",
    "histogram",
    "diagram",
];

/// Picks the worker model for one question.
///
/// Keyword matching is a plain case-insensitive substring test, so "paragraph" counts as a
/// visualization request. Callers needing better routing replace the keyword set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPolicy {
    pub primary: String,
    pub alternate: Option<String>,
    pub keywords: Vec<String>,
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self {
            primary: DEFAULT_MODEL.to_owned(),
            alternate: None,
            keywords: VISUALIZATION_KEYWORDS
                .iter()
                .map(|keyword| (*keyword).to_owned())
                .collect(),
        }
    }
}

impl ModelPolicy {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            ..Self::default()
        }
    }

    pub fn with_alternate(mut self, alternate: impl Into<String>) -> Self {
        self.alternate = Some(alternate.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_visualization_request(&self, question: &str) -> bool {
        let question = question.to_lowercase();
        self.keywords
            .iter()
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .any(|keyword| question.contains(&keyword))
    }

    /// Alternate model for visualization requests when one is configured, primary otherwise.
    /// Allocation: one lowercase copy of the question. Complexity: O(k * n).
    pub fn select(&self, question: &str) -> &str {
        match self.alternate.as_deref() {
            Some(alternate) if self.is_visualization_request(question) => alternate,
            _ => self.primary.as_str(),
        }
    }

    /// Overlay model ids from `lookup`; blank values are ignored.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        if let Some(primary) = read(MODEL_ENV) {
            if primary.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidValue {
                    key: MODEL_ENV.to_owned(),
                    value: primary,
                });
            }
            self.primary = primary;
        }
        if let Some(alternate) = read(ALT_MODEL_ENV) {
            if alternate.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidValue {
                    key: ALT_MODEL_ENV.to_owned(),
                    value: alternate,
                });
            }
            self.alternate = Some(alternate);
        }
        Ok(self)
    }
}
