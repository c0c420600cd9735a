use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tabula_contract::WorkerSpec;

const FINGERPRINT_SCHEME: &str = "sha256:";
const FINGERPRINT_PREFIX_LEN: usize = 12;

/// Raw dataset bytes plus the caller-facing file name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lossy UTF-8 view used by the fallback path.
    /// Allocation: only when the bytes are not valid UTF-8. Complexity: O(n).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// `sha256:<hex>` digest of the raw bytes.
    pub fn fingerprint(&self) -> String {
        format!("{FINGERPRINT_SCHEME}{}", hex::encode(Sha256::digest(&self.bytes)))
    }

    /// Content-addressed upload name, so retried uploads of the same bytes share a name.
    pub fn upload_name(&self) -> String {
        let fingerprint = self.fingerprint();
        let digest = &fingerprint[FINGERPRINT_SCHEME.len()..];
        format!("{}-{}", &digest[..FINGERPRINT_PREFIX_LEN], self.name)
    }
}

/// One analysis request: the question text, the optional dataset and the worker to provision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub question: String,
    pub dataset: Option<Dataset>,
    pub worker: WorkerSpec,
}

impl InvocationRequest {
    pub fn new(question: impl Into<String>, worker: WorkerSpec) -> Self {
        Self {
            question: question.into(),
            dataset: None,
            worker,
        }
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Raw input handed to the fallback analyzer; empty without a dataset.
    pub fn raw_input(&self) -> Cow<'_, str> {
        match self.dataset.as_ref() {
            Some(dataset) => dataset.text(),
            None => Cow::Borrowed(""),
        }
    }
}
