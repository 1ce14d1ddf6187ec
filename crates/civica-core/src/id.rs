use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Identifier of a submitted workflow.
///
/// Format: `WF-<unix-millis>-<sequence>-<suffix>`. The sequence is a
/// process-wide counter, so ids generated by one process sort by submission
/// order when compared by [`WorkflowId::sequence`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Generate a fresh, unique workflow id.
    pub fn generate() -> Self {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self(format!(
            "WF-{}-{:06}-{}",
            Utc::now().timestamp_millis(),
            seq,
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Submission sequence number, if the id was produced by [`WorkflowId::generate`].
    pub fn sequence(&self) -> Option<u64> {
        self.0.split('-').nth(2).and_then(|s| s.parse().ok())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
