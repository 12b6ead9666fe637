//! Redelivery ledger for compute submissions.
//!
//! Queues deliver at least once. Without a ledger every delivery of a
//! trigger message submits a new compute run. With one, the stage records
//! the run it submitted under a key derived from the message and re-attaches
//! to that run when the same message comes back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::SubmittedRun;

/// A recorded submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The run that was submitted.
    pub run: SubmittedRun,
    /// When it was recorded.
    pub recorded_at: DateTime<Utc>,
    /// When the entry stops counting, if ever.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Records a run now.
    #[must_use]
    pub fn new(run: SubmittedRun) -> Self {
        Self {
            run,
            recorded_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Sets an expiry relative to the recording time.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .map(|ttl| self.recorded_at + ttl);
        self
    }

    /// Returns true if the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// Storage for submission records.
#[async_trait]
pub trait SubmissionLedger: Send + Sync {
    /// Looks up a live entry.
    async fn lookup(&self, key: &str) -> Option<LedgerEntry>;

    /// Records a submission, replacing any previous one.
    async fn record(&self, key: &str, run: SubmittedRun);

    /// Drops an entry.
    async fn forget(&self, key: &str);
}

/// Process-local ledger. Cloning shares the entries.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    entries: Arc<Mutex<HashMap<String, LedgerEntry>>>,
    ttl: Option<Duration>,
}

impl InMemoryLedger {
    /// Creates a ledger whose entries never expire.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expires entries after `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Returns the number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl SubmissionLedger for InMemoryLedger {
    async fn lookup(&self, key: &str) -> Option<LedgerEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    async fn record(&self, key: &str, run: SubmittedRun) {
        let mut entry = LedgerEntry::new(run);
        if let Some(ttl) = self.ttl {
            entry = entry.with_ttl(ttl);
        }
        self.entries.lock().insert(key.to_string(), entry);
    }

    async fn forget(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// Derives a stable key from a stage name and a message payload.
#[must_use]
pub fn submission_key(stage: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    format!("idem:{}", hex::encode(&digest[..16]))
}
