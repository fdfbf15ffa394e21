//! Write transactions and their tracker.
//!
//! Every accepted write becomes a transaction the caller can poll. State
//! only moves forward: pending, writing, then done or error. Terminal
//! transactions are retained for the configured TTL and then reaped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use meridian_proto::v1 as proto;

use crate::device::WriteData;

/// State of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Accepted, waiting in the write queue.
    Pending,
    /// Being written to the device.
    Writing,
    /// Write completed successfully.
    Done,
    /// Write failed; the transaction message holds the reason.
    Error,
}

impl WriteState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WriteState::Done | WriteState::Error)
    }

    /// Position in the state order, used to reject backward transitions.
    fn rank(&self) -> u8 {
        match self {
            WriteState::Pending => 0,
            WriteState::Writing => 1,
            WriteState::Done | WriteState::Error => 2,
        }
    }

    fn encode(&self) -> proto::WriteState {
        match self {
            WriteState::Pending => proto::WriteState::Pending,
            WriteState::Writing => proto::WriteState::Writing,
            WriteState::Done => proto::WriteState::Done,
            WriteState::Error => proto::WriteState::Error,
        }
    }
}

impl std::fmt::Display for WriteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WriteState::Pending => "pending",
            WriteState::Writing => "writing",
            WriteState::Done => "done",
            WriteState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// The record of a single asynchronous write.
#[derive(Debug, Clone)]
pub struct WriteTransaction {
    pub id: String,
    pub device_id: String,
    pub context: WriteData,
    pub state: WriteState,
    pub message: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl WriteTransaction {
    pub fn new(device_id: impl Into<String>, context: WriteData) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            context,
            state: WriteState::Pending,
            message: String::new(),
            created: now,
            updated: now,
        }
    }

    /// Advance the transaction state. Backward transitions and transitions
    /// out of a terminal state are rejected; the `updated` timestamp moves
    /// on every accepted transition.
    pub fn transition(&mut self, state: WriteState, message: impl Into<String>) -> bool {
        if self.state.is_terminal() || state.rank() < self.state.rank() {
            tracing::warn!(
                id = %self.id,
                from = %self.state,
                to = %state,
                "rejected backward transaction transition"
            );
            return false;
        }
        self.state = state;
        self.message = message.into();
        self.updated = Utc::now();
        true
    }

    pub fn encode(&self) -> proto::TransactionStatus {
        proto::TransactionStatus {
            id: self.id.clone(),
            created: self.created.to_rfc3339_opts(SecondsFormat::Micros, true),
            updated: self.updated.to_rfc3339_opts(SecondsFormat::Micros, true),
            state: self.state.encode() as i32,
            message: self.message.clone(),
        }
    }
}

/// Tracks transactions by ID and reaps terminal entries past their TTL.
#[derive(Debug, Clone)]
pub struct TransactionTracker {
    inner: Arc<RwLock<HashMap<String, WriteTransaction>>>,
    ttl: Duration,
}

impl TransactionTracker {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub async fn add(&self, transaction: WriteTransaction) {
        self.inner
            .write()
            .await
            .insert(transaction.id.clone(), transaction);
    }

    pub async fn get(&self, id: &str) -> Option<WriteTransaction> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    /// Advance a tracked transaction's state.
    pub async fn transition(&self, id: &str, state: WriteState, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        match inner.get_mut(id) {
            Some(transaction) => {
                transaction.transition(state, message);
            }
            None => tracing::warn!(id, "transition for untracked transaction"),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Remove terminal transactions older than the TTL. Returns how many
    /// were removed.
    pub async fn reap(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, t| !(t.state.is_terminal() && t.updated < cutoff));
        let removed = before - inner.len();
        if removed > 0 {
            tracing::debug!(removed, "reaped completed transactions");
        }
        removed
    }

    /// Interval between reaping passes: half the TTL, at least a second.
    fn reap_interval(&self) -> Duration {
        std::cmp::max(self.ttl / 2, Duration::from_secs(1))
    }

    /// Spawn the background reaper task.
    pub fn spawn_reaper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tracker.reap_interval());
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tracker.reap().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
