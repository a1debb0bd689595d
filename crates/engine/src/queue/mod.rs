//! Asynchronous transaction processing.
//!
//! [`TransactionQueue::enqueue`] only stores a job; a [`Worker`] pool claims
//! jobs from the same [`JobStore`] and settles them through
//! [`Engine::create_transaction`](crate::Engine::create_transaction), retrying
//! retryable failures with exponential backoff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, QueueSettings, ResultEngine, Transaction, TransactionRequest};

mod db;
mod memory;
mod worker;

pub use db::DbJobStore;
pub use memory::MemoryJobStore;
pub use worker::Worker;

pub type JobId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        }
    }

    /// Waiting and delayed jobs have not started yet and may be cancelled.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed)
    }
}

impl TryFrom<&str> for JobState {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "delayed" => Ok(Self::Delayed),
            other => Err(EngineError::Validation(format!("invalid job state: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: TransactionRequest,
    pub state: JobState,
    /// How many times the job was claimed.
    pub attempts: u32,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub result: Option<Transaction>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: TransactionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            run_at: now,
            result: None,
            failed_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => true,
            JobState::Delayed => self.run_at <= now,
            _ => false,
        }
    }
}

/// Externally visible status of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusKind {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    NotFound,
}

impl From<JobState> for JobStatusKind {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Waiting => Self::Waiting,
            JobState::Active => Self::Active,
            JobState::Completed => Self::Completed,
            JobState::Failed => Self::Failed,
            JobState::Delayed => Self::Delayed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobStatusKind,
    pub result: Option<Transaction>,
    pub error: Option<String>,
}

impl JobStatus {
    fn not_found() -> Self {
        Self {
            status: JobStatusKind::NotFound,
            result: None,
            error: None,
        }
    }
}

impl From<Job> for JobStatus {
    fn from(job: Job) -> Self {
        Self {
            status: job.state.into(),
            result: job.result,
            error: job.failed_reason,
        }
    }
}

/// Storage of queued jobs.
///
/// Every state transition is applied atomically by the store: a job is
/// claimed by at most one caller of [`JobStore::dequeue`].
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, request: TransactionRequest) -> ResultEngine<JobId>;

    /// Claims the oldest due job, moving it to `active` and counting the
    /// attempt.
    async fn dequeue(&self) -> ResultEngine<Option<Job>>;

    /// Outcome transitions below only apply to `active` jobs. A job that was
    /// requeued or removed meanwhile keeps its state.
    async fn mark_completed(&self, id: JobId, transaction: &Transaction) -> ResultEngine<()>;

    async fn mark_failed(&self, id: JobId, reason: &str) -> ResultEngine<()>;

    /// Puts the job back as `delayed` until `run_at`.
    async fn schedule_retry(
        &self,
        id: JobId,
        reason: &str,
        run_at: DateTime<Utc>,
    ) -> ResultEngine<()>;

    async fn get(&self, id: JobId) -> ResultEngine<Option<Job>>;

    /// Drops a job that has not started. Returns whether a job was removed.
    async fn remove_pending(&self, id: JobId) -> ResultEngine<bool>;

    /// Drops a job whatever its state.
    async fn delete(&self, id: JobId) -> ResultEngine<bool>;

    /// Moves jobs `active` since before `stale_before` back to `waiting`.
    async fn requeue_interrupted(&self, stale_before: DateTime<Utc>) -> ResultEngine<u64>;
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct TransactionQueue {
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
}

impl TransactionQueue {
    pub fn new(store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Stores the request as a `waiting` job and returns its id. Nothing is
    /// validated or settled here.
    pub async fn enqueue(&self, request: TransactionRequest) -> ResultEngine<JobId> {
        let job_id = self.store.enqueue(request).await?;
        tracing::info!(job_id = %job_id, "transaction job queued");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: JobId) -> ResultEngine<JobStatus> {
        Ok(self
            .store
            .get(job_id)
            .await?
            .map_or_else(JobStatus::not_found, JobStatus::from))
    }

    /// Cancels a job that has not started yet.
    pub async fn cancel(&self, job_id: JobId) -> ResultEngine<bool> {
        let removed = self.store.remove_pending(job_id).await?;
        if removed {
            tracing::info!(job_id = %job_id, "transaction job cancelled");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MoneyCents;

    #[test]
    fn job_state_round_trips_through_text() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Delayed,
        ] {
            assert_eq!(JobState::try_from(state.as_str()).unwrap(), state);
        }
        assert!(JobState::try_from("paused").is_err());
    }

    #[test]
    fn delayed_job_is_due_only_after_run_at() {
        let mut job = Job::new(TransactionRequest::deposit(Uuid::new_v4(), MoneyCents::new(1)));
        let now = Utc::now();
        job.state = JobState::Delayed;
        job.run_at = now + chrono::Duration::seconds(5);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + chrono::Duration::seconds(5)));

        job.state = JobState::Active;
        assert!(!job.is_due(now + chrono::Duration::seconds(60)));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let queue = TransactionQueue::new(
            Arc::new(MemoryJobStore::default()),
            QueueSettings::default(),
        );
        let status = queue.status(Uuid::new_v4()).await.unwrap();
        assert_eq!(status.status, JobStatusKind::NotFound);
        assert!(status.result.is_none());
    }
}
