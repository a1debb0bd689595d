use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{EngineError, ResultEngine, Transaction, TransactionRequest};

use super::{Job, JobId, JobState, JobStore};

/// Process-local job store. Jobs are lost on restart.
///
/// Jobs are kept in insertion order, which breaks ties between jobs due at
/// the same instant.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

fn job_mut(jobs: &mut [Job], id: JobId) -> ResultEngine<&mut Job> {
    jobs.iter_mut()
        .find(|job| job.id == id)
        .ok_or_else(|| EngineError::KeyNotFound(format!("job {id}")))
}

/// The job when it is still `active`; an outcome for a requeued job is dropped.
fn active_job_mut(jobs: &mut [Job], id: JobId) -> ResultEngine<Option<&mut Job>> {
    let job = job_mut(jobs, id)?;
    if job.state != JobState::Active {
        tracing::warn!(
            job_id = %id,
            state = job.state.as_str(),
            "job no longer active, outcome dropped"
        );
        return Ok(None);
    }
    Ok(Some(job))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, request: TransactionRequest) -> ResultEngine<JobId> {
        let job = Job::new(request);
        let id = job.id;
        self.jobs.lock().await.push(job);
        Ok(id)
    }

    async fn dequeue(&self) -> ResultEngine<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .iter()
            .filter(|job| job.is_due(now))
            .min_by_key(|job| (job.run_at, job.created_at))
            .map(|job| job.id);
        let Some(id) = next else {
            return Ok(None);
        };

        let job = job_mut(&mut jobs, id)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, id: JobId, transaction: &Transaction) -> ResultEngine<()> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = active_job_mut(&mut jobs, id)? else {
            return Ok(());
        };
        job.state = JobState::Completed;
        job.result = Some(transaction.clone());
        job.failed_reason = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> ResultEngine<()> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = active_job_mut(&mut jobs, id)? else {
            return Ok(());
        };
        job.state = JobState::Failed;
        job.failed_reason = Some(reason.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        reason: &str,
        run_at: DateTime<Utc>,
    ) -> ResultEngine<()> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = active_job_mut(&mut jobs, id)? else {
            return Ok(());
        };
        job.state = JobState::Delayed;
        job.failed_reason = Some(reason.to_string());
        job.run_at = run_at;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: JobId) -> ResultEngine<Option<Job>> {
        Ok(self.jobs.lock().await.iter().find(|job| job.id == id).cloned())
    }

    async fn remove_pending(&self, id: JobId) -> ResultEngine<bool> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job| job.id != id || !job.state.is_pending());
        Ok(jobs.len() < before)
    }

    async fn delete(&self, id: JobId) -> ResultEngine<bool> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job| job.id != id);
        Ok(jobs.len() < before)
    }

    async fn requeue_interrupted(&self, stale_before: DateTime<Utc>) -> ResultEngine<u64> {
        let now = Utc::now();
        let mut count = 0;
        for job in self.jobs.lock().await.iter_mut() {
            if job.state == JobState::Active && job.updated_at < stale_before {
                job.state = JobState::Waiting;
                job.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::MoneyCents;

    fn request() -> TransactionRequest {
        TransactionRequest::deposit(Uuid::new_v4(), MoneyCents::new(1_000))
    }

    #[tokio::test]
    async fn dequeue_claims_oldest_job_once() {
        let store = MemoryJobStore::new();
        let first = store.enqueue(request()).await.unwrap();
        let second = store.enqueue(request()).await.unwrap();

        let claimed = store.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts, 1);

        let claimed = store.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.id, second);
        assert!(store.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_job_waits_for_run_at() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(request()).await.unwrap();
        store.dequeue().await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        store.schedule_retry(id, "busy", later).await.unwrap();
        assert!(store.dequeue().await.unwrap().is_none());

        store
            .schedule_retry(id, "busy", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        let claimed = store.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 2);
        assert_eq!(claimed.failed_reason.as_deref(), Some("busy"));
    }

    #[tokio::test]
    async fn only_pending_jobs_can_be_removed() {
        let store = MemoryJobStore::new();
        let pending = store.enqueue(request()).await.unwrap();
        assert!(store.remove_pending(pending).await.unwrap());
        assert!(store.get(pending).await.unwrap().is_none());

        let active = store.enqueue(request()).await.unwrap();
        store.dequeue().await.unwrap();
        assert!(!store.remove_pending(active).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn interrupted_jobs_go_back_to_waiting() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(request()).await.unwrap();
        store.dequeue().await.unwrap();

        let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.requeue_interrupted(an_hour_ago).await.unwrap(), 0);
        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Active);

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.requeue_interrupted(later).await.unwrap(), 1);
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn late_outcome_does_not_touch_requeued_job() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(request()).await.unwrap();
        store.dequeue().await.unwrap();
        store
            .requeue_interrupted(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        store.mark_failed(id, "too late").await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.failed_reason, None);
    }

    #[tokio::test]
    async fn marking_unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store.mark_failed(Uuid::new_v4(), "boom").await.unwrap_err();
        assert!(matches!(err, EngineError::KeyNotFound(_)));
    }
}
