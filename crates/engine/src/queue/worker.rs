//! Queue worker.
//!
//! Claims jobs from a [`JobStore`] and settles them through the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinSet};

use crate::{Engine, QueueSettings, ResultEngine};

use super::{Job, JobId, JobStore};

#[derive(Clone)]
pub struct Worker {
    engine: Engine,
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
}

impl Worker {
    pub fn new(engine: Engine, store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self {
            engine,
            store,
            settings,
        }
    }

    /// Claims and processes at most one job. Returns the id of the processed
    /// job, or `None` when nothing was due.
    pub async fn run_once(&self) -> ResultEngine<Option<JobId>> {
        let Some(job) = self.store.dequeue().await? else {
            return Ok(None);
        };
        let job_id = job.id;
        self.process(job).await?;
        Ok(Some(job_id))
    }

    async fn process(&self, job: Job) -> ResultEngine<()> {
        let Job {
            id,
            mut payload,
            attempts,
            ..
        } = job;
        // The job id doubles as idempotency key: a job that settled but was
        // not marked completed returns the same transaction when re-run.
        if payload.idempotency_key.is_none() {
            payload.idempotency_key = Some(id.to_string());
        }
        tracing::debug!(job_id = %id, attempt = attempts, "processing job");

        match self.engine.create_transaction(payload).await {
            Ok(transaction) => {
                tracing::info!(
                    job_id = %id,
                    transaction_id = %transaction.id,
                    attempt = attempts,
                    "job completed"
                );
                if self.settings.remove_on_complete {
                    self.store.delete(id).await?;
                } else {
                    self.store.mark_completed(id, &transaction).await?;
                }
            }
            Err(err) if err.is_retryable() && attempts < self.settings.attempts => {
                let run_at = retry_at(Utc::now(), self.settings.backoff(attempts));
                tracing::warn!(
                    job_id = %id,
                    attempt = attempts,
                    %run_at,
                    "job failed, retry scheduled: {err}"
                );
                self.store.schedule_retry(id, &err.to_string(), run_at).await?;
            }
            Err(err) => {
                tracing::error!(job_id = %id, attempt = attempts, "job failed: {err}");
                if self.settings.remove_on_fail {
                    self.store.delete(id).await?;
                } else {
                    self.store.mark_failed(id, &err.to_string()).await?;
                }
            }
        }
        Ok(())
    }

    /// Runs `concurrency` processing loops until `shutdown` turns `true`.
    ///
    /// Jobs left `active` for longer than the lease are put back first; jobs
    /// another live worker claimed recently are left alone. Active jobs finish
    /// before the loops exit.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> ResultEngine<()> {
        self.store
            .requeue_interrupted(lease_expiry(Utc::now(), self.settings.lease()))
            .await?;
        tracing::info!(
            concurrency = self.settings.concurrency,
            poll_interval_ms = self.settings.poll_interval_ms,
            "starting queue worker"
        );

        let mut loops = JoinSet::new();
        for slot in 0..self.settings.concurrency.max(1) {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            loops.spawn(async move { worker.poll_loop(slot, shutdown).await });
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(err) = joined {
                tracing::error!("worker loop aborted: {err}");
            }
        }

        tracing::info!("queue worker stopped");
        Ok(())
    }

    async fn poll_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(err) => {
                    tracing::error!(slot, "job store error: {err}");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!(slot, "worker loop exited");
    }
}

fn retry_at(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn lease_expiry(now: DateTime<Utc>, lease: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
