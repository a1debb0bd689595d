use std::{sync::Arc, time::Duration};

use sea_orm::{ConnectionTrait, Database};

use engine::{
    Account, Engine, MoneyCents, NewAccountCmd, QueueSettings, TransactionRequest,
    queue::{DbJobStore, JobStatusKind, JobStore, MemoryJobStore, TransactionQueue, Worker},
};
use migration::MigratorTrait;
use uuid::Uuid;

async fn engine_with_db() -> Engine {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Engine::builder().database(db).build().await.unwrap()
}

async fn open_account(engine: &Engine, number: &str, cents: i64) -> Account {
    engine
        .create_account(NewAccountCmd::new(number).initial_balance(MoneyCents::new(cents)))
        .await
        .unwrap()
}

fn fast_settings() -> QueueSettings {
    QueueSettings {
        backoff_delay_ms: 0,
        poll_interval_ms: 10,
        ..QueueSettings::default()
    }
}

fn db_queue(engine: &Engine, settings: QueueSettings) -> (TransactionQueue, Worker) {
    let store: Arc<dyn JobStore> = Arc::new(DbJobStore::new(engine.database().clone()));
    (
        TransactionQueue::new(store.clone(), settings.clone()),
        Worker::new(engine.clone(), store, settings),
    )
}

#[tokio::test]
async fn worker_settles_queued_deposit() {
    let engine = engine_with_db().await;
    let account = open_account(&engine, "IT-0001", 0).await;
    let (queue, worker) = db_queue(&engine, fast_settings());

    let job_id = queue
        .enqueue(TransactionRequest::deposit(account.id, MoneyCents::new(2_500)))
        .await
        .unwrap();
    assert_eq!(
        queue.status(job_id).await.unwrap().status,
        JobStatusKind::Waiting
    );
    assert_eq!(engine.account(account.id).await.unwrap().balance, MoneyCents::ZERO);

    assert_eq!(worker.run_once().await.unwrap(), Some(job_id));
    assert_eq!(worker.run_once().await.unwrap(), None);

    let status = queue.status(job_id).await.unwrap();
    assert_eq!(status.status, JobStatusKind::Completed);
    assert_eq!(status.error, None);
    let tx = status.result.unwrap();
    assert_eq!(tx.idempotency_key, Some(job_id.to_string()));
    assert_eq!(engine.transaction(tx.id).await.unwrap(), tx);
    assert_eq!(
        engine.account(account.id).await.unwrap().balance,
        MoneyCents::new(2_500)
    );
}

#[tokio::test]
async fn business_failure_is_not_retried() {
    let engine = engine_with_db().await;
    let account = open_account(&engine, "IT-0001", 1_000).await;
    let store = Arc::new(MemoryJobStore::new());
    let queue = TransactionQueue::new(store.clone(), fast_settings());
    let worker = Worker::new(engine.clone(), store.clone(), fast_settings());

    let job_id = queue
        .enqueue(TransactionRequest::withdrawal(account.id, MoneyCents::new(5_000)))
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    let status = queue.status(job_id).await.unwrap();
    assert_eq!(status.status, JobStatusKind::Failed);
    assert!(
        status
            .error
            .as_deref()
            .is_some_and(|msg| msg.contains("Insufficient funds"))
    );
    assert_eq!(store.get(job_id).await.unwrap().unwrap().attempts, 1);
    assert_eq!(worker.run_once().await.unwrap(), None);
}

#[tokio::test]
async fn storage_failure_is_retried_until_attempts_run_out() {
    let engine = engine_with_db().await;
    let account = open_account(&engine, "IT-0001", 0).await;
    let store = Arc::new(MemoryJobStore::new());
    let settings = QueueSettings {
        attempts: 2,
        ..fast_settings()
    };
    let queue = TransactionQueue::new(store.clone(), settings.clone());
    let worker = Worker::new(engine.clone(), store.clone(), settings);

    engine
        .database()
        .execute_unprepared("DROP TABLE transaction_logs")
        .await
        .unwrap();

    let job_id = queue
        .enqueue(TransactionRequest::deposit(account.id, MoneyCents::new(100)))
        .await
        .unwrap();

    worker.run_once().await.unwrap();
    let status = queue.status(job_id).await.unwrap();
    assert_eq!(status.status, JobStatusKind::Delayed);
    assert!(status.error.is_some());

    worker.run_once().await.unwrap();
    let status = queue.status(job_id).await.unwrap();
    assert_eq!(status.status, JobStatusKind::Failed);
    assert!(
        status
            .error
            .as_deref()
            .is_some_and(|msg| msg.starts_with("Transaction failed"))
    );
    assert_eq!(store.get(job_id).await.unwrap().unwrap().attempts, 2);
    assert_eq!(engine.account(account.id).await.unwrap().balance, MoneyCents::ZERO);
}

#[tokio::test]
async fn rerun_after_settlement_does_not_apply_twice() {
    let engine = engine_with_db().await;
    let account = open_account(&engine, "IT-0001", 0).await;
    let (queue, worker) = db_queue(&engine, fast_settings());

    let request = TransactionRequest::deposit(account.id, MoneyCents::new(700));
    let job_id = queue.enqueue(request.clone()).await.unwrap();

    // A previous run committed but stopped before marking the job.
    let settled = engine
        .create_transaction(request.idempotency_key(job_id.to_string()))
        .await
        .unwrap();

    worker.run_once().await.unwrap();
    let status = queue.status(job_id).await.unwrap();
    assert_eq!(status.status, JobStatusKind::Completed);
    assert_eq!(status.result.unwrap().id, settled.id);
    assert_eq!(
        engine.account(account.id).await.unwrap().balance,
        MoneyCents::new(700)
    );
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let engine = engine_with_db().await;
    let (queue, _worker) = db_queue(&engine, fast_settings());
    let status = queue.status(Uuid::new_v4()).await.unwrap();
    assert_eq!(status.status, JobStatusKind::NotFound);
}

#[tokio::test]
async fn only_pending_jobs_can_be_cancelled() {
    let engine = engine_with_db().await;
    let account = open_account(&engine, "IT-0001", 0).await;
    let (queue, worker) = db_queue(&engine, fast_settings());

    let cancelled = queue
        .enqueue(TransactionRequest::deposit(account.id, MoneyCents::new(100)))
        .await
        .unwrap();
    assert!(queue.cancel(cancelled).await.unwrap());
    assert_eq!(
        queue.status(cancelled).await.unwrap().status,
        JobStatusKind::NotFound
    );
    assert_eq!(worker.run_once().await.unwrap(), None);

    let done = queue
        .enqueue(TransactionRequest::deposit(account.id, MoneyCents::new(100)))
        .await
        .unwrap();
    worker.run_once().await.unwrap();
    assert!(!queue.cancel(done).await.unwrap());
    assert_eq!(
        queue.status(done).await.unwrap().status,
        JobStatusKind::Completed
    );
}

#[tokio::test]
async fn removed_on_complete_reports_not_found() {
    let engine = engine_with_db().await;
    let account = open_account(&engine, "IT-0001", 0).await;
    let settings = QueueSettings {
        remove_on_complete: true,
        ..fast_settings()
    };
    let (queue, worker) = db_queue(&engine, settings);

    let job_id = queue
        .enqueue(TransactionRequest::deposit(account.id, MoneyCents::new(100)))
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    assert_eq!(
        queue.status(job_id).await.unwrap().status,
        JobStatusKind::NotFound
    );
    assert_eq!(
        engine.account(account.id).await.unwrap().balance,
        MoneyCents::new(100)
    );
}

#[tokio::test]
async fn worker_pool_drains_queue_and_stops() {
    let engine = engine_with_db().await;
    let x = open_account(&engine, "IT-X", 10_000).await;
    let y = open_account(&engine, "IT-Y", 0).await;
    let (queue, worker) = db_queue(&engine, fast_settings());

    let mut jobs = Vec::new();
    for _ in 0..8 {
        jobs.push(
            queue
                .enqueue(TransactionRequest::transfer(x.id, y.id, MoneyCents::new(1_000)))
                .await
                .unwrap(),
        );
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut done = true;
            for job_id in &jobs {
                if queue.status(*job_id).await.unwrap().status != JobStatusKind::Completed {
                    done = false;
                }
            }
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let x_after = engine.account(x.id).await.unwrap();
    let y_after = engine.account(y.id).await.unwrap();
    assert_eq!(x_after.balance, MoneyCents::new(2_000));
    assert_eq!(y_after.balance, MoneyCents::new(8_000));
}
