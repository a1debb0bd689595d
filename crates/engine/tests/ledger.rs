use std::collections::HashSet;

use sea_orm::Database;

use engine::{
    Account, Engine, EngineError, ErrorKind, LogFilter, MoneyCents, NewAccountCmd,
    TransactionRequest,
};
use migration::MigratorTrait;

async fn engine_with_db() -> Engine {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Engine::builder().database(db).build().await.unwrap()
}

async fn open_account(engine: &Engine, number: &str) -> Account {
    engine
        .create_account(NewAccountCmd::new(number))
        .await
        .unwrap()
}

async fn deposit(engine: &Engine, account: &Account, cents: i64) {
    engine
        .create_transaction(TransactionRequest::deposit(
            account.id,
            MoneyCents::new(cents),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn filter_by_account_number() {
    let engine = engine_with_db().await;
    let a = open_account(&engine, "IT-A").await;
    let b = open_account(&engine, "IT-B").await;
    deposit(&engine, &a, 100).await;
    deposit(&engine, &b, 200).await;
    deposit(&engine, &a, 300).await;

    let logs = engine
        .query_logs(&LogFilter::default().account_number("IT-A"))
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|log| log.account_id == a.id));

    let all = engine.query_logs(&LogFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let none = engine
        .query_logs(&LogFilter::default().account_number("IT-MISSING"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn logs_are_newest_first() {
    let engine = engine_with_db().await;
    let a = open_account(&engine, "IT-A").await;
    for cents in [100, 200, 300] {
        deposit(&engine, &a, cents).await;
    }

    let logs = engine.logs_for_account_number("IT-A").await.unwrap();
    let new_balances: Vec<i64> = logs.iter().map(|log| log.new_balance.cents()).collect();
    assert_eq!(new_balances, vec![600, 300, 100]);
    assert!(logs.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn date_range_is_inclusive() {
    let engine = engine_with_db().await;
    let a = open_account(&engine, "IT-A").await;
    for cents in [100, 200, 300] {
        deposit(&engine, &a, cents).await;
    }
    let logs = engine.logs_for_account_number("IT-A").await.unwrap();
    let middle = &logs[1];

    let exact = engine
        .query_logs(
            &LogFilter::default()
                .since(middle.created_at)
                .until(middle.created_at),
        )
        .await
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, middle.id);

    let from_middle = engine
        .query_logs(
            &LogFilter::default()
                .account_number("IT-A")
                .since(middle.created_at),
        )
        .await
        .unwrap();
    assert_eq!(from_middle.len(), 2);

    let until_middle = engine
        .query_logs(&LogFilter::default().until(middle.created_at))
        .await
        .unwrap();
    assert_eq!(until_middle.len(), 2);
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let engine = engine_with_db().await;
    let now = chrono::Utc::now();
    let err = engine
        .query_logs(
            &LogFilter::default()
                .since(now)
                .until(now - chrono::Duration::minutes(1)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn pages_cover_every_log_once() {
    let engine = engine_with_db().await;
    let a = open_account(&engine, "IT-A").await;
    for cents in 1..=5 {
        deposit(&engine, &a, cents).await;
    }
    let filter = LogFilter::default().account_number("IT-A");

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let (page, next) = engine
            .query_logs_page(&filter, 2, cursor.as_deref())
            .await
            .unwrap();
        pages += 1;
        assert!(page.len() <= 2);
        seen.extend(page.into_iter().map(|log| log.id));
        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 5);
    let all: Vec<_> = engine
        .query_logs(&filter)
        .await
        .unwrap()
        .into_iter()
        .map(|log| log.id)
        .collect();
    assert_eq!(seen, all);
}

#[tokio::test]
async fn garbage_cursor_is_rejected() {
    let engine = engine_with_db().await;
    let err = engine
        .query_logs_page(&LogFilter::default(), 10, Some("%%%"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCursor(_)));
}
