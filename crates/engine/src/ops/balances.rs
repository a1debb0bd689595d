//! Balance update engine.
//!
//! Every balance change goes through [`update_balance`], inside the caller's
//! database transaction. Concurrency control is optimistic: the write is gated
//! on the version read just before, and a write that matches no row means
//! another writer got there first.

use chrono::Utc;
use sea_orm::{ConnectionTrait, QueryFilter, prelude::*, sea_query::Expr};
use uuid::Uuid;

use crate::{Account, EngineError, MoneyCents, ResultEngine, accounts};

use super::accounts::require_account;

/// Applies one leg (debit or credit) to an account and returns the account as
/// stored afterwards.
///
/// Errors:
/// - `KeyNotFound` when the account does not exist;
/// - `InsufficientFunds` when a debit would make the balance negative;
/// - `ConcurrentUpdate` when the version changed between read and write;
/// - `Database` for storage faults, unchanged.
pub(crate) async fn update_balance<C: ConnectionTrait>(
    db: &C,
    account_id: Uuid,
    amount: MoneyCents,
    is_debit: bool,
) -> ResultEngine<Account> {
    let current = require_account(db, account_id).await?;

    let new_balance = if is_debit {
        if current.balance < amount {
            return Err(EngineError::InsufficientFunds {
                account_id,
                required: amount,
                available: current.balance,
            });
        }
        current.balance.checked_sub(amount)
    } else {
        current.balance.checked_add(amount)
    }
    .ok_or_else(|| {
        EngineError::InvalidTransaction(format!("balance overflow on account {account_id}"))
    })?;

    write_balance(db, &current, new_balance).await?;
    tracing::debug!(
        account_id = %account_id,
        previous = %current.balance,
        new = %new_balance,
        version = current.version + 1,
        "{} applied",
        if is_debit { "debit" } else { "credit" }
    );

    require_account(db, account_id).await
}

/// Version-gated write of a new balance computed from `snapshot`.
pub(crate) async fn write_balance<C: ConnectionTrait>(
    db: &C,
    snapshot: &Account,
    new_balance: MoneyCents,
) -> ResultEngine<()> {
    let result = accounts::Entity::update_many()
        .col_expr(accounts::Column::Balance, Expr::value(new_balance.cents()))
        .col_expr(
            accounts::Column::Version,
            Expr::col(accounts::Column::Version).add(1),
        )
        .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(accounts::Column::Id.eq(snapshot.id.to_string()))
        .filter(accounts::Column::Version.eq(snapshot.version))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        tracing::warn!(
            account_id = %snapshot.id,
            version = snapshot.version,
            "concurrent update detected"
        );
        return Err(EngineError::ConcurrentUpdate {
            account_id: snapshot.id,
            expected_version: snapshot.version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use migration::MigratorTrait;
    use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, TransactionTrait};

    use super::*;

    async fn db_with_account(cents: i64) -> (DatabaseConnection, Account) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let account = Account::new("ACC-1".to_string(), MoneyCents::new(cents));
        accounts::ActiveModel::from(&account).insert(&db).await.unwrap();
        (db, account)
    }

    #[tokio::test]
    async fn credit_adds_amount_and_bumps_version() {
        let (db, account) = db_with_account(100_000).await;

        let db_tx = db.begin().await.unwrap();
        let updated = update_balance(&db_tx, account.id, MoneyCents::new(100_000), false)
            .await
            .unwrap();
        db_tx.commit().await.unwrap();

        assert_eq!(updated.balance, MoneyCents::new(200_000));
        assert_eq!(updated.version, account.version + 1);
    }

    #[tokio::test]
    async fn debit_below_zero_is_rejected() {
        let (db, account) = db_with_account(100_000).await;

        let db_tx = db.begin().await.unwrap();
        let err = update_balance(&db_tx, account.id, MoneyCents::new(100_001), true)
            .await
            .unwrap_err();
        db_tx.rollback().await.unwrap();

        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                account_id: account.id,
                required: MoneyCents::new(100_001),
                available: MoneyCents::new(100_000),
            }
        );
        let stored = require_account(&db, account.id).await.unwrap();
        assert_eq!(stored.balance, MoneyCents::new(100_000));
        assert_eq!(stored.version, account.version);
    }

    #[tokio::test]
    async fn stale_snapshot_write_is_a_conflict() {
        let (db, account) = db_with_account(100_000).await;
        let stale = require_account(&db, account.id).await.unwrap();

        update_balance(&db, account.id, MoneyCents::new(500), true)
            .await
            .unwrap();

        let err = write_balance(&db, &stale, MoneyCents::new(0)).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::ConcurrentUpdate {
                account_id: account.id,
                expected_version: stale.version,
            }
        );

        let stored = require_account(&db, account.id).await.unwrap();
        assert_eq!(stored.balance, MoneyCents::new(99_500));
        assert_eq!(stored.version, stale.version + 1);
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let (db, _account) = db_with_account(0).await;
        let err = update_balance(&db, Uuid::new_v4(), MoneyCents::new(1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::KeyNotFound(_)));
    }
}
