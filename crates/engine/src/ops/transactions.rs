//! Transaction orchestrator.
//!
//! One call to [`Engine::create_transaction`] is one unit: validation, balance
//! legs, the transaction row and its ledger entries commit together or not at
//! all. Failed attempts leave an audit trail written in a separate database
//! transaction.

use sea_orm::{ActiveModelTrait, Condition, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    Account, EngineError, LogStatus, ResultEngine, Transaction, TransactionKind,
    TransactionRequest, transactions, validate,
};

use super::{
    Engine,
    accounts::{find_account, require_account},
    balances::update_balance,
    ledger::create_log,
    with_tx,
};

async fn find_by_idempotency_key<C: ConnectionTrait>(
    db: &C,
    key: &str,
) -> ResultEngine<Option<Transaction>> {
    transactions::Entity::find()
        .filter(transactions::Column::IdempotencyKey.eq(key))
        .one(db)
        .await?
        .map(Transaction::try_from)
        .transpose()
}

impl Engine {
    /// Validates and settles a transaction.
    ///
    /// Business rejections come back unchanged; storage faults are wrapped in
    /// [`EngineError::TransactionFailed`]. Either way the attempt is recorded
    /// with `failed` ledger entries when the source account exists.
    pub async fn create_transaction(
        &self,
        request: TransactionRequest,
    ) -> ResultEngine<Transaction> {
        tracing::info!(
            kind = request.kind.as_str(),
            amount = %request.amount,
            source = %request.source_account_id,
            destination = ?request.destination_account_id,
            "processing transaction"
        );

        let (request, outcome) = match request.clone().normalize() {
            Ok(normalized) => {
                let outcome = self.settle(&normalized).await;
                (normalized, outcome)
            }
            Err(err) => (request, Err(err)),
        };

        match outcome {
            Ok(transaction) => Ok(transaction),
            Err(err) => {
                tracing::warn!(
                    kind = request.kind.as_str(),
                    source = %request.source_account_id,
                    "transaction rejected: {err}"
                );
                if let Err(record_err) = self.record_failed_attempt(&request, &err).await {
                    tracing::error!("failed to record failed transaction attempt: {record_err}");
                }
                Err(err.into_transaction_failure())
            }
        }
    }

    /// [`Engine::create_transaction`], re-run from scratch on retryable errors
    /// with exponential backoff.
    pub async fn create_transaction_with_retry(
        &self,
        request: TransactionRequest,
    ) -> ResultEngine<Transaction> {
        let mut retry = 0;
        loop {
            match self.create_transaction(request.clone()).await {
                Err(err) if err.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    tracing::debug!(retry, ?delay, "retrying transaction: {err}");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn settle(&self, request: &TransactionRequest) -> ResultEngine<Transaction> {
        with_tx!(self, |db_tx| {
            if let Some(key) = &request.idempotency_key
                && let Some(existing) = find_by_idempotency_key(&db_tx, key).await?
            {
                tracing::info!(
                    transaction_id = %existing.id,
                    "idempotency key {key} already settled"
                );
                return Ok(existing);
            }

            let source = require_account(&db_tx, request.source_account_id).await?;
            let destination = match request.destination_account_id {
                Some(id) => find_account(&db_tx, id).await?,
                None => None,
            };
            validate(request, &source, destination.as_ref())?;

            let mut legs: Vec<(&Account, bool)> = vec![(&source, request.kind.debits_source())];
            if request.kind == TransactionKind::Transfer
                && let Some(destination) = &destination
            {
                legs.push((destination, false));
            }

            let mut settled = Vec::with_capacity(legs.len());
            for (account, is_debit) in legs {
                let updated = update_balance(&db_tx, account.id, request.amount, is_debit).await?;
                let previous = if is_debit {
                    updated.balance + request.amount
                } else {
                    updated.balance - request.amount
                };
                settled.push((previous, updated));
            }

            let transaction = Transaction::new(
                source.id,
                destination.as_ref().map(|d| d.id),
                request.amount,
                request.kind,
                request.description.clone(),
                request.idempotency_key.clone(),
            );
            transactions::ActiveModel::from(&transaction)
                .insert(&db_tx)
                .await?;

            for (previous, updated) in &settled {
                let current = require_account(&db_tx, updated.id).await?;
                create_log(
                    &db_tx,
                    &transaction,
                    current.id,
                    *previous,
                    current.balance,
                    LogStatus::Success,
                    None,
                )
                .await?;
            }

            tracing::info!(
                transaction_id = %transaction.id,
                kind = transaction.kind.as_str(),
                amount = %transaction.amount,
                "transaction settled"
            );
            Ok(transaction)
        })
    }

    /// Audit row plus `failed` entries for an attempt that did not settle.
    ///
    /// The row never carries the idempotency key, so a later retry with the
    /// same key still settles. The destination is only kept for transfers to
    /// another existing account.
    async fn record_failed_attempt(
        &self,
        request: &TransactionRequest,
        cause: &EngineError,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let Some(source) = find_account(&db_tx, request.source_account_id).await? else {
                tracing::debug!(
                    source = %request.source_account_id,
                    "source account missing, failed attempt not recorded"
                );
                return Ok(());
            };
            let destination = match request.destination_account_id {
                Some(id) if request.kind == TransactionKind::Transfer && id != source.id => {
                    find_account(&db_tx, id).await?
                }
                _ => None,
            };

            let transaction = Transaction::new(
                source.id,
                destination.as_ref().map(|d| d.id),
                request.amount,
                request.kind,
                request.description.clone(),
                None,
            );
            transactions::ActiveModel::from(&transaction)
                .insert(&db_tx)
                .await?;

            let message = cause.to_string();
            let affected = std::iter::once(source).chain(destination);
            for account in affected {
                create_log(
                    &db_tx,
                    &transaction,
                    account.id,
                    account.balance,
                    account.balance,
                    LogStatus::Failed,
                    Some(message.clone()),
                )
                .await?;
            }
            Ok(())
        })
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> ResultEngine<Transaction> {
        transactions::Entity::find_by_id(transaction_id.to_string())
            .one(&self.database)
            .await?
            .map(Transaction::try_from)
            .transpose()?
            .ok_or_else(|| EngineError::KeyNotFound(format!("transaction {transaction_id}")))
    }

    /// All transactions, newest first. Includes failed attempts.
    pub async fn list_transactions(&self) -> ResultEngine<Vec<Transaction>> {
        transactions::Entity::find()
            .order_by_desc(transactions::Column::CreatedAt)
            .order_by_desc(transactions::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }

    /// Transactions where the account is the source or the destination,
    /// newest first.
    pub async fn transactions_for_account(
        &self,
        account_id: Uuid,
    ) -> ResultEngine<Vec<Transaction>> {
        let id = account_id.to_string();
        transactions::Entity::find()
            .filter(
                Condition::any()
                    .add(transactions::Column::SourceAccountId.eq(id.clone()))
                    .add(transactions::Column::DestinationAccountId.eq(id)),
            )
            .order_by_desc(transactions::Column::CreatedAt)
            .order_by_desc(transactions::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Transaction::try_from)
            .collect()
    }
}
