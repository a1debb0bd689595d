//! Ledger writer and queries.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, Condition, Select, ConnectionTrait, JoinType, QueryFilter, QueryOrder, QuerySelect,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, LogMetadata, LogStatus, MoneyCents, ResultEngine, Transaction, TransactionLog,
    accounts, transaction_logs,
};

use super::Engine;

/// Filters for ledger queries. All present fields must match.
///
/// `from` and `to` are both inclusive, in UTC.
#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub account_number: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    fn validate(&self) -> ResultEngine<()> {
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from > to
        {
            return Err(EngineError::Validation(
                "invalid range: from must not be after to".to_string(),
            ));
        }
        Ok(())
    }
}

/// Appends one ledger entry for `account_id`, through the caller's connection.
pub(crate) async fn create_log<C: ConnectionTrait>(
    db: &C,
    transaction: &Transaction,
    account_id: Uuid,
    previous_balance: MoneyCents,
    new_balance: MoneyCents,
    status: LogStatus,
    error_message: Option<String>,
) -> ResultEngine<TransactionLog> {
    let now = Utc::now();
    let log = TransactionLog {
        id: Uuid::new_v4(),
        transaction_id: transaction.id,
        account_id,
        previous_balance,
        new_balance,
        status,
        error_message,
        metadata: LogMetadata {
            transaction_type: transaction.kind,
            description: transaction.description.clone(),
            timestamp: now,
        },
        created_at: now,
    };
    transaction_logs::ActiveModel::try_from(&log)?
        .insert(db)
        .await?;
    tracing::debug!(
        transaction_id = %transaction.id,
        account_id = %account_id,
        status = log.status.as_str(),
        "ledger entry written"
    );
    Ok(log)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LogsCursor {
    created_at: DateTime<Utc>,
    log_id: String,
}

impl LogsCursor {
    fn encode(&self) -> ResultEngine<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|_| EngineError::InvalidCursor("invalid logs cursor".to_string()))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    fn decode(input: &str) -> ResultEngine<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(input.as_bytes())
            .map_err(|_| EngineError::InvalidCursor("invalid logs cursor".to_string()))?;
        serde_json::from_slice::<Self>(&bytes)
            .map_err(|_| EngineError::InvalidCursor("invalid logs cursor".to_string()))
    }
}

fn filtered_logs(filter: &LogFilter) -> Select<transaction_logs::Entity> {
    let mut query = transaction_logs::Entity::find();
    if let Some(account_number) = &filter.account_number {
        query = query
            .join(
                JoinType::InnerJoin,
                transaction_logs::Relation::Accounts.def(),
            )
            .filter(accounts::Column::AccountNumber.eq(account_number.trim()));
    }
    if let Some(from) = filter.from {
        query = query.filter(transaction_logs::Column::CreatedAt.gte(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(transaction_logs::Column::CreatedAt.lte(to));
    }
    query
        .order_by_desc(transaction_logs::Column::CreatedAt)
        .order_by_desc(transaction_logs::Column::Id)
}

impl Engine {
    /// Ledger entries matching `filter`, newest first.
    pub async fn query_logs(&self, filter: &LogFilter) -> ResultEngine<Vec<TransactionLog>> {
        filter.validate()?;
        filtered_logs(filter)
            .all(&self.database)
            .await?
            .into_iter()
            .map(TransactionLog::try_from)
            .collect()
    }

    /// Ledger entries matching `filter`, with cursor-based pagination.
    ///
    /// Pagination is newest → older by `(created_at DESC, log_id DESC)`.
    pub async fn query_logs_page(
        &self,
        filter: &LogFilter,
        limit: u64,
        cursor: Option<&str>,
    ) -> ResultEngine<(Vec<TransactionLog>, Option<String>)> {
        filter.validate()?;

        let mut query = filtered_logs(filter).limit(limit.saturating_add(1));
        if let Some(cursor) = cursor {
            let cursor = LogsCursor::decode(cursor)?;
            query = query.filter(
                Condition::any()
                    .add(transaction_logs::Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(transaction_logs::Column::CreatedAt.eq(cursor.created_at))
                            .add(transaction_logs::Column::Id.lt(cursor.log_id)),
                    ),
            );
        }

        let rows = query.all(&self.database).await?;
        let has_more = rows.len() > limit as usize;

        let mut out = Vec::with_capacity(rows.len().min(limit as usize));
        for model in rows.into_iter().take(limit as usize) {
            out.push(TransactionLog::try_from(model)?);
        }

        let next_cursor = if has_more {
            out.last()
                .map(|log| LogsCursor {
                    created_at: log.created_at,
                    log_id: log.id.to_string(),
                })
                .map(|c| c.encode())
                .transpose()?
        } else {
            None
        };

        Ok((out, next_cursor))
    }

    pub async fn logs_for_account_number(
        &self,
        account_number: &str,
    ) -> ResultEngine<Vec<TransactionLog>> {
        self.query_logs(&LogFilter::default().account_number(account_number))
            .await
    }

    /// Entries written for one transaction (or one failed attempt).
    pub async fn logs_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> ResultEngine<Vec<TransactionLog>> {
        transaction_logs::Entity::find()
            .filter(transaction_logs::Column::TransactionId.eq(transaction_id.to_string()))
            .order_by_asc(transaction_logs::Column::CreatedAt)
            .order_by_asc(transaction_logs::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(TransactionLog::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_rejects_garbage() {
        let err = LogsCursor::decode("not a cursor").unwrap_err();
        assert!(matches!(err, EngineError::InvalidCursor(_)));
    }

    #[test]
    fn inverted_range_is_invalid() {
        let now = Utc::now();
        let filter = LogFilter::default()
            .since(now)
            .until(now - chrono::Duration::seconds(1));
        assert!(matches!(filter.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn single_instant_range_is_valid() {
        let now = Utc::now();
        assert!(LogFilter::default().since(now).until(now).validate().is_ok());
    }
}
