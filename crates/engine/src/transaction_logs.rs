//! Ledger entries.
//!
//! A [`TransactionLog`] is the audit trail of one transaction attempt on one
//! account: the balance right before and right after, and whether the attempt
//! settled. Rows are append-only.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents, TransactionKind, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for LogStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(EngineError::Validation(format!("invalid log status: {other}"))),
        }
    }
}

/// Free-form context stored next to each entry (as JSON text).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    pub transaction_type: TransactionKind,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub previous_balance: MoneyCents,
    pub new_balance: MoneyCents,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub metadata: LogMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transaction_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub transaction_id: String,
    pub account_id: String,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub metadata: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::transactions::Entity",
        from = "Column::TransactionId",
        to = "super::transactions::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Transactions,
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Accounts,
}

impl Related<super::transactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&TransactionLog> for ActiveModel {
    type Error = EngineError;

    fn try_from(log: &TransactionLog) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ActiveValue::Set(log.id.to_string()),
            transaction_id: ActiveValue::Set(log.transaction_id.to_string()),
            account_id: ActiveValue::Set(log.account_id.to_string()),
            previous_balance: ActiveValue::Set(log.previous_balance.cents()),
            new_balance: ActiveValue::Set(log.new_balance.cents()),
            status: ActiveValue::Set(log.status.as_str().to_string()),
            error_message: ActiveValue::Set(log.error_message.clone()),
            metadata: ActiveValue::Set(serde_json::to_string(&log.metadata)?),
            created_at: ActiveValue::Set(log.created_at),
        })
    }
}

impl TryFrom<Model> for TransactionLog {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "transaction log")?,
            transaction_id: parse_uuid(&model.transaction_id, "transaction")?,
            account_id: parse_uuid(&model.account_id, "account")?,
            previous_balance: MoneyCents::new(model.previous_balance),
            new_balance: MoneyCents::new(model.new_balance),
            status: LogStatus::try_from(model.status.as_str())?,
            error_message: model.error_message,
            metadata: serde_json::from_str(&model.metadata)?,
            created_at: model.created_at,
        })
    }
}
