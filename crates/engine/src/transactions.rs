//! Transaction primitives.
//!
//! A `Transaction` is the immutable record of one money movement: a deposit
//! or withdrawal touches a single account, a transfer touches two.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Transfer => "transfer",
        }
    }

    /// Whether the source account loses money.
    pub fn debits_source(self) -> bool {
        matches!(self, Self::Withdrawal | Self::Transfer)
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "transfer" => Ok(Self::Transfer),
            other => Err(EngineError::Validation(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

/// A settled transaction or the record of a failed attempt.
///
/// Settled rows always have a positive amount and, for transfers, a
/// destination distinct from the source. Failed-attempt rows keep the amount
/// as requested (possibly zero or negative) and carry no idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub source_account_id: Uuid,
    pub destination_account_id: Option<Uuid>,
    pub amount: MoneyCents,
    pub kind: TransactionKind,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        source_account_id: Uuid,
        destination_account_id: Option<Uuid>,
        amount: MoneyCents,
        kind: TransactionKind,
        description: Option<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_account_id,
            destination_account_id,
            amount,
            kind,
            description,
            idempotency_key,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub source_account_id: String,
    pub destination_account_id: Option<String>,
    pub amount: i64,
    pub kind: String,
    pub description: Option<String>,
    #[sea_orm(unique)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transaction_logs::Entity")]
    TransactionLogs,
}

impl Related<super::transaction_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TransactionLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Transaction> for ActiveModel {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: ActiveValue::Set(tx.id.to_string()),
            source_account_id: ActiveValue::Set(tx.source_account_id.to_string()),
            destination_account_id: ActiveValue::Set(
                tx.destination_account_id.map(|id| id.to_string()),
            ),
            amount: ActiveValue::Set(tx.amount.cents()),
            kind: ActiveValue::Set(tx.kind.as_str().to_string()),
            description: ActiveValue::Set(tx.description.clone()),
            idempotency_key: ActiveValue::Set(tx.idempotency_key.clone()),
            created_at: ActiveValue::Set(tx.created_at),
        }
    }
}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "transaction")?,
            source_account_id: parse_uuid(&model.source_account_id, "source account")?,
            destination_account_id: model
                .destination_account_id
                .as_deref()
                .map(|id| parse_uuid(id, "destination account"))
                .transpose()?,
            amount: MoneyCents::new(model.amount),
            kind: TransactionKind::try_from(model.kind.as_str())?,
            description: model.description,
            idempotency_key: model.idempotency_key,
            created_at: model.created_at,
        })
    }
}
