//! Command structs for engine operations.
//!
//! These types group parameters for write operations, keeping call sites
//! readable and avoiding long argument lists. `TransactionRequest` is also the
//! payload stored in queued jobs, so it is serializable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents, ResultEngine, TransactionKind, util::normalize_optional_text};

/// A proposed money movement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub source_account_id: Uuid,
    pub destination_account_id: Option<Uuid>,
    pub amount: MoneyCents,
    pub kind: TransactionKind,
    pub description: Option<String>,
    /// When set, a second request with the same key returns the transaction
    /// settled by the first one instead of moving money again.
    pub idempotency_key: Option<String>,
}

impl TransactionRequest {
    #[must_use]
    pub fn new(source_account_id: Uuid, amount: MoneyCents, kind: TransactionKind) -> Self {
        Self {
            source_account_id,
            destination_account_id: None,
            amount,
            kind,
            description: None,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub fn deposit(account_id: Uuid, amount: MoneyCents) -> Self {
        Self::new(account_id, amount, TransactionKind::Deposit)
    }

    #[must_use]
    pub fn withdrawal(account_id: Uuid, amount: MoneyCents) -> Self {
        Self::new(account_id, amount, TransactionKind::Withdrawal)
    }

    #[must_use]
    pub fn transfer(from: Uuid, to: Uuid, amount: MoneyCents) -> Self {
        Self::new(from, amount, TransactionKind::Transfer).destination(to)
    }

    #[must_use]
    pub fn destination(mut self, account_id: Uuid) -> Self {
        self.destination_account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Rejects self-contradictory requests and trims free text.
    ///
    /// Business rules (funds, destination resolution, positive amount) are
    /// left to the validator.
    pub(crate) fn normalize(mut self) -> ResultEngine<Self> {
        if self.kind != TransactionKind::Transfer && self.destination_account_id.is_some() {
            return Err(EngineError::Validation(format!(
                "destination account is only allowed for transfers, got {}",
                self.kind.as_str()
            )));
        }
        self.description = normalize_optional_text(self.description.as_deref());
        self.idempotency_key = normalize_optional_text(self.idempotency_key.as_deref());
        Ok(self)
    }
}

/// Create a new account.
#[derive(Clone, Debug)]
pub struct NewAccountCmd {
    pub account_number: String,
    pub initial_balance: MoneyCents,
    pub owners: Vec<Uuid>,
}

impl NewAccountCmd {
    #[must_use]
    pub fn new(account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            initial_balance: MoneyCents::ZERO,
            owners: Vec::new(),
        }
    }

    #[must_use]
    pub fn initial_balance(mut self, balance: MoneyCents) -> Self {
        self.initial_balance = balance;
        self
    }

    #[must_use]
    pub fn owner(mut self, user_id: Uuid) -> Self {
        self.owners.push(user_id);
        self
    }
}
