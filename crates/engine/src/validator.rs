//! Transaction validation rules.
//!
//! Pure checks over a request and the account snapshots it refers to. The
//! first violated rule wins, in this order: transfer shape, available funds,
//! positive amount.

use crate::{Account, EngineError, ResultEngine, TransactionKind, TransactionRequest};

pub fn validate(
    request: &TransactionRequest,
    source: &Account,
    destination: Option<&Account>,
) -> ResultEngine<()> {
    tracing::debug!(
        kind = request.kind.as_str(),
        amount = %request.amount,
        source = %source.id,
        "validating transaction"
    );

    if request.kind == TransactionKind::Transfer {
        if request.destination_account_id.is_none() {
            return Err(EngineError::InvalidTransaction(
                "destination account is required for transfers".to_string(),
            ));
        }
        let destination = destination.ok_or_else(|| {
            EngineError::InvalidTransaction("destination account not found".to_string())
        })?;
        if destination.id == source.id {
            return Err(EngineError::InvalidTransaction(
                "cannot transfer to the same account".to_string(),
            ));
        }
    }

    // The balance engine re-checks against its own read; this is the early
    // rejection on the snapshot.
    if request.kind.debits_source() && source.balance < request.amount {
        return Err(EngineError::InsufficientFunds {
            account_id: source.id,
            required: request.amount,
            available: source.balance,
        });
    }

    if !request.amount.is_positive() {
        return Err(EngineError::InvalidTransaction(
            "transaction amount must be positive".to_string(),
        ));
    }

    Ok(())
}
