//! Transactional money-movement engine.
//!
//! The [`Engine`] validates proposed transactions, applies their balance legs
//! with version-gated writes, records the transaction and one ledger entry per
//! affected account, all inside a single database transaction. The [`queue`]
//! module runs the same unit asynchronously behind a job store with retries.

pub use accounts::Account;
pub use commands::{NewAccountCmd, TransactionRequest};
pub use error::{EngineError, ErrorKind};
pub use money::MoneyCents;
pub use ops::{Engine, EngineBuilder, LogFilter};
pub use settings::{QueueSettings, RetrySettings};
pub use transaction_logs::{LogMetadata, LogStatus, TransactionLog};
pub use transactions::{Transaction, TransactionKind};
pub use users::User;
pub use validator::validate;

mod account_users;
mod accounts;
mod commands;
mod error;
mod money;
mod ops;
pub mod queue;
mod settings;
mod transaction_logs;
mod transactions;
mod users;
mod util;
mod validator;

type ResultEngine<T> = Result<T, EngineError>;
