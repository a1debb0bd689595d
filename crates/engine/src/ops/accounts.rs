use chrono::Utc;
use sea_orm::{ConnectionTrait, JoinType, QueryFilter, QueryOrder, QuerySelect, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    Account, EngineError, NewAccountCmd, ResultEngine, User, account_users, accounts, users,
    util::normalize_required_text,
};

use super::{Engine, with_tx};

/// Loads an account through any connection (plain or transactional).
pub(super) async fn find_account<C: ConnectionTrait>(
    db: &C,
    account_id: Uuid,
) -> ResultEngine<Option<Account>> {
    accounts::Entity::find_by_id(account_id.to_string())
        .one(db)
        .await?
        .map(Account::try_from)
        .transpose()
}

pub(super) async fn require_account<C: ConnectionTrait>(
    db: &C,
    account_id: Uuid,
) -> ResultEngine<Account> {
    find_account(db, account_id)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound(format!("account {account_id}")))
}

impl Engine {
    pub async fn create_user(&self, username: &str) -> ResultEngine<User> {
        let username = normalize_required_text(username, "username")?;
        with_tx!(self, |db_tx| {
            let existing = users::Entity::find()
                .filter(users::Column::Username.eq(username.clone()))
                .one(&db_tx)
                .await?;
            if existing.is_some() {
                return Err(EngineError::ExistingKey(username));
            }

            let user = User {
                id: Uuid::new_v4(),
                username: username.clone(),
                created_at: Utc::now(),
            };
            users::ActiveModel::from(&user).insert(&db_tx).await?;
            tracing::info!(user_id = %user.id, "created user {}", user.username);
            Ok(user)
        })
    }

    /// Creates an account with its owners.
    ///
    /// Account numbers are unique; every owner must already exist.
    pub async fn create_account(&self, cmd: NewAccountCmd) -> ResultEngine<Account> {
        let NewAccountCmd {
            account_number,
            initial_balance,
            owners,
        } = cmd;
        let account_number = normalize_required_text(&account_number, "account number")?;
        if initial_balance.is_negative() {
            return Err(EngineError::Validation(
                "initial balance must not be negative".to_string(),
            ));
        }

        with_tx!(self, |db_tx| {
            let existing = accounts::Entity::find()
                .filter(accounts::Column::AccountNumber.eq(account_number.clone()))
                .one(&db_tx)
                .await?;
            if existing.is_some() {
                return Err(EngineError::ExistingKey(account_number));
            }

            let account = Account::new(account_number.clone(), initial_balance);
            accounts::ActiveModel::from(&account).insert(&db_tx).await?;

            for user_id in &owners {
                link_owner(&db_tx, account.id, *user_id).await?;
            }

            tracing::info!(
                account_id = %account.id,
                owners = owners.len(),
                "created account {}",
                account.account_number
            );
            Ok(account)
        })
    }

    pub async fn add_account_owner(&self, account_id: Uuid, user_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            require_account(&db_tx, account_id).await?;
            let already = account_users::Entity::find_by_id((
                account_id.to_string(),
                user_id.to_string(),
            ))
            .one(&db_tx)
            .await?;
            if already.is_some() {
                return Err(EngineError::ExistingKey(format!(
                    "owner {user_id} of account {account_id}"
                )));
            }
            link_owner(&db_tx, account_id, user_id).await
        })
    }

    /// Current snapshot of an account. Reads are not locked; use the
    /// transactional paths for read-modify-write.
    pub async fn account(&self, account_id: Uuid) -> ResultEngine<Account> {
        require_account(&self.database, account_id).await
    }

    pub async fn account_by_number(&self, account_number: &str) -> ResultEngine<Account> {
        accounts::Entity::find()
            .filter(accounts::Column::AccountNumber.eq(account_number.trim()))
            .one(&self.database)
            .await?
            .map(Account::try_from)
            .transpose()?
            .ok_or_else(|| EngineError::KeyNotFound(format!("account {account_number}")))
    }

    pub async fn accounts_for_user(&self, user_id: Uuid) -> ResultEngine<Vec<Account>> {
        accounts::Entity::find()
            .join(JoinType::InnerJoin, accounts::Relation::AccountUsers.def())
            .filter(account_users::Column::UserId.eq(user_id.to_string()))
            .order_by_asc(accounts::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    /// Owners of an account, by username.
    pub async fn account_owners(&self, account_id: Uuid) -> ResultEngine<Vec<User>> {
        users::Entity::find()
            .join(JoinType::InnerJoin, users::Relation::AccountUsers.def())
            .filter(account_users::Column::AccountId.eq(account_id.to_string()))
            .order_by_asc(users::Column::Username)
            .all(&self.database)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }
}

async fn link_owner<C: ConnectionTrait>(db: &C, account_id: Uuid, user_id: Uuid) -> ResultEngine<()> {
    users::Entity::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound(format!("user {user_id}")))?;

    account_users::ActiveModel {
        account_id: sea_orm::ActiveValue::Set(account_id.to_string()),
        user_id: sea_orm::ActiveValue::Set(user_id.to_string()),
    }
    .insert(db)
    .await?;
    Ok(())
}
