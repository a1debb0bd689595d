//! Job store backed by the `jobs` table.
//!
//! Claims are state-gated conditional updates: a worker only owns a job when
//! its `UPDATE ... WHERE state = <observed state>` affected the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
    sea_query::{Expr, SimpleExpr},
};

use crate::{EngineError, ResultEngine, Transaction, TransactionRequest, util::parse_uuid};

use super::{Job, JobId, JobState, JobStore};

pub(crate) mod jobs {
    use sea_orm::{ActiveValue, entity::prelude::*};

    use crate::EngineError;

    use super::super::Job;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "jobs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub payload: String,
        pub state: String,
        pub attempts: i32,
        pub run_at: DateTimeUtc,
        pub result: Option<String>,
        pub failed_reason: Option<String>,
        pub created_at: DateTimeUtc,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<&Job> for ActiveModel {
        type Error = EngineError;

        fn try_from(job: &Job) -> Result<Self, Self::Error> {
            Ok(Self {
                id: ActiveValue::Set(job.id.to_string()),
                payload: ActiveValue::Set(serde_json::to_string(&job.payload)?),
                state: ActiveValue::Set(job.state.as_str().to_string()),
                attempts: ActiveValue::Set(i32::try_from(job.attempts).unwrap_or(i32::MAX)),
                run_at: ActiveValue::Set(job.run_at),
                result: ActiveValue::Set(
                    job.result.as_ref().map(serde_json::to_string).transpose()?,
                ),
                failed_reason: ActiveValue::Set(job.failed_reason.clone()),
                created_at: ActiveValue::Set(job.created_at),
                updated_at: ActiveValue::Set(job.updated_at),
            })
        }
    }
}

impl TryFrom<jobs::Model> for Job {
    type Error = EngineError;

    fn try_from(model: jobs::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "job")?,
            payload: serde_json::from_str(&model.payload)?,
            state: JobState::try_from(model.state.as_str())?,
            attempts: u32::try_from(model.attempts).unwrap_or_default(),
            run_at: model.run_at,
            result: model
                .result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            failed_reason: model.failed_reason,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Durable job store; survives restarts and can be shared by several worker
/// processes pointing at the same database.
///
/// Outcome writes only land on jobs that are still `active`, so a worker whose
/// job was requeued after its lease ran out cannot overwrite the next run.
#[derive(Clone, Debug)]
pub struct DbJobStore {
    database: DatabaseConnection,
}

impl DbJobStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    /// Moves one `active` job to `state`, setting the extra columns too.
    ///
    /// A missing job is `KeyNotFound`; a job no longer `active` is left as is.
    async fn transition(
        &self,
        id: JobId,
        state: JobState,
        columns: Vec<(jobs::Column, SimpleExpr)>,
    ) -> ResultEngine<()> {
        let mut update = jobs::Entity::update_many()
            .col_expr(jobs::Column::State, Expr::value(state.as_str()))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()));
        for (column, value) in columns {
            update = update.col_expr(column, value);
        }
        let result = update
            .filter(jobs::Column::Id.eq(id.to_string()))
            .filter(jobs::Column::State.eq(JobState::Active.as_str()))
            .exec(&self.database)
            .await?;
        if result.rows_affected > 0 {
            return Ok(());
        }

        match self.get(id).await? {
            Some(job) => {
                tracing::warn!(
                    job_id = %id,
                    state = job.state.as_str(),
                    "job no longer active, outcome dropped"
                );
                Ok(())
            }
            None => Err(EngineError::KeyNotFound(format!("job {id}"))),
        }
    }
}

#[async_trait]
impl JobStore for DbJobStore {
    async fn enqueue(&self, request: TransactionRequest) -> ResultEngine<JobId> {
        let job = Job::new(request);
        jobs::ActiveModel::try_from(&job)?
            .insert(&self.database)
            .await?;
        Ok(job.id)
    }

    async fn dequeue(&self) -> ResultEngine<Option<Job>> {
        loop {
            let now = Utc::now();
            let candidate = jobs::Entity::find()
                .filter(
                    Condition::any()
                        .add(jobs::Column::State.eq(JobState::Waiting.as_str()))
                        .add(
                            Condition::all()
                                .add(jobs::Column::State.eq(JobState::Delayed.as_str()))
                                .add(jobs::Column::RunAt.lte(now)),
                        ),
                )
                .order_by_asc(jobs::Column::RunAt)
                .order_by_asc(jobs::Column::CreatedAt)
                .limit(1)
                .one(&self.database)
                .await?;
            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let claimed = jobs::Entity::update_many()
                .col_expr(jobs::Column::State, Expr::value(JobState::Active.as_str()))
                .col_expr(
                    jobs::Column::Attempts,
                    Expr::col(jobs::Column::Attempts).add(1),
                )
                .col_expr(jobs::Column::UpdatedAt, Expr::value(now))
                .filter(jobs::Column::Id.eq(candidate.id.clone()))
                .filter(jobs::Column::State.eq(candidate.state.clone()))
                .exec(&self.database)
                .await?;
            if claimed.rows_affected == 0 {
                tracing::debug!(job_id = %candidate.id, "job claimed by another worker");
                continue;
            }

            let job_id = parse_uuid(&candidate.id, "job")?;
            return self.get(job_id).await;
        }
    }

    async fn mark_completed(&self, id: JobId, transaction: &Transaction) -> ResultEngine<()> {
        let result = serde_json::to_string(transaction)?;
        self.transition(
            id,
            JobState::Completed,
            vec![
                (jobs::Column::Result, Expr::value(result)),
                (jobs::Column::FailedReason, Expr::value(Option::<String>::None)),
            ],
        )
        .await
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> ResultEngine<()> {
        self.transition(
            id,
            JobState::Failed,
            vec![(jobs::Column::FailedReason, Expr::value(reason))],
        )
        .await
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        reason: &str,
        run_at: DateTime<Utc>,
    ) -> ResultEngine<()> {
        self.transition(
            id,
            JobState::Delayed,
            vec![
                (jobs::Column::FailedReason, Expr::value(reason)),
                (jobs::Column::RunAt, Expr::value(run_at)),
            ],
        )
        .await
    }

    async fn get(&self, id: JobId) -> ResultEngine<Option<Job>> {
        jobs::Entity::find_by_id(id.to_string())
            .one(&self.database)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn remove_pending(&self, id: JobId) -> ResultEngine<bool> {
        let result = jobs::Entity::delete_many()
            .filter(jobs::Column::Id.eq(id.to_string()))
            .filter(
                jobs::Column::State.is_in([JobState::Waiting.as_str(), JobState::Delayed.as_str()]),
            )
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete(&self, id: JobId) -> ResultEngine<bool> {
        let result = jobs::Entity::delete_by_id(id.to_string())
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn requeue_interrupted(&self, stale_before: DateTime<Utc>) -> ResultEngine<u64> {
        let result = jobs::Entity::update_many()
            .col_expr(jobs::Column::State, Expr::value(JobState::Waiting.as_str()))
            .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(jobs::Column::State.eq(JobState::Active.as_str()))
            .filter(jobs::Column::UpdatedAt.lt(stale_before))
            .exec(&self.database)
            .await?;
        if result.rows_affected > 0 {
            tracing::warn!(count = result.rows_affected, "requeued interrupted jobs");
        }
        Ok(result.rows_affected)
    }
}
