use anyhow::{Context, Result};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, Set, TransactionTrait, sea_query::OnConflict,
};

use crate::entities::{challenges, user_challenges};

pub mod status {
    pub const LOCKED: &str = "locked";
    pub const AVAILABLE: &str = "available";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
}

pub struct ChallengeRepository {
    conn: DatabaseConnection,
}

impl ChallengeRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Idempotent definition upsert keyed by slug id: identical content is
    /// a no-op, changed content overwrites.
    pub async fn upsert_definition(&self, definition: challenges::Model) -> Result<()> {
        challenges::Entity::insert(definition.into_active_model())
            .on_conflict(
                OnConflict::column(challenges::Column::Id)
                    .update_columns([
                        challenges::Column::Version,
                        challenges::Column::Title,
                        challenges::Column::Description,
                        challenges::Column::Category,
                        challenges::Column::Difficulty,
                        challenges::Column::Points,
                        challenges::Column::DetectorClass,
                        challenges::Column::DetectorConfig,
                        challenges::Column::Active,
                        challenges::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to upsert challenge definition")?;
        Ok(())
    }

    pub async fn list_active(&self) -> Result<Vec<challenges::Model>> {
        challenges::Entity::find()
            .filter(challenges::Column::Active.eq(true))
            .all(&self.conn)
            .await
            .context("Failed to list active challenges")
    }

    pub async fn get_progress(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<user_challenges::Model>> {
        user_challenges::Entity::find()
            .filter(user_challenges::Column::Namespace.eq(namespace))
            .filter(user_challenges::Column::UserId.eq(user_id))
            .filter(user_challenges::Column::ChallengeId.eq(challenge_id))
            .one(&self.conn)
            .await
            .context("Failed to load challenge progress")
    }

    /// Fetch-or-create under the (namespace, user, challenge) unique index;
    /// a concurrent creator wins harmlessly.
    pub async fn get_or_create_progress(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<user_challenges::Model> {
        if let Some(existing) = self.get_progress(namespace, user_id, challenge_id).await? {
            return Ok(existing);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let fresh = user_challenges::ActiveModel {
            id: NotSet,
            namespace: Set(namespace.to_string()),
            user_id: Set(user_id.to_string()),
            challenge_id: Set(challenge_id.to_string()),
            status: Set(status::AVAILABLE.to_string()),
            attempts: Set(0),
            failures: Set(0),
            hints_used: Set(0),
            first_attempt_at: Set(None),
            completed_at: Set(None),
            evidence: Set(None),
            updated_at: Set(now),
        };

        user_challenges::Entity::insert(fresh)
            .on_conflict(
                OnConflict::columns([
                    user_challenges::Column::Namespace,
                    user_challenges::Column::UserId,
                    user_challenges::Column::ChallengeId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to create challenge progress")?;

        self.get_progress(namespace, user_id, challenge_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Progress row vanished after insert"))
    }

    /// A failed detection: bump counters and promote available into
    /// in_progress. Terminal rows are left untouched.
    pub async fn record_attempt(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<()> {
        let row = self
            .get_or_create_progress(namespace, user_id, challenge_id)
            .await?;

        if row.status == status::COMPLETED || row.status == status::LOCKED {
            return Ok(());
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut active = row.clone().into_active_model();
        active.attempts = Set(row.attempts + 1);
        active.failures = Set(row.failures + 1);
        active.status = Set(status::IN_PROGRESS.to_string());
        if row.first_attempt_at.is_none() {
            active.first_attempt_at = Set(Some(now.clone()));
        }
        active.updated_at = Set(now);
        sea_orm::ActiveModelTrait::update(active, &self.conn)
            .await
            .context("Failed to record challenge attempt")?;

        Ok(())
    }

    /// Terminal transition, idempotent: re-checks status inside the same
    /// transaction as the write, so replaying a qualifying event cannot
    /// complete a challenge twice. Returns whether this call completed it.
    pub async fn complete(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
        evidence: &serde_json::Value,
    ) -> Result<bool> {
        self.get_or_create_progress(namespace, user_id, challenge_id)
            .await?;

        let txn = self.conn.begin().await?;

        let Some(row) = user_challenges::Entity::find()
            .filter(user_challenges::Column::Namespace.eq(namespace))
            .filter(user_challenges::Column::UserId.eq(user_id))
            .filter(user_challenges::Column::ChallengeId.eq(challenge_id))
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        if row.status == status::COMPLETED {
            txn.rollback().await?;
            return Ok(false);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let elapsed_seconds = row.first_attempt_at.as_deref().and_then(|first| {
            let first = chrono::DateTime::parse_from_rfc3339(first).ok()?;
            let completed = chrono::DateTime::parse_from_rfc3339(&now).ok()?;
            Some((completed - first).num_seconds())
        });

        let mut snapshot = serde_json::Map::new();
        snapshot.insert("evidence".to_string(), evidence.clone());
        if let Some(elapsed) = elapsed_seconds {
            snapshot.insert("elapsed_seconds".to_string(), elapsed.into());
        }

        let attempts = row.attempts;
        let first_attempt_at = row.first_attempt_at.clone();
        let mut active = row.into_active_model();
        active.status = Set(status::COMPLETED.to_string());
        active.attempts = Set(attempts + 1);
        active.completed_at = Set(Some(now.clone()));
        active.evidence = Set(Some(serde_json::Value::Object(snapshot).to_string()));
        if first_attempt_at.is_none() {
            active.first_attempt_at = Set(Some(now.clone()));
        }
        active.updated_at = Set(now);
        sea_orm::ActiveModelTrait::update(active, &txn)
            .await
            .context("Failed to complete challenge")?;

        txn.commit().await?;
        Ok(true)
    }

    pub async fn count_completed(&self, namespace: &str, user_id: &str) -> Result<u64> {
        user_challenges::Entity::find()
            .filter(user_challenges::Column::Namespace.eq(namespace))
            .filter(user_challenges::Column::UserId.eq(user_id))
            .filter(user_challenges::Column::Status.eq(status::COMPLETED))
            .count(&self.conn)
            .await
            .context("Failed to count completed challenges")
    }

    pub async fn list_progress(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Vec<user_challenges::Model>> {
        user_challenges::Entity::find()
            .filter(user_challenges::Column::Namespace.eq(namespace))
            .filter(user_challenges::Column::UserId.eq(user_id))
            .all(&self.conn)
            .await
            .context("Failed to list challenge progress")
    }
}
