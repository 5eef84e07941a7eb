use anyhow::{Context, Result};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, Set, sea_query::OnConflict,
};

use crate::entities::{badges, user_badges};

pub struct BadgeRepository {
    conn: DatabaseConnection,
}

impl BadgeRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn upsert_definition(&self, definition: badges::Model) -> Result<()> {
        badges::Entity::insert(definition.into_active_model())
            .on_conflict(
                OnConflict::column(badges::Column::Id)
                    .update_columns([
                        badges::Column::Version,
                        badges::Column::Title,
                        badges::Column::Description,
                        badges::Column::Rarity,
                        badges::Column::EvaluatorClass,
                        badges::Column::EvaluatorConfig,
                        badges::Column::Active,
                        badges::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to upsert badge definition")?;
        Ok(())
    }

    pub async fn list_active(&self) -> Result<Vec<badges::Model>> {
        badges::Entity::find()
            .filter(badges::Column::Active.eq(true))
            .all(&self.conn)
            .await
            .context("Failed to list active badges")
    }

    /// Insertion is the only mutation; the unique index absorbs replays.
    /// Returns whether a new award row was written.
    pub async fn insert_award_if_absent(
        &self,
        namespace: &str,
        user_id: &str,
        badge_id: &str,
        evidence: &serde_json::Value,
    ) -> Result<bool> {
        let active = user_badges::ActiveModel {
            id: NotSet,
            namespace: Set(namespace.to_string()),
            user_id: Set(user_id.to_string()),
            badge_id: Set(badge_id.to_string()),
            earned_at: Set(chrono::Utc::now().to_rfc3339()),
            evidence: Set(Some(evidence.to_string())),
        };

        let rows = user_badges::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    user_badges::Column::Namespace,
                    user_badges::Column::UserId,
                    user_badges::Column::BadgeId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to insert badge award")?;

        Ok(rows > 0)
    }

    pub async fn has_award(&self, namespace: &str, user_id: &str, badge_id: &str) -> Result<bool> {
        let existing = user_badges::Entity::find()
            .filter(user_badges::Column::Namespace.eq(namespace))
            .filter(user_badges::Column::UserId.eq(user_id))
            .filter(user_badges::Column::BadgeId.eq(badge_id))
            .one(&self.conn)
            .await
            .context("Failed to look up badge award")?;
        Ok(existing.is_some())
    }

    pub async fn list_awards(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Vec<user_badges::Model>> {
        user_badges::Entity::find()
            .filter(user_badges::Column::Namespace.eq(namespace))
            .filter(user_badges::Column::UserId.eq(user_id))
            .all(&self.conn)
            .await
            .context("Failed to list badge awards")
    }
}
