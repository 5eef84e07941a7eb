use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    TransactionTrait,
};

use crate::entities::sessions;

pub struct SessionRepository {
    conn: DatabaseConnection,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, record: sessions::Model) -> Result<()> {
        sessions::Entity::insert(record.into_active_model())
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to insert session")?;
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<sessions::Model>> {
        sessions::Entity::find_by_id(session_id)
            .one(&self.conn)
            .await
            .context("Failed to load session")
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sessions::Entity::delete_by_id(session_id)
            .exec(&self.conn)
            .await
            .context("Failed to delete session")?;
        Ok(result.rows_affected > 0)
    }

    /// Replace a session id atomically: a concurrent reader sees either the
    /// fully-old or fully-new record, never a half-written pair.
    pub async fn rotate(&self, old_id: &str, new_record: sessions::Model) -> Result<()> {
        let txn = self.conn.begin().await?;

        sessions::Entity::insert(new_record.into_active_model())
            .exec_without_returning(&txn)
            .await
            .context("Failed to insert rotated session")?;

        sessions::Entity::delete_by_id(old_id)
            .exec(&txn)
            .await
            .context("Failed to delete pre-rotation session")?;

        txn.commit().await?;
        Ok(())
    }

    /// Full overwrite of an existing record (fingerprint refresh, upgrade).
    pub async fn update(&self, record: sessions::Model) -> Result<()> {
        let active = record.into_active_model();
        let active = active.reset_all();
        active
            .update(&self.conn)
            .await
            .context("Failed to update session")?;
        Ok(())
    }

    pub async fn update_current_ip(&self, session_id: &str, ip: Option<&str>) -> Result<()> {
        sessions::Entity::update_many()
            .col_expr(
                sessions::Column::CurrentIp,
                sea_orm::sea_query::Expr::value(ip.map(ToString::to_string)),
            )
            .filter(sessions::Column::Id.eq(session_id))
            .exec(&self.conn)
            .await
            .context("Failed to update session ip")?;
        Ok(())
    }

    /// Vendor-context switch fans out to every session of the user, so a
    /// context change in one tab is visible in all of them.
    pub async fn set_vendor_context_for_user(
        &self,
        user_id: &str,
        vendor_context: Option<&str>,
    ) -> Result<u64> {
        let result = sessions::Entity::update_many()
            .col_expr(
                sessions::Column::VendorContext,
                sea_orm::sea_query::Expr::value(vendor_context.map(ToString::to_string)),
            )
            .filter(sessions::Column::UserId.eq(user_id))
            .exec(&self.conn)
            .await
            .context("Failed to update vendor context")?;
        Ok(result.rows_affected)
    }

    pub async fn delete_expired(&self, now: &str) -> Result<u64> {
        let result = sessions::Entity::delete_many()
            .filter(sessions::Column::ExpiresAt.lte(now))
            .exec(&self.conn)
            .await
            .context("Failed to sweep expired sessions")?;
        Ok(result.rows_affected)
    }
}
