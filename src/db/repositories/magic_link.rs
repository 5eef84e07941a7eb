use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    sea_query::Expr,
};

use crate::entities::magic_links;

pub struct MagicLinkRepository {
    conn: DatabaseConnection,
}

impl MagicLinkRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, record: magic_links::Model) -> Result<()> {
        magic_links::Entity::insert(record.into_active_model())
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to insert magic link")?;
        Ok(())
    }

    pub async fn get(&self, token: &str) -> Result<Option<magic_links::Model>> {
        magic_links::Entity::find_by_id(token)
            .one(&self.conn)
            .await
            .context("Failed to load magic link")
    }

    /// Single atomic state transition: the guarded UPDATE succeeds for
    /// exactly one caller, ever. Returns false when the link is missing,
    /// already used, or expired.
    pub async fn consume(&self, token: &str, now: &str) -> Result<bool> {
        let result = magic_links::Entity::update_many()
            .col_expr(magic_links::Column::UsedAt, Expr::value(Some(now.to_string())))
            .filter(magic_links::Column::Token.eq(token))
            .filter(magic_links::Column::UsedAt.is_null())
            .filter(magic_links::Column::ExpiresAt.gt(now))
            .exec(&self.conn)
            .await
            .context("Failed to consume magic link")?;
        Ok(result.rows_affected == 1)
    }

    pub async fn purge_expired(&self, now: &str) -> Result<u64> {
        let result = magic_links::Entity::delete_many()
            .filter(magic_links::Column::ExpiresAt.lte(now))
            .exec(&self.conn)
            .await
            .context("Failed to purge expired magic links")?;
        Ok(result.rows_affected)
    }
}
