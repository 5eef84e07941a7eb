use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::domain::NormalizedEvent;
use crate::entities::{badges, challenges, ctf_events, magic_links, sessions, user_badges, user_challenges};

pub mod migrator;
pub mod repositories;

pub use repositories::challenge::status as challenge_status;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        // A pooled in-memory SQLite hands every connection its own empty
        // database; pin the pool to a single long-lived connection.
        let (max_connections, min_connections) = if db_url.contains(":memory:") {
            (1, 1)
        } else {
            (max_connections, min_connections)
        };

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn session_repo(&self) -> repositories::session::SessionRepository {
        repositories::session::SessionRepository::new(self.conn.clone())
    }

    fn magic_link_repo(&self) -> repositories::magic_link::MagicLinkRepository {
        repositories::magic_link::MagicLinkRepository::new(self.conn.clone())
    }

    fn event_repo(&self) -> repositories::event::EventRepository {
        repositories::event::EventRepository::new(self.conn.clone())
    }

    fn challenge_repo(&self) -> repositories::challenge::ChallengeRepository {
        repositories::challenge::ChallengeRepository::new(self.conn.clone())
    }

    fn badge_repo(&self) -> repositories::badge::BadgeRepository {
        repositories::badge::BadgeRepository::new(self.conn.clone())
    }

    // Sessions

    pub async fn insert_session(&self, record: sessions::Model) -> Result<()> {
        self.session_repo().insert(record).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<sessions::Model>> {
        self.session_repo().get(session_id).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        self.session_repo().delete(session_id).await
    }

    pub async fn rotate_session(&self, old_id: &str, new_record: sessions::Model) -> Result<()> {
        self.session_repo().rotate(old_id, new_record).await
    }

    pub async fn update_session(&self, record: sessions::Model) -> Result<()> {
        self.session_repo().update(record).await
    }

    pub async fn update_session_ip(&self, session_id: &str, ip: Option<&str>) -> Result<()> {
        self.session_repo().update_current_ip(session_id, ip).await
    }

    pub async fn set_vendor_context_for_user(
        &self,
        user_id: &str,
        vendor_context: Option<&str>,
    ) -> Result<u64> {
        self.session_repo()
            .set_vendor_context_for_user(user_id, vendor_context)
            .await
    }

    pub async fn delete_expired_sessions(&self, now: &str) -> Result<u64> {
        self.session_repo().delete_expired(now).await
    }

    // Magic links

    pub async fn insert_magic_link(&self, record: magic_links::Model) -> Result<()> {
        self.magic_link_repo().insert(record).await
    }

    pub async fn get_magic_link(&self, token: &str) -> Result<Option<magic_links::Model>> {
        self.magic_link_repo().get(token).await
    }

    pub async fn consume_magic_link(&self, token: &str, now: &str) -> Result<bool> {
        self.magic_link_repo().consume(token, now).await
    }

    pub async fn purge_expired_magic_links(&self, now: &str) -> Result<u64> {
        self.magic_link_repo().purge_expired(now).await
    }

    // Events

    pub async fn insert_event_dedup(&self, event: &NormalizedEvent) -> Result<bool> {
        self.event_repo().insert_dedup(event).await
    }

    pub async fn count_events_by_type(
        &self,
        namespace: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<u64> {
        self.event_repo()
            .count_by_type(namespace, user_id, event_type)
            .await
    }

    pub async fn count_events_by_type_since(
        &self,
        namespace: &str,
        user_id: &str,
        event_type: &str,
        since: &str,
    ) -> Result<u64> {
        self.event_repo()
            .count_by_type_since(namespace, user_id, event_type, since)
            .await
    }

    pub async fn list_events_by_type(
        &self,
        namespace: &str,
        user_id: &str,
        event_type: &str,
        limit: u64,
    ) -> Result<Vec<ctf_events::Model>> {
        self.event_repo()
            .list_by_type(namespace, user_id, event_type, limit)
            .await
    }

    // Challenge definitions & progress

    pub async fn upsert_challenge(&self, definition: challenges::Model) -> Result<()> {
        self.challenge_repo().upsert_definition(definition).await
    }

    pub async fn list_active_challenges(&self) -> Result<Vec<challenges::Model>> {
        self.challenge_repo().list_active().await
    }

    pub async fn get_challenge_progress(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<Option<user_challenges::Model>> {
        self.challenge_repo()
            .get_progress(namespace, user_id, challenge_id)
            .await
    }

    pub async fn get_or_create_challenge_progress(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<user_challenges::Model> {
        self.challenge_repo()
            .get_or_create_progress(namespace, user_id, challenge_id)
            .await
    }

    pub async fn record_challenge_attempt(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
    ) -> Result<()> {
        self.challenge_repo()
            .record_attempt(namespace, user_id, challenge_id)
            .await
    }

    pub async fn complete_challenge(
        &self,
        namespace: &str,
        user_id: &str,
        challenge_id: &str,
        evidence: &serde_json::Value,
    ) -> Result<bool> {
        self.challenge_repo()
            .complete(namespace, user_id, challenge_id, evidence)
            .await
    }

    pub async fn count_completed_challenges(&self, namespace: &str, user_id: &str) -> Result<u64> {
        self.challenge_repo()
            .count_completed(namespace, user_id)
            .await
    }

    pub async fn list_challenge_progress(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Vec<user_challenges::Model>> {
        self.challenge_repo().list_progress(namespace, user_id).await
    }

    // Badge definitions & awards

    pub async fn upsert_badge(&self, definition: badges::Model) -> Result<()> {
        self.badge_repo().upsert_definition(definition).await
    }

    pub async fn list_active_badges(&self) -> Result<Vec<badges::Model>> {
        self.badge_repo().list_active().await
    }

    pub async fn insert_badge_award_if_absent(
        &self,
        namespace: &str,
        user_id: &str,
        badge_id: &str,
        evidence: &serde_json::Value,
    ) -> Result<bool> {
        self.badge_repo()
            .insert_award_if_absent(namespace, user_id, badge_id, evidence)
            .await
    }

    pub async fn has_badge_award(
        &self,
        namespace: &str,
        user_id: &str,
        badge_id: &str,
    ) -> Result<bool> {
        self.badge_repo().has_award(namespace, user_id, badge_id).await
    }

    pub async fn list_badge_awards(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Vec<user_badges::Model>> {
        self.badge_repo().list_awards(namespace, user_id).await
    }
}
