//! One-time magic-link sign-in.
//!
//! A link is valid iff unused and unexpired; consuming it is a single
//! guarded UPDATE, so exactly one caller ever succeeds. Consumption
//! upgrades the originating session to the permanent identity in place,
//! or mints a fresh permanent session when that record is gone.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::db::Store;
use crate::entities::magic_links;
use crate::session::identity;
use crate::session::manager::{SessionContext, SessionManager};

#[derive(Debug, Error)]
pub enum MagicLinkError {
    #[error("Link not found")]
    NotFound,

    #[error("Link expired")]
    Expired,

    #[error("Link already used")]
    AlreadyUsed,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for MagicLinkError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<crate::session::SessionError> for MagicLinkError {
    fn from(err: crate::session::SessionError) -> Self {
        Self::Session(err.to_string())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IssuedLink {
    pub token: String,
    pub expires_at: String,
}

pub struct MagicLinkService {
    store: Store,
    sessions: Arc<SessionManager>,
    ttl_minutes: i64,
}

impl MagicLinkService {
    #[must_use]
    pub fn new(store: Store, sessions: Arc<SessionManager>, ttl_minutes: i64) -> Self {
        Self {
            store,
            sessions,
            ttl_minutes,
        }
    }

    /// Mint a link for the email, remembering which session asked so a
    /// later consumption can upgrade it in place. Delivery (email) is a
    /// collaborator concern.
    pub async fn issue(
        &self,
        email: &str,
        session_id: Option<&str>,
    ) -> Result<IssuedLink, MagicLinkError> {
        let now = chrono::Utc::now();
        let expires_at = (now + chrono::Duration::minutes(self.ttl_minutes)).to_rfc3339();

        let record = magic_links::Model {
            token: identity::random_hex_token(),
            email: email.trim().to_lowercase(),
            session_id: session_id.map(ToString::to_string),
            created_at: now.to_rfc3339(),
            expires_at: expires_at.clone(),
            used_at: None,
        };

        self.store.insert_magic_link(record.clone()).await?;
        info!(email = %record.email, "Magic link issued");

        Ok(IssuedLink {
            token: record.token,
            expires_at,
        })
    }

    /// Atomically consume the link and sign the caller in. The guarded
    /// UPDATE is the only success path; afterwards the token is dead
    /// forever. Failures are user-visible and distinguish expired, used
    /// and missing so the UI can offer "request a new link".
    pub async fn consume(
        &self,
        token: &str,
        user_agent: &str,
        ip: Option<&str>,
        accept_language: &str,
        accept_encoding: &str,
    ) -> Result<SessionContext, MagicLinkError> {
        let now = chrono::Utc::now().to_rfc3339();

        if !self.store.consume_magic_link(token, &now).await? {
            // Classify the failure for the user-facing message.
            return match self.store.get_magic_link(token).await? {
                None => Err(MagicLinkError::NotFound),
                Some(link) if link.used_at.is_some() => Err(MagicLinkError::AlreadyUsed),
                Some(_) => Err(MagicLinkError::Expired),
            };
        }

        let link = self
            .store
            .get_magic_link(token)
            .await?
            .ok_or(MagicLinkError::NotFound)?;

        let context = match link.session_id.as_deref() {
            Some(session_id) => {
                self.sessions
                    .upgrade_to_permanent(
                        session_id,
                        &link.email,
                        user_agent,
                        ip,
                        accept_language,
                        accept_encoding,
                    )
                    .await?
            }
            None => {
                self.sessions
                    .create(Some(&link.email), user_agent, ip, accept_language, accept_encoding)
                    .await?
            }
        };

        info!(email = %link.email, "Magic link consumed, session upgraded");
        Ok(context)
    }

    pub async fn purge_expired(&self) -> Result<u64, MagicLinkError> {
        let now = chrono::Utc::now().to_rfc3339();
        Ok(self.store.purge_expired_magic_links(&now).await?)
    }
}
