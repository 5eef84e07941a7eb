//! Session lifecycle: create, validate, rotate, upgrade.
//!
//! Validation fails closed everywhere except one deliberate spot: a
//! permanent session with a fully mismatched fingerprint is flagged and
//! kept usable, because logging out an authenticated user over a header
//! change costs more than the residual risk. Temporary sessions with the
//! same mismatch are deleted outright.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::db::Store;
use crate::entities::sessions;
use crate::session::fingerprint::{FingerprintTier, fingerprint};
use crate::session::identity;
use crate::session::signing::SessionSigner;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Valid,
    Rotated,
    NotFound,
    Expired,
    Tampered,
    Hijacked,
    TooOld,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Rotated => "rotated",
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Tampered => "tampered",
            Self::Hijacked => "hijacked",
            Self::TooOld => "too_old",
        }
    }
}

/// Result of a `get`: the record (when one survives validation), the
/// terminal status, and the flags the middleware acts on.
#[derive(Clone, Debug)]
pub struct SessionLookup {
    pub session: Option<sessions::Model>,
    pub status: SessionStatus,
    pub security_event: Option<String>,
    pub needs_cookie_update: bool,
}

impl SessionLookup {
    fn failed(status: SessionStatus) -> Self {
        Self {
            session: None,
            status,
            security_event: None,
            needs_cookie_update: false,
        }
    }
}

/// A live session handed to request handlers.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub session: sessions::Model,
    pub needs_cookie_update: bool,
    pub security_event: Option<String>,
}

pub struct SessionManager {
    store: Store,
    signer: SessionSigner,
    config: SessionConfig,
    master_secret: String,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Store, config: SessionConfig, master_secret: &str) -> Self {
        Self {
            store,
            signer: SessionSigner::new(master_secret),
            config,
            master_secret: master_secret.to_string(),
        }
    }

    pub async fn create(
        &self,
        email: Option<&str>,
        user_agent: &str,
        ip: Option<&str>,
        accept_language: &str,
        accept_encoding: &str,
    ) -> Result<SessionContext, SessionError> {
        let now = Utc::now();

        let (user_id, is_temporary) = match email {
            Some(email) => (
                identity::permanent_user_id(email, &self.master_secret),
                false,
            ),
            None => (identity::temporary_user_id(), true),
        };
        let namespace = identity::namespace_for(&user_id);

        let ttl_days = if is_temporary {
            self.config.temporary_ttl_days
        } else {
            self.config.permanent_ttl_days
        };

        let mut record = sessions::Model {
            id: identity::random_hex_token(),
            user_id,
            namespace,
            email: email.map(|e| e.trim().to_lowercase()),
            is_temporary,
            created_at: now.to_rfc3339(),
            expires_at: (now + Duration::days(ttl_days)).to_rfc3339(),
            last_rotated_at: now.to_rfc3339(),
            rotation_count: 0,
            fingerprint_strict: fingerprint(
                user_agent,
                accept_language,
                accept_encoding,
                FingerprintTier::Strict,
            ),
            fingerprint_loose: fingerprint(
                user_agent,
                accept_language,
                accept_encoding,
                FingerprintTier::Loose,
            ),
            original_ip: ip.map(ToString::to_string),
            current_ip: ip.map(ToString::to_string),
            csrf_token: identity::random_hex_token(),
            vendor_context: None,
            signature: String::new(),
        };
        record.signature = self.signer.sign(&record);

        self.store.insert_session(record.clone()).await?;
        counter!("vendra_sessions_created_total").increment(1);

        Ok(SessionContext {
            session: record,
            needs_cookie_update: true,
            security_event: None,
        })
    }

    /// Validation order matters and is fixed: existence, expiry, signature
    /// integrity, fingerprint tiers, absolute age, rotation cadence.
    pub async fn get(
        &self,
        session_id: &str,
        current_strict_fp: &str,
        current_loose_fp: &str,
        current_ip: Option<&str>,
    ) -> Result<SessionLookup, SessionError> {
        let now = Utc::now();

        let Some(mut record) = self.store.get_session(session_id).await? else {
            return Ok(SessionLookup::failed(SessionStatus::NotFound));
        };

        if parse_ts(&record.expires_at)? <= now {
            self.store.delete_session(session_id).await?;
            return Ok(SessionLookup::failed(SessionStatus::Expired));
        }

        // A record failing its MAC is indistinguishable from an attack and
        // must not be trusted even to read. Purge, never retry.
        if !self.signer.verify(&record) {
            self.store.delete_session(session_id).await?;
            counter!("vendra_sessions_tampered_total").increment(1);
            warn!(session = %redact(session_id), "Session signature mismatch, record purged");
            return Ok(SessionLookup::failed(SessionStatus::Tampered));
        }

        let mut security_event = None;
        let mut needs_cookie_update = false;

        if record.fingerprint_strict != current_strict_fp {
            if record.fingerprint_loose == current_loose_fp {
                // Same device, minor header drift (browser update). Re-pin
                // the strict fingerprint so the next request is clean.
                debug!(session = %redact(session_id), "Loose fingerprint match, re-pinning strict");
                record.fingerprint_strict = current_strict_fp.to_string();
                record.signature = self.signer.sign(&record);
                self.store.update_session(record.clone()).await?;
            } else if record.is_temporary {
                // Anonymous sessions carry nothing worth a false-positive
                // fight; fail closed and shrink the blast radius.
                self.store.delete_session(session_id).await?;
                counter!("vendra_sessions_hijack_rejected_total").increment(1);
                warn!(session = %redact(session_id), "Temporary session fingerprint mismatch, deleted");
                return Ok(SessionLookup::failed(SessionStatus::Hijacked));
            } else {
                counter!("vendra_session_security_events_total").increment(1);
                warn!(
                    session = %redact(session_id),
                    user = %record.user_id,
                    "Permanent session fingerprint mismatch, flagged but kept"
                );
                record.fingerprint_strict = current_strict_fp.to_string();
                record.fingerprint_loose = current_loose_fp.to_string();
                record.signature = self.signer.sign(&record);
                self.store.update_session(record.clone()).await?;
                security_event = Some("fingerprint_mismatch".to_string());
                needs_cookie_update = true;
            }
        }

        let max_age_days = if record.is_temporary {
            self.config.temporary_max_age_days
        } else {
            self.config.permanent_max_age_days
        };
        if now - parse_ts(&record.created_at)? > Duration::days(max_age_days) {
            self.store.delete_session(session_id).await?;
            return Ok(SessionLookup::failed(SessionStatus::TooOld));
        }

        if record.current_ip.as_deref() != current_ip {
            self.store.update_session_ip(session_id, current_ip).await?;
            record.current_ip = current_ip.map(ToString::to_string);
        }

        let status = if self.rotation_due(&record, now)? {
            SessionStatus::Rotated
        } else {
            SessionStatus::Valid
        };

        Ok(SessionLookup {
            session: Some(record),
            status,
            security_event,
            needs_cookie_update,
        })
    }

    fn rotation_due(&self, record: &sessions::Model, now: DateTime<Utc>) -> Result<bool, SessionError> {
        let cadence = Duration::minutes(self.rotation_cadence_minutes(record));
        Ok(now - parse_ts(&record.last_rotated_at)? >= cadence)
    }

    const fn rotation_cadence_minutes(&self, record: &sessions::Model) -> i64 {
        if record.is_temporary {
            self.config.temporary_rotation_minutes
        } else {
            self.config.permanent_rotation_minutes
        }
    }

    /// Issue a new public identifier for the same identity. Expiry and
    /// namespace carry over unchanged; the old id stops resolving.
    pub async fn rotate(&self, session: &sessions::Model) -> Result<SessionContext, SessionError> {
        let now = Utc::now();

        let mut rotated = sessions::Model {
            id: identity::random_hex_token(),
            last_rotated_at: now.to_rfc3339(),
            rotation_count: session.rotation_count + 1,
            signature: String::new(),
            ..session.clone()
        };
        rotated.signature = self.signer.sign(&rotated);

        self.store.rotate_session(&session.id, rotated.clone()).await?;
        counter!("vendra_sessions_rotated_total").increment(1);

        Ok(SessionContext {
            session: rotated,
            needs_cookie_update: true,
            security_event: None,
        })
    }

    /// Convert a temporary record to the permanent identity in place,
    /// preserving the session id and rotation history. Falls back to a
    /// fresh permanent session when the source record is gone or cannot
    /// be trusted.
    pub async fn upgrade_to_permanent(
        &self,
        session_id: &str,
        email: &str,
        user_agent: &str,
        ip: Option<&str>,
        accept_language: &str,
        accept_encoding: &str,
    ) -> Result<SessionContext, SessionError> {
        let Some(record) = self.store.get_session(session_id).await? else {
            return self
                .create(Some(email), user_agent, ip, accept_language, accept_encoding)
                .await;
        };

        if !self.signer.verify(&record) {
            self.store.delete_session(session_id).await?;
            return self
                .create(Some(email), user_agent, ip, accept_language, accept_encoding)
                .await;
        }

        let now = Utc::now();
        let user_id = identity::permanent_user_id(email, &self.master_secret);
        let namespace = identity::namespace_for(&user_id);

        let mut upgraded = sessions::Model {
            user_id,
            namespace,
            email: Some(email.trim().to_lowercase()),
            is_temporary: false,
            expires_at: (now + Duration::days(self.config.permanent_ttl_days)).to_rfc3339(),
            fingerprint_strict: fingerprint(
                user_agent,
                accept_language,
                accept_encoding,
                FingerprintTier::Strict,
            ),
            fingerprint_loose: fingerprint(
                user_agent,
                accept_language,
                accept_encoding,
                FingerprintTier::Loose,
            ),
            current_ip: ip.map(ToString::to_string),
            csrf_token: identity::random_hex_token(),
            signature: String::new(),
            ..record
        };
        upgraded.signature = self.signer.sign(&upgraded);

        self.store.update_session(upgraded.clone()).await?;
        counter!("vendra_sessions_upgraded_total").increment(1);

        Ok(SessionContext {
            session: upgraded,
            needs_cookie_update: true,
            security_event: None,
        })
    }

    /// Legitimate rotation is driven by wall-clock cadence. A session whose
    /// observed inter-rotation interval is well under the expected cadence
    /// is being rotated by something faster than a browser.
    #[must_use]
    pub fn detect_suspicious_activity(&self, session: &sessions::Model) -> bool {
        if session.rotation_count < self.config.suspicious_rotation_threshold {
            return false;
        }

        let (Ok(created), Ok(last)) = (
            parse_ts(&session.created_at),
            parse_ts(&session.last_rotated_at),
        ) else {
            return true;
        };

        let expected_secs = self.rotation_cadence_minutes(session) * 60;
        let avg_secs = (last - created).num_seconds() / i64::from(session.rotation_count.max(1));

        (avg_secs as f64) < 0.8 * expected_secs as f64
    }

    /// Which vendor sub-account the user is acting as; synchronized across
    /// all of the user's concurrent sessions, keyed by user id.
    pub async fn set_vendor_context(
        &self,
        user_id: &str,
        vendor_context: Option<&str>,
    ) -> Result<u64, SessionError> {
        Ok(self
            .store
            .set_vendor_context_for_user(user_id, vendor_context)
            .await?)
    }

    pub async fn sweep_expired(&self) -> Result<u64, SessionError> {
        let now = Utc::now().to_rfc3339();
        Ok(self.store.delete_expired_sessions(&now).await?)
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, SessionError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SessionError::Internal(format!("Malformed session timestamp: {e}")))
}

/// Session ids never appear whole in logs.
fn redact(session_id: &str) -> String {
    format!("{}…", &session_id[..session_id.len().min(8)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn manager_for_heuristics() -> (SessionManager, sessions::Model) {
        // Store is never touched by detect_suspicious_activity; a dummy
        // connection would do, but building one requires async. Construct
        // the manager pieces directly instead.
        let config = SessionConfig::default();
        let record = sessions::Model {
            id: "s".repeat(64),
            user_id: "u_1".to_string(),
            namespace: "ns_u_1".to_string(),
            email: Some("a@b.c".to_string()),
            is_temporary: false,
            created_at: Utc::now().to_rfc3339(),
            expires_at: (Utc::now() + Duration::days(14)).to_rfc3339(),
            last_rotated_at: Utc::now().to_rfc3339(),
            rotation_count: 0,
            fingerprint_strict: String::new(),
            fingerprint_loose: String::new(),
            original_ip: None,
            current_ip: None,
            csrf_token: "c".repeat(64),
            vendor_context: None,
            signature: String::new(),
        };
        let manager = SessionManager {
            store: Store {
                conn: sea_orm::DatabaseConnection::Disconnected,
            },
            signer: SessionSigner::new("test-secret"),
            config,
            master_secret: "test-secret".to_string(),
        };
        (manager, record)
    }

    #[test]
    fn test_suspicion_requires_rotation_volume() {
        let (manager, mut record) = manager_for_heuristics();
        // Plenty fast, but not enough rotations to matter yet.
        record.rotation_count = 3;
        record.created_at = (Utc::now() - Duration::minutes(5)).to_rfc3339();
        record.last_rotated_at = Utc::now().to_rfc3339();
        assert!(!manager.detect_suspicious_activity(&record));
    }

    #[test]
    fn test_rapid_fire_rotation_is_suspicious() {
        let (manager, mut record) = manager_for_heuristics();
        // 12 rotations inside 20 minutes against a 60-minute cadence.
        record.rotation_count = 12;
        record.created_at = (Utc::now() - Duration::minutes(20)).to_rfc3339();
        record.last_rotated_at = Utc::now().to_rfc3339();
        assert!(manager.detect_suspicious_activity(&record));
    }

    #[test]
    fn test_cadence_paced_rotation_is_not_suspicious() {
        let (manager, mut record) = manager_for_heuristics();
        // 12 rotations over 12 hours: exactly the hourly cadence.
        record.rotation_count = 12;
        record.created_at = (Utc::now() - Duration::hours(12)).to_rfc3339();
        record.last_rotated_at = Utc::now().to_rfc3339();
        assert!(!manager.detect_suspicious_activity(&record));
    }
}
