use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub session: SessionConfig,

    pub events: EventsConfig,

    pub challenges: ChallengesConfig,

    pub invoice_review: InvoiceReviewConfig,

    pub maintenance: MaintenanceConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (0 = number of CPU cores).
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/vendra.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on session cookies.
    /// Default: true for production safety. Set to false for local development without HTTPS.
    pub secure_cookies: bool,

    pub session_cookie_name: String,

    pub csrf_header_name: String,

    /// Path prefixes that bypass CSRF validation entirely.
    pub csrf_exempt_prefixes: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6380,
            cors_allowed_origins: vec![
                "http://localhost:6380".to_string(),
                "http://127.0.0.1:6380".to_string(),
            ],
            secure_cookies: true,
            session_cookie_name: constants::http::DEFAULT_SESSION_COOKIE.to_string(),
            csrf_header_name: constants::http::DEFAULT_CSRF_HEADER.to_string(),
            csrf_exempt_prefixes: vec![
                "/healthz".to_string(),
                "/metrics".to_string(),
                "/api/status".to_string(),
                // The one-time token is the credential here; the link may be
                // opened in a browser with no prior session at all.
                "/api/auth/magic-link/consume".to_string(),
                "/static/".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Master secret for session signing and user-id derivation.
    /// Overridden by the VENDRA_MASTER_SECRET environment variable.
    pub master_secret: String,

    pub magic_link_ttl_minutes: i64,
}

/// Placeholder secret so a fresh checkout boots; real deployments override it.
const DEFAULT_MASTER_SECRET: &str = "vendra_insecure_dev_secret_please_rotate";

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            master_secret: DEFAULT_MASTER_SECRET.to_string(),
            magic_link_ttl_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Expiry window for anonymous sessions, fixed at creation.
    pub temporary_ttl_days: i64,

    /// Expiry window for email-bound sessions, fixed at creation.
    pub permanent_ttl_days: i64,

    /// Rotation cadence for anonymous sessions.
    pub temporary_rotation_minutes: i64,

    /// Rotation cadence for email-bound sessions. Permanent sessions are
    /// higher value, so they rotate more aggressively.
    pub permanent_rotation_minutes: i64,

    /// Hard cap on total session lifetime, counted from creation,
    /// regardless of activity.
    pub temporary_max_age_days: i64,

    pub permanent_max_age_days: i64,

    /// Rotation count above which the inter-rotation interval heuristic
    /// starts flagging likely automated rotation abuse.
    pub suspicious_rotation_threshold: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            temporary_ttl_days: 7,
            permanent_ttl_days: 14,
            temporary_rotation_minutes: 180,
            permanent_rotation_minutes: 60,
            temporary_max_age_days: 7,
            permanent_max_age_days: 30,
            suspicious_rotation_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub redis_url: String,

    /// Approximate cap on stream length; older entries are trimmed.
    /// The streams are a display/audit feed, not a durable ledger.
    pub stream_max_len: u64,

    pub consumer_group: String,

    /// Consumer identity within the group. Empty = generated per process.
    pub consumer_name: String,

    pub batch_size: usize,

    /// Bounded block on an empty poll, so the loop stays responsive to stop.
    pub block_timeout_ms: u64,

    /// Cold-start replay window: consumer groups are seeded at
    /// now - lookback rather than from the beginning of the stream.
    pub lookback_minutes: i64,

    pub poll_backoff_base_ms: u64,

    pub poll_backoff_max_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_max_len: 1000,
            consumer_group: "vendra-processors".to_string(),
            consumer_name: String::new(),
            batch_size: 16,
            block_timeout_ms: 2000,
            lookback_minutes: 60,
            poll_backoff_base_ms: 500,
            poll_backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengesConfig {
    /// Directory of declarative challenge/badge definition files.
    pub definitions_path: String,
}

impl Default for ChallengesConfig {
    fn default() -> Self {
        Self {
            definitions_path: "definitions".to_string(),
        }
    }
}

/// Business-rule thresholds consumed by the invoice-review collaborator.
/// The core only sanity-checks them at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceReviewConfig {
    pub auto_approve_threshold: f64,

    pub manual_review_threshold: f64,

    pub max_invoice_amount: f64,
}

impl Default for InvoiceReviewConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 1_000.0,
            manual_review_threshold: 10_000.0,
            max_invoice_amount: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,

    /// Expired-session sweep and magic-link purge interval.
    pub sweep_interval_minutes: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            session: SessionConfig::default(),
            events: EventsConfig::default(),
            challenges: ChallengesConfig::default(),
            invoice_review: InvoiceReviewConfig::default(),
            maintenance: MaintenanceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("VENDRA_MASTER_SECRET")
            && !secret.is_empty()
        {
            self.security.master_secret = secret;
        }
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("vendra").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".vendra").join("config.toml"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        if self.security.master_secret.is_empty() {
            anyhow::bail!("security.master_secret cannot be empty");
        }

        if self.security.master_secret.len() < 16 {
            anyhow::bail!("security.master_secret must be at least 16 characters");
        }

        if self.session.temporary_rotation_minutes == 0 || self.session.permanent_rotation_minutes == 0
        {
            anyhow::bail!("Session rotation cadence must be > 0");
        }

        if self.events.batch_size == 0 {
            anyhow::bail!("events.batch_size must be > 0");
        }

        let review = &self.invoice_review;
        if !(review.auto_approve_threshold < review.manual_review_threshold
            && review.manual_review_threshold < review.max_invoice_amount)
        {
            anyhow::bail!(
                "Invoice review thresholds must be strictly increasing: \
                 auto_approve ({}) < manual_review ({}) < max_amount ({})",
                review.auto_approve_threshold,
                review.manual_review_threshold,
                review.max_invoice_amount
            );
        }

        Ok(())
    }

    /// Consumer identity within the group: configured name, or a generated
    /// per-process one so horizontally scaled processors never collide.
    #[must_use]
    pub fn consumer_name(&self) -> String {
        if self.events.consumer_name.is_empty() {
            format!("vendra-{}", uuid::Uuid::new_v4())
        } else {
            self.events.consumer_name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.session.temporary_rotation_minutes, 180);
        assert_eq!(config.session.permanent_rotation_minutes, 60);
        assert_eq!(config.events.consumer_group, "vendra-processors");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[session]"));
        assert!(toml_str.contains("[invoice_review]"));
    }

    #[test]
    fn test_invoice_thresholds_must_be_monotonic() {
        let mut config = Config::default();
        config.invoice_review.auto_approve_threshold = 50_000.0;
        config.invoice_review.manual_review_threshold = 10_000.0;
        assert!(config.validate().is_err());

        config.invoice_review.auto_approve_threshold = 1_000.0;
        config.invoice_review.manual_review_threshold = 100_000.0;
        // manual == max is not strictly increasing either
        assert!(config.validate().is_err());

        config.invoice_review.manual_review_threshold = 10_000.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_distinct_consumer_names_when_unconfigured() {
        let config = Config::default();
        assert_ne!(config.consumer_name(), config.consumer_name());
    }
}
