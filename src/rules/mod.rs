//! Detector/evaluator contracts and the class-name registry.
//!
//! Detectors judge single events for challenge completion; evaluators
//! judge aggregate state for badge awards. Both families share the same
//! shape: cheap event-type pre-filtering, a fast synchronous single-event
//! check, an on-demand aggregate check against the store, and a read-only
//! progress projection for the UI.

pub mod definitions;
pub mod detectors;
pub mod evaluators;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::db::Store;
use crate::domain::NormalizedEvent;

pub use registry::RuleRegistry;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule configuration: {0}")]
    Config(String),

    #[error("Unknown rule class: {0}")]
    UnknownClass(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for RuleError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub detected: bool,
    pub confidence: f32,
    pub evidence: Value,
    pub message: String,
}

impl DetectionResult {
    #[must_use]
    pub fn miss() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            evidence: Value::Null,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn hit(confidence: f32, evidence: Value, message: impl Into<String>) -> Self {
        Self {
            detected: true,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct RuleProgress {
    pub current: u64,
    pub target: u64,
    pub percentage: f32,
}

impl RuleProgress {
    #[must_use]
    pub fn of(current: u64, target: u64) -> Self {
        let percentage = if target == 0 {
            0.0
        } else {
            ((current as f64 / target as f64) * 100.0).min(100.0) as f32
        };
        Self {
            current,
            target,
            percentage,
        }
    }
}

/// Exact match, or prefix wildcard (`agent.tool.*`). A bare `*` matches
/// everything.
#[must_use]
pub fn event_type_matches(patterns: &[String], event_type: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            event_type == prefix || event_type.starts_with(&format!("{prefix}."))
        } else {
            pattern == event_type
        }
    })
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Cheap pre-filter; the service never runs a detector whose patterns
    /// do not cover the event type.
    fn relevant_event_types(&self) -> Vec<String>;

    /// Fast, synchronous single-event judgment.
    fn check_event(&self, event: &NormalizedEvent) -> DetectionResult;

    /// Whether a non-detection on the event path should fall through to
    /// the aggregate check.
    fn aggregate_driven(&self) -> bool {
        false
    }

    /// Slower path over historical state.
    async fn check_aggregate(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<DetectionResult, RuleError> {
        let _ = (namespace, user_id, store);
        Ok(DetectionResult::miss())
    }

    /// Read-only projection for UI display, independent of detection.
    async fn progress(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<RuleProgress, RuleError> {
        let _ = (namespace, user_id, store);
        Ok(RuleProgress::of(0, 0))
    }
}

/// Same contract as [`Detector`], applied to badge eligibility.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn relevant_event_types(&self) -> Vec<String>;

    fn check_event(&self, event: &NormalizedEvent) -> DetectionResult;

    fn aggregate_driven(&self) -> bool {
        false
    }

    async fn check_aggregate(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<DetectionResult, RuleError> {
        let _ = (namespace, user_id, store);
        Ok(DetectionResult::miss())
    }

    async fn progress(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<RuleProgress, RuleError> {
        let _ = (namespace, user_id, store);
        Ok(RuleProgress::of(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matching() {
        let patterns = vec!["vendor.created".to_string(), "agent.tool.*".to_string()];

        assert!(event_type_matches(&patterns, "vendor.created"));
        assert!(event_type_matches(&patterns, "agent.tool.success"));
        assert!(event_type_matches(&patterns, "agent.tool"));
        assert!(!event_type_matches(&patterns, "vendor.updated"));
        assert!(!event_type_matches(&patterns, "agent.toolbox.success"));
        assert!(event_type_matches(&["*".to_string()], "anything.at.all"));
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(RuleProgress::of(0, 0).percentage, 0.0);
        assert_eq!(RuleProgress::of(2, 4).percentage, 50.0);
        assert_eq!(RuleProgress::of(9, 4).percentage, 100.0);
    }

    #[test]
    fn test_hit_clamps_confidence() {
        assert_eq!(DetectionResult::hit(7.0, Value::Null, "m").confidence, 1.0);
    }
}
