//! Built-in badge evaluators.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::db::Store;
use crate::domain::NormalizedEvent;

use super::{DetectionResult, Evaluator, RuleError, RuleProgress};

fn parse_config<T: for<'de> Deserialize<'de>>(config: &Value) -> Result<T, RuleError> {
    serde_json::from_value(config.clone()).map_err(|e| RuleError::Config(e.to_string()))
}

// ---------------------------------------------------------------------------
// vendor_count
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct VendorCountConfig {
    min_count: u64,
}

/// Awarded once a user's namespace has accumulated enough vendor
/// creations.
pub struct VendorCountEvaluator {
    min_count: u64,
}

impl VendorCountEvaluator {
    pub fn from_config(config: &Value) -> Result<Arc<dyn Evaluator>, RuleError> {
        let config: VendorCountConfig = parse_config(config)?;
        if config.min_count == 0 {
            return Err(RuleError::Config("vendor_count requires min_count >= 1".into()));
        }
        Ok(Arc::new(Self {
            min_count: config.min_count,
        }))
    }
}

#[async_trait]
impl Evaluator for VendorCountEvaluator {
    fn relevant_event_types(&self) -> Vec<String> {
        vec!["vendor.created".to_string()]
    }

    fn check_event(&self, _event: &NormalizedEvent) -> DetectionResult {
        DetectionResult::miss()
    }

    fn aggregate_driven(&self) -> bool {
        true
    }

    async fn check_aggregate(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<DetectionResult, RuleError> {
        let count = store
            .count_events_by_type(namespace, user_id, "vendor.created")
            .await?;

        if count >= self.min_count {
            Ok(DetectionResult::hit(
                1.0,
                json!({ "vendor_count": count, "required": self.min_count }),
                format!("Created {count} vendors"),
            ))
        } else {
            Ok(DetectionResult::miss())
        }
    }

    async fn progress(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<RuleProgress, RuleError> {
        let count = store
            .count_events_by_type(namespace, user_id, "vendor.created")
            .await?;
        Ok(RuleProgress::of(count, self.min_count))
    }
}

// ---------------------------------------------------------------------------
// invoice_volume
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct InvoiceVolumeConfig {
    min_total: f64,
}

/// Awarded when the summed amount of submitted invoices crosses the
/// configured total.
pub struct InvoiceVolumeEvaluator {
    min_total: f64,
}

impl InvoiceVolumeEvaluator {
    pub fn from_config(config: &Value) -> Result<Arc<dyn Evaluator>, RuleError> {
        let config: InvoiceVolumeConfig = parse_config(config)?;
        if config.min_total <= 0.0 {
            return Err(RuleError::Config("invoice_volume requires min_total > 0".into()));
        }
        Ok(Arc::new(Self {
            min_total: config.min_total,
        }))
    }

    async fn total(&self, namespace: &str, user_id: &str, store: &Store) -> Result<f64, RuleError> {
        let rows = store
            .list_events_by_type(namespace, user_id, "invoice.submitted", 1000)
            .await?;

        let mut total = 0.0;
        for row in rows {
            if let Ok(payload) = serde_json::from_str::<Value>(&row.payload)
                && let Some(amount) = payload.get("amount").and_then(Value::as_f64)
            {
                total += amount;
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl Evaluator for InvoiceVolumeEvaluator {
    fn relevant_event_types(&self) -> Vec<String> {
        vec!["invoice.submitted".to_string()]
    }

    fn check_event(&self, _event: &NormalizedEvent) -> DetectionResult {
        DetectionResult::miss()
    }

    fn aggregate_driven(&self) -> bool {
        true
    }

    async fn check_aggregate(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<DetectionResult, RuleError> {
        let total = self.total(namespace, user_id, store).await?;

        if total >= self.min_total {
            Ok(DetectionResult::hit(
                1.0,
                json!({ "invoice_total": total, "required": self.min_total }),
                format!("Submitted invoices totalling {total:.2}"),
            ))
        } else {
            Ok(DetectionResult::miss())
        }
    }

    async fn progress(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<RuleProgress, RuleError> {
        let total = self.total(namespace, user_id, store).await?;
        Ok(RuleProgress::of(
            total.max(0.0) as u64,
            self.min_total as u64,
        ))
    }
}

// ---------------------------------------------------------------------------
// challenge_set
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChallengeSetConfig {
    min_completed: u64,
}

/// Awarded for completing enough challenges, driven by the completion
/// events the challenge service publishes.
pub struct ChallengeSetEvaluator {
    min_completed: u64,
}

impl ChallengeSetEvaluator {
    pub fn from_config(config: &Value) -> Result<Arc<dyn Evaluator>, RuleError> {
        let config: ChallengeSetConfig = parse_config(config)?;
        if config.min_completed == 0 {
            return Err(RuleError::Config("challenge_set requires min_completed >= 1".into()));
        }
        Ok(Arc::new(Self {
            min_completed: config.min_completed,
        }))
    }
}

#[async_trait]
impl Evaluator for ChallengeSetEvaluator {
    fn relevant_event_types(&self) -> Vec<String> {
        vec!["ctf.challenge.completed".to_string()]
    }

    fn check_event(&self, _event: &NormalizedEvent) -> DetectionResult {
        DetectionResult::miss()
    }

    fn aggregate_driven(&self) -> bool {
        true
    }

    async fn check_aggregate(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<DetectionResult, RuleError> {
        let completed = store.count_completed_challenges(namespace, user_id).await?;

        if completed >= self.min_completed {
            Ok(DetectionResult::hit(
                1.0,
                json!({ "completed": completed, "required": self.min_completed }),
                format!("Completed {completed} challenges"),
            ))
        } else {
            Ok(DetectionResult::miss())
        }
    }

    async fn progress(
        &self,
        namespace: &str,
        user_id: &str,
        store: &Store,
    ) -> Result<RuleProgress, RuleError> {
        let completed = store.count_completed_challenges(namespace, user_id).await?;
        Ok(RuleProgress::of(completed, self.min_completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(VendorCountEvaluator::from_config(&json!({ "min_count": 0 })).is_err());
        assert!(VendorCountEvaluator::from_config(&json!({ "min_count": 5 })).is_ok());
        assert!(InvoiceVolumeEvaluator::from_config(&json!({ "min_total": -1.0 })).is_err());
        assert!(ChallengeSetEvaluator::from_config(&json!({})).is_err());
    }

    #[test]
    fn test_evaluators_are_aggregate_driven() {
        let evaluator = VendorCountEvaluator::from_config(&json!({ "min_count": 5 })).unwrap();
        assert!(evaluator.aggregate_driven());
        assert_eq!(evaluator.relevant_event_types(), vec!["vendor.created"]);
    }
}
