//! Class-name to constructor registry.
//!
//! Definitions reference rules by a string class name, so challenge and
//! badge content can change (new definition files) without code changes,
//! as long as the referenced class was compiled in. Registration happens
//! in an explicit [`RuleRegistry::register_builtins`] call at startup, so
//! initialization order is deterministic and tests can build isolated
//! registries.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::detectors::{ForbiddenToolDetector, PromptLeakDetector, VendorRushDetector};
use super::evaluators::{ChallengeSetEvaluator, InvoiceVolumeEvaluator, VendorCountEvaluator};
use super::{Detector, Evaluator, RuleError};

pub type DetectorFactory = fn(&Value) -> Result<Arc<dyn Detector>, RuleError>;
pub type EvaluatorFactory = fn(&Value) -> Result<Arc<dyn Evaluator>, RuleError>;

#[derive(Default)]
pub struct RuleRegistry {
    detectors: HashMap<String, DetectorFactory>,
    evaluators: HashMap<String, EvaluatorFactory>,
}

impl RuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled-in rule set.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    pub fn register_builtins(&mut self) {
        self.register_detector("prompt_leak", PromptLeakDetector::from_config);
        self.register_detector("forbidden_tool", ForbiddenToolDetector::from_config);
        self.register_detector("vendor_rush", VendorRushDetector::from_config);

        self.register_evaluator("vendor_count", VendorCountEvaluator::from_config);
        self.register_evaluator("invoice_volume", InvoiceVolumeEvaluator::from_config);
        self.register_evaluator("challenge_set", ChallengeSetEvaluator::from_config);
    }

    pub fn register_detector(&mut self, class: &str, factory: DetectorFactory) {
        self.detectors.insert(class.to_string(), factory);
    }

    pub fn register_evaluator(&mut self, class: &str, factory: EvaluatorFactory) {
        self.evaluators.insert(class.to_string(), factory);
    }

    #[must_use]
    pub fn has_detector(&self, class: &str) -> bool {
        self.detectors.contains_key(class)
    }

    #[must_use]
    pub fn has_evaluator(&self, class: &str) -> bool {
        self.evaluators.contains_key(class)
    }

    pub fn build_detector(&self, class: &str, config: &Value) -> Result<Arc<dyn Detector>, RuleError> {
        let factory = self
            .detectors
            .get(class)
            .ok_or_else(|| RuleError::UnknownClass(class.to_string()))?;
        factory(config)
    }

    pub fn build_evaluator(
        &self,
        class: &str,
        config: &Value,
    ) -> Result<Arc<dyn Evaluator>, RuleError> {
        let factory = self
            .evaluators
            .get(class)
            .ok_or_else(|| RuleError::UnknownClass(class.to_string()))?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let registry = RuleRegistry::with_builtins();
        assert!(registry.has_detector("prompt_leak"));
        assert!(registry.has_detector("forbidden_tool"));
        assert!(registry.has_evaluator("vendor_count"));
        assert!(registry.has_evaluator("challenge_set"));
    }

    #[test]
    fn test_unknown_class_is_an_error() {
        let registry = RuleRegistry::with_builtins();
        let result = registry.build_detector("no_such_rule", &serde_json::json!({}));
        let err = match result {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(err, RuleError::UnknownClass(_)));
    }

    #[test]
    fn test_fresh_registry_is_empty() {
        let registry = RuleRegistry::new();
        assert!(!registry.has_detector("prompt_leak"));
    }
}
