//! Per-event badge evaluation and award persistence.

use metrics::counter;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::db::Store;
use crate::domain::{BusEvent, EventCategory, NormalizedEvent};
use crate::entities::badges;
use crate::events::EventBus;
use crate::rules::{self, Evaluator, RuleProgress, RuleRegistry};

use super::challenge_service::ServiceError;

/// Award projection for UI display.
#[derive(Debug, serde::Serialize)]
pub struct BadgeProgressView {
    pub id: String,
    pub title: String,
    pub rarity: String,
    pub earned: bool,
    pub earned_at: Option<String>,
    pub progress: Option<RuleProgress>,
}

pub struct BadgeService {
    store: Store,
    registry: Arc<RuleRegistry>,
    bus: Option<EventBus>,
    cache: RwLock<HashMap<String, Arc<dyn Evaluator>>>,
}

impl BadgeService {
    #[must_use]
    pub fn new(store: Store, registry: Arc<RuleRegistry>, bus: Option<EventBus>) -> Self {
        Self {
            store,
            registry,
            bus,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Run every matching active badge against one event. Returns the ids
    /// of badges this event newly awarded.
    pub async fn process_event(
        &self,
        event: &NormalizedEvent,
    ) -> Result<Vec<String>, ServiceError> {
        let definitions = self.store.list_active_badges().await?;
        let mut awarded = Vec::new();

        // Same O(events x definitions) scan as the challenge service.
        for definition in definitions {
            match self.apply_definition(&definition, event).await {
                Ok(Some(id)) => awarded.push(id),
                Ok(None) => {}
                Err(e) => {
                    warn!(badge = %definition.id, "Badge evaluation failed: {e}");
                }
            }
        }

        Ok(awarded)
    }

    async fn apply_definition(
        &self,
        definition: &badges::Model,
        event: &NormalizedEvent,
    ) -> Result<Option<String>, ServiceError> {
        let Some(evaluator) = self.evaluator_for(definition).await else {
            return Ok(None);
        };

        if !rules::event_type_matches(&evaluator.relevant_event_types(), &event.event_type) {
            return Ok(None);
        }

        // Awards are terminal; skip evaluation entirely once earned.
        if self
            .store
            .has_badge_award(&event.namespace, &event.user_id, &definition.id)
            .await?
        {
            return Ok(None);
        }

        let mut result = evaluator.check_event(event);
        if !result.detected && evaluator.aggregate_driven() {
            match evaluator
                .check_aggregate(&event.namespace, &event.user_id, &self.store)
                .await
            {
                Ok(aggregate) => result = aggregate,
                Err(e) => {
                    warn!(badge = %definition.id, "Aggregate check failed: {e}");
                    return Ok(None);
                }
            }
        }

        if !result.detected {
            return Ok(None);
        }

        let evidence = json!({
            "confidence": result.confidence,
            "message": result.message,
            "details": result.evidence,
            "event_external_id": event.external_id,
        });

        // The unique (namespace, user, badge) index absorbs replays: only
        // one delivery ever writes the row.
        let newly_awarded = self
            .store
            .insert_badge_award_if_absent(&event.namespace, &event.user_id, &definition.id, &evidence)
            .await?;

        if newly_awarded {
            counter!("vendra_badges_awarded_total").increment(1);
            info!(badge = %definition.id, user = %event.user_id, "Badge awarded");

            if let Some(bus) = &self.bus {
                bus.emit(
                    BusEvent::new(
                        EventCategory::Business,
                        "ctf.badge.awarded",
                        event.namespace.clone(),
                        event.user_id.clone(),
                    )
                    .with_field("badge_id", definition.id.clone())
                    .with_field("rarity", definition.rarity.clone())
                    .with_summary(format!("Badge '{}' awarded", definition.title)),
                )
                .await;
            }

            return Ok(Some(definition.id.clone()));
        }

        Ok(None)
    }

    async fn evaluator_for(&self, definition: &badges::Model) -> Option<Arc<dyn Evaluator>> {
        if let Some(cached) = self.cache.read().await.get(&definition.id) {
            return Some(cached.clone());
        }

        let config: serde_json::Value =
            serde_json::from_str(&definition.evaluator_config).unwrap_or(serde_json::json!({}));

        match self
            .registry
            .build_evaluator(&definition.evaluator_class, &config)
        {
            Ok(evaluator) => {
                self.cache
                    .write()
                    .await
                    .insert(definition.id.clone(), evaluator.clone());
                Some(evaluator)
            }
            Err(e) => {
                warn!(
                    badge = %definition.id,
                    class = %definition.evaluator_class,
                    "Evaluator unavailable: {e}"
                );
                None
            }
        }
    }

    pub async fn invalidate_cache(&self) {
        self.cache.write().await.clear();
    }

    pub async fn progress_for(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Vec<BadgeProgressView>, ServiceError> {
        let definitions = self.store.list_active_badges().await?;
        let awards = self.store.list_badge_awards(namespace, user_id).await?;

        let mut views = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let award = awards.iter().find(|a| a.badge_id == definition.id);

            let progress = if let Some(evaluator) = self.evaluator_for(&definition).await {
                evaluator.progress(namespace, user_id, &self.store).await.ok()
            } else {
                None
            };

            views.push(BadgeProgressView {
                id: definition.id,
                title: definition.title,
                rarity: definition.rarity,
                earned: award.is_some(),
                earned_at: award.map(|a| a.earned_at.clone()),
                progress,
            });
        }

        Ok(views)
    }
}
