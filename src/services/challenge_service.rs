//! Per-event challenge evaluation and progress persistence.

use metrics::counter;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::db::{Store, challenge_status};
use crate::domain::{BusEvent, EventCategory, NormalizedEvent};
use crate::entities::challenges;
use crate::events::EventBus;
use crate::rules::{self, Detector, RuleProgress, RuleRegistry};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Progress projection for UI display.
#[derive(Debug, serde::Serialize)]
pub struct ChallengeProgressView {
    pub id: String,
    pub title: String,
    pub category: String,
    pub difficulty: String,
    pub points: i32,
    pub status: String,
    pub attempts: i32,
    pub completed_at: Option<String>,
    pub progress: Option<RuleProgress>,
}

pub struct ChallengeService {
    store: Store,
    registry: Arc<RuleRegistry>,
    bus: Option<EventBus>,
    /// Rule instances are stateless after construction, so sharing them
    /// read-only across events is safe; the cache is cleared on definition
    /// reload and that clear is deliberately not synchronized against
    /// in-flight evaluations.
    cache: RwLock<HashMap<String, Arc<dyn Detector>>>,
}

impl ChallengeService {
    #[must_use]
    pub fn new(store: Store, registry: Arc<RuleRegistry>, bus: Option<EventBus>) -> Self {
        Self {
            store,
            registry,
            bus,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Run every matching active definition against one event. Returns the
    /// ids of challenges this event newly completed. A single definition
    /// failing never aborts the rest.
    pub async fn process_event(
        &self,
        event: &NormalizedEvent,
    ) -> Result<Vec<String>, ServiceError> {
        let definitions = self.store.list_active_challenges().await?;
        let mut completed = Vec::new();

        // Every event is checked against every active definition, an
        // O(events x definitions) scan. Known cost, fine at the catalog
        // sizes this runs with; an event-type index would need to keep the
        // wildcard-matching semantics.
        for definition in definitions {
            match self.apply_definition(&definition, event).await {
                Ok(Some(id)) => completed.push(id),
                Ok(None) => {}
                Err(e) => {
                    warn!(challenge = %definition.id, "Challenge evaluation failed: {e}");
                }
            }
        }

        Ok(completed)
    }

    async fn apply_definition(
        &self,
        definition: &challenges::Model,
        event: &NormalizedEvent,
    ) -> Result<Option<String>, ServiceError> {
        let Some(detector) = self.detector_for(definition).await else {
            return Ok(None);
        };

        if !rules::event_type_matches(&detector.relevant_event_types(), &event.event_type) {
            return Ok(None);
        }

        let progress = self
            .store
            .get_or_create_challenge_progress(&event.namespace, &event.user_id, &definition.id)
            .await?;
        if progress.status == challenge_status::COMPLETED
            || progress.status == challenge_status::LOCKED
        {
            return Ok(None);
        }

        let mut result = detector.check_event(event);
        if !result.detected && detector.aggregate_driven() {
            match detector
                .check_aggregate(&event.namespace, &event.user_id, &self.store)
                .await
            {
                Ok(aggregate) => result = aggregate,
                Err(e) => {
                    warn!(challenge = %definition.id, "Aggregate check failed: {e}");
                    return Ok(None);
                }
            }
        }

        if result.detected {
            let evidence = json!({
                "confidence": result.confidence,
                "message": result.message,
                "details": result.evidence,
                "event_external_id": event.external_id,
            });

            // The terminal re-check lives inside the completion
            // transaction, so a replayed event is a no-op here.
            let newly_completed = self
                .store
                .complete_challenge(&event.namespace, &event.user_id, &definition.id, &evidence)
                .await?;

            if newly_completed {
                counter!("vendra_challenges_completed_total").increment(1);
                info!(
                    challenge = %definition.id,
                    user = %event.user_id,
                    confidence = result.confidence,
                    "Challenge completed"
                );

                if let Some(bus) = &self.bus {
                    bus.emit(
                        BusEvent::new(
                            EventCategory::Business,
                            "ctf.challenge.completed",
                            event.namespace.clone(),
                            event.user_id.clone(),
                        )
                        .with_field("challenge_id", definition.id.clone())
                        .with_field("points", definition.points)
                        .with_summary(format!("Challenge '{}' completed", definition.title)),
                    )
                    .await;
                }

                return Ok(Some(definition.id.clone()));
            }
        } else {
            self.store
                .record_challenge_attempt(&event.namespace, &event.user_id, &definition.id)
                .await?;
        }

        Ok(None)
    }

    async fn detector_for(&self, definition: &challenges::Model) -> Option<Arc<dyn Detector>> {
        if let Some(cached) = self.cache.read().await.get(&definition.id) {
            return Some(cached.clone());
        }

        let config: serde_json::Value =
            serde_json::from_str(&definition.detector_config).unwrap_or(serde_json::json!({}));

        match self.registry.build_detector(&definition.detector_class, &config) {
            Ok(detector) => {
                self.cache
                    .write()
                    .await
                    .insert(definition.id.clone(), detector.clone());
                Some(detector)
            }
            Err(e) => {
                // Unregistered class or bad config: the definition is inert.
                warn!(
                    challenge = %definition.id,
                    class = %definition.detector_class,
                    "Detector unavailable: {e}"
                );
                None
            }
        }
    }

    /// Drop all cached rule instances; the next event rebuilds them from
    /// the current definitions.
    pub async fn invalidate_cache(&self) {
        self.cache.write().await.clear();
    }

    pub async fn progress_for(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Vec<ChallengeProgressView>, ServiceError> {
        let definitions = self.store.list_active_challenges().await?;
        let rows = self.store.list_challenge_progress(namespace, user_id).await?;

        let mut views = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let row = rows.iter().find(|r| r.challenge_id == definition.id);

            let progress = if let Some(detector) = self.detector_for(&definition).await {
                detector.progress(namespace, user_id, &self.store).await.ok()
            } else {
                None
            };

            views.push(ChallengeProgressView {
                id: definition.id,
                title: definition.title,
                category: definition.category,
                difficulty: definition.difficulty,
                points: definition.points,
                status: row
                    .map_or(challenge_status::AVAILABLE, |r| r.status.as_str())
                    .to_string(),
                attempts: row.map_or(0, |r| r.attempts),
                completed_at: row.and_then(|r| r.completed_at.clone()),
                progress,
            });
        }

        Ok(views)
    }
}
