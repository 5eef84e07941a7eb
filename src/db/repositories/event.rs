use anyhow::{Context, Result};
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, sea_query::OnConflict,
};

use crate::domain::NormalizedEvent;
use crate::entities::ctf_events;

pub struct EventRepository {
    conn: DatabaseConnection,
}

impl EventRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Insert-or-ignore keyed by the external id. Returns whether a row
    /// was actually written; re-delivery of the same bus message is a
    /// no-op.
    pub async fn insert_dedup(&self, event: &NormalizedEvent) -> Result<bool> {
        let active = ctf_events::ActiveModel {
            id: NotSet,
            external_id: Set(event.external_id.clone()),
            category: Set(event.category.as_str().to_string()),
            event_type: Set(event.event_type.clone()),
            subtype: Set(event.subtype.clone()),
            namespace: Set(event.namespace.clone()),
            user_id: Set(event.user_id.clone()),
            session_id: Set(event.session_id.clone()),
            workflow_id: Set(event.workflow_id.clone()),
            payload: Set(serde_json::Value::Object(event.payload.clone()).to_string()),
            summary: Set(event.summary.clone()),
            severity: Set(event.severity.clone()),
            agent_name: Set(event.agent_name.clone()),
            tool_name: Set(event.tool_name.clone()),
            duration_ms: Set(event.duration_ms),
            occurred_at: Set(event.occurred_at.clone()),
        };

        let rows = ctf_events::Entity::insert(active)
            .on_conflict(
                OnConflict::column(ctf_events::Column::ExternalId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .context("Failed to persist event")?;

        Ok(rows > 0)
    }

    pub async fn count_by_type(
        &self,
        namespace: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<u64> {
        ctf_events::Entity::find()
            .filter(ctf_events::Column::Namespace.eq(namespace))
            .filter(ctf_events::Column::UserId.eq(user_id))
            .filter(ctf_events::Column::EventType.eq(event_type))
            .count(&self.conn)
            .await
            .context("Failed to count events")
    }

    pub async fn count_by_type_since(
        &self,
        namespace: &str,
        user_id: &str,
        event_type: &str,
        since: &str,
    ) -> Result<u64> {
        ctf_events::Entity::find()
            .filter(ctf_events::Column::Namespace.eq(namespace))
            .filter(ctf_events::Column::UserId.eq(user_id))
            .filter(ctf_events::Column::EventType.eq(event_type))
            .filter(ctf_events::Column::OccurredAt.gt(since))
            .count(&self.conn)
            .await
            .context("Failed to count recent events")
    }

    pub async fn list_by_type(
        &self,
        namespace: &str,
        user_id: &str,
        event_type: &str,
        limit: u64,
    ) -> Result<Vec<ctf_events::Model>> {
        ctf_events::Entity::find()
            .filter(ctf_events::Column::Namespace.eq(namespace))
            .filter(ctf_events::Column::UserId.eq(user_id))
            .filter(ctf_events::Column::EventType.eq(event_type))
            .order_by_desc(ctf_events::Column::Id)
            .limit(limit)
            .all(&self.conn)
            .await
            .context("Failed to list events")
    }
}
