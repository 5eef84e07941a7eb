use sea_orm::entity::prelude::*;

/// Durable, deduplicated copy of a bus event.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ctf_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Idempotency key: re-delivery of the same bus message maps to the
    /// same external id and must not create a second row.
    #[sea_orm(unique)]
    pub external_id: String,

    /// business | agent
    pub category: String,

    pub event_type: String,

    pub subtype: Option<String>,

    pub namespace: String,

    pub user_id: String,

    pub session_id: Option<String>,

    pub workflow_id: Option<String>,

    /// JSON-encoded free-form payload.
    pub payload: String,

    pub summary: String,

    pub severity: String,

    pub agent_name: Option<String>,

    pub tool_name: Option<String>,

    pub duration_ms: Option<i64>,

    pub occurred_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
