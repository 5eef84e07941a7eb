use sea_orm::entity::prelude::*;

/// Per-user challenge progress. Unique per (namespace, user, challenge);
/// status only advances, completed is terminal.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_challenges")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub namespace: String,

    pub user_id: String,

    pub challenge_id: String,

    /// locked | available | in_progress | completed
    pub status: String,

    pub attempts: i32,

    pub failures: i32,

    pub hints_used: i32,

    pub first_attempt_at: Option<String>,

    pub completed_at: Option<String>,

    /// JSON evidence snapshot captured at completion.
    pub evidence: Option<String>,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
