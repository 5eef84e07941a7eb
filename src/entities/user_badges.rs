use sea_orm::entity::prelude::*;

/// Badge award. Unique per (namespace, user, badge); insertion is the only
/// mutation, awards are never revoked here.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_badges")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub namespace: String,

    pub user_id: String,

    pub badge_id: String,

    pub earned_at: String,

    pub evidence: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
