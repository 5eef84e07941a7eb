use sea_orm::entity::prelude::*;

/// Badge definition, upserted from declarative files only.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "badges")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    pub version: i32,

    pub title: String,

    pub description: String,

    pub rarity: String,

    pub evaluator_class: String,

    /// JSON-encoded evaluator configuration blob.
    pub evaluator_config: String,

    pub active: bool,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
