use sea_orm::entity::prelude::*;

/// Challenge definition, upserted from declarative files only.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "challenges")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    pub version: i32,

    pub title: String,

    pub description: String,

    pub category: String,

    pub difficulty: String,

    pub points: i32,

    /// Registered detector class name; an unregistered name leaves the
    /// definition inert.
    pub detector_class: String,

    /// JSON-encoded detector configuration blob.
    pub detector_config: String,

    pub active: bool,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
