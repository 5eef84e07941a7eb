use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// 256-bit random token, hex-encoded. Never reused.
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    pub user_id: String,

    /// Tenant partition key derived from the user id.
    pub namespace: String,

    /// Present only for permanent (email-bound) sessions.
    pub email: Option<String>,

    pub is_temporary: bool,

    pub created_at: String,

    pub expires_at: String,

    pub last_rotated_at: String,

    pub rotation_count: i32,

    pub fingerprint_strict: String,

    pub fingerprint_loose: String,

    pub original_ip: Option<String>,

    pub current_ip: Option<String>,

    pub csrf_token: String,

    /// Active vendor sub-account, synchronized across all of a user's sessions.
    pub vendor_context: Option<String>,

    /// Keyed MAC over the canonical serialized record, hex-encoded.
    pub signature: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
