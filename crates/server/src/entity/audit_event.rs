//! Append-only audit trail of authorization decisions.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_event")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub occurred_at: OffsetDateTime,
    /// User id, client id or `anonymous`
    pub actor: String,
    pub action: String,
    pub resource: Option<String>,
    /// `success` or `failure`
    pub outcome: String,
    /// JSON object with event specific detail
    pub metadata: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
