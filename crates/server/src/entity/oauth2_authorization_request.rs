//! Pending authorization request, keyed by `(client_id, state)`.
//!
//! The row outlives the decision (status `consented`/`denied`) until it
//! expires so a replayed `state` cannot open a second request.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CONSENTED: &str = "consented";
pub const STATUS_DENIED: &str = "denied";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_authorization_request")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub client_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub state: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    /// Set once the user has authenticated
    pub user_id: Option<String>,
    pub status: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    pub fn is_pending(&self) -> bool {
        self.status == STATUS_PENDING
    }
}
