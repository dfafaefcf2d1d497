//! OAuth2 Authorization Code entity - single-use codes exchanged for tokens.
//!
//! Only the SHA-256 hash of the code is stored.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_authorization")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code_hash: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    /// Refresh token family minted from this code, set on redemption
    pub token_family: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Check if this authorization code has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}
