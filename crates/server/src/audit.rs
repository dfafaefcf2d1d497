//! Audit trail for authorization decisions.
//!
//! Every event is emitted on the `audit` tracing target and appended to the
//! `audit_event` table. A failed insert is logged and otherwise ignored; the
//! request being audited is never failed because of it.

use crate::entity::audit_event;
use crate::oauth2::state::bounded;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Authorize,
    Login,
    Consent,
    TokenIssued,
    TokenRefreshed,
    TokenRevoked,
    CodeReplay,
    RefreshReuse,
    UserInfo,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Login => "login",
            Self::Consent => "consent",
            Self::TokenIssued => "token_issued",
            Self::TokenRefreshed => "token_refreshed",
            Self::TokenRevoked => "token_revoked",
            Self::CodeReplay => "code_replay",
            Self::RefreshReuse => "refresh_reuse",
            Self::UserInfo => "userinfo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub actor: String,
    pub resource: Option<String>,
    pub metadata: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            action,
            outcome,
            actor: "anonymous".to_string(),
            resource: None,
            metadata: Map::new(),
        }
    }

    pub fn success(action: AuditAction) -> Self {
        Self::new(action, AuditOutcome::Success)
    }

    pub fn failure(action: AuditAction) -> Self {
        Self::new(action, AuditOutcome::Failure)
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// The client the event concerns, recorded as `client:<id>`.
    pub fn client(mut self, client_id: &str) -> Self {
        self.resource = Some(format!("client:{client_id}"));
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone)]
pub struct AuditLog {
    db: Arc<DatabaseConnection>,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(db: Arc<DatabaseConnection>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub async fn record(&self, event: AuditEvent) {
        let metadata = Value::Object(event.metadata.clone()).to_string();
        tracing::info!(
            target: "audit",
            action = event.action.as_str(),
            outcome = event.outcome.as_str(),
            actor = %event.actor,
            resource = event.resource.as_deref().unwrap_or("-"),
            metadata = %metadata,
            "audit event"
        );

        let row = audit_event::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            occurred_at: Set(OffsetDateTime::now_utc()),
            actor: Set(event.actor),
            action: Set(event.action.as_str().to_string()),
            resource: Set(event.resource),
            outcome: Set(event.outcome.as_str().to_string()),
            metadata: Set((!event.metadata.is_empty()).then_some(metadata)),
        };

        if let Err(e) = bounded(self.timeout, row.insert(self.db.as_ref())).await {
            tracing::warn!(error = %e, "Failed to persist audit event");
        }
    }
}
