//! Audit trail for administrative actions.

use crate::auth::{Claims, Role};
use chrono::{DateTime, Utc};
use mealplan_store::document::{date_value, oid_value};
use mealplan_store::{Document, DocumentStore, ObjectId};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collection audit entries are written to.
pub const AUDIT_COLLECTION: &str = "audits";

/// Audited action names.
pub mod actions {
    /// `GET /backup/database-info`.
    pub const DATABASE_INFO: &str = "backup.database_info";
    /// `POST /backup/generate-script`.
    pub const GENERATE_SCRIPT: &str = "backup.generate_script";
    /// `POST /backup/validate-compatibility`.
    pub const VALIDATE_COMPATIBILITY: &str = "backup.validate_compatibility";
    /// `POST /backup/execute-script`.
    pub const EXECUTE_SCRIPT: &str = "backup.execute_script";
    /// A request rejected by the auth gate.
    pub const AUTH_DENIED: &str = "auth.denied";
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    /// The action completed.
    Success,
    /// The action was refused or failed.
    Failure,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

/// Who performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// An administrator.
    Admin,
    /// A regular user.
    User,
    /// No valid credentials were presented.
    Anonymous,
}

impl ActorType {
    fn as_str(self) -> &'static str {
        match self {
            ActorType::Admin => "admin",
            ActorType::User => "user",
            ActorType::Anonymous => "anonymous",
        }
    }
}

impl From<Role> for ActorType {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => ActorType::Admin,
            Role::User => ActorType::User,
        }
    }
}

/// Client details captured from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Client address; empty when unknown.
    pub ip_address: String,
    /// `User-Agent` header; empty when absent.
    pub user_agent: String,
}

/// An entry rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAuditEntry(pub &'static str);

impl fmt::Display for InvalidAuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audit entry is missing {}", self.0)
    }
}

/// One audited event.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    /// Action name (see [`actions`]).
    pub action: String,
    /// Outcome.
    pub status: AuditStatus,
    /// Acting user id, or `anonymous`.
    pub actor_id: String,
    /// Kind of actor.
    pub actor_type: ActorType,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// Client address.
    pub ip_address: String,
    /// Client user agent.
    pub user_agent: String,
    /// Why the action failed.
    pub failure_reason: Option<String>,
}

impl AuditEntry {
    /// A successful action by an authenticated user.
    pub fn success(action: &str, claims: &Claims, meta: &RequestMeta) -> Self {
        Self {
            action: action.to_string(),
            status: AuditStatus::Success,
            actor_id: claims.user_id.to_string(),
            actor_type: claims.role.into(),
            timestamp: Utc::now(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            failure_reason: None,
        }
    }

    /// A failed action; `claims` is `None` for unauthenticated callers.
    pub fn failure(
        action: &str,
        claims: Option<&Claims>,
        meta: &RequestMeta,
        reason: impl Into<String>,
    ) -> Self {
        let (actor_id, actor_type) = match claims {
            Some(c) => (c.user_id.to_string(), c.role.into()),
            None => ("anonymous".to_string(), ActorType::Anonymous),
        };
        Self {
            action: action.to_string(),
            status: AuditStatus::Failure,
            actor_id,
            actor_type,
            timestamp: Utc::now(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            failure_reason: Some(reason.into()),
        }
    }

    /// Checks that every required field is present.
    pub fn validate(&self) -> Result<(), InvalidAuditEntry> {
        if self.action.trim().is_empty() {
            return Err(InvalidAuditEntry("action"));
        }
        if self.actor_id.trim().is_empty() {
            return Err(InvalidAuditEntry("actorId"));
        }
        if self.ip_address.trim().is_empty() {
            return Err(InvalidAuditEntry("ipAddress"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(InvalidAuditEntry("userAgent"));
        }
        if self.status == AuditStatus::Failure
            && self.failure_reason.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            return Err(InvalidAuditEntry("failureReason"));
        }
        Ok(())
    }

    /// Converts the entry into a store document with a fresh id.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".into(), oid_value(ObjectId::new()));
        doc.insert("action".into(), Value::String(self.action.clone()));
        doc.insert("status".into(), Value::String(self.status.as_str().into()));
        doc.insert("actorId".into(), Value::String(self.actor_id.clone()));
        doc.insert(
            "actorType".into(),
            Value::String(self.actor_type.as_str().into()),
        );
        doc.insert("timestamp".into(), date_value(self.timestamp));
        doc.insert("ipAddress".into(), Value::String(self.ip_address.clone()));
        doc.insert("userAgent".into(), Value::String(self.user_agent.clone()));
        if let Some(reason) = &self.failure_reason {
            doc.insert("failureReason".into(), Value::String(reason.clone()));
        }
        doc
    }
}

/// Writes audit entries to the store.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn DocumentStore>,
}

impl AuditLog {
    /// Creates an audit log over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stores `entry`; returns whether it was written.
    ///
    /// Invalid entries and store failures are logged and dropped, never
    /// surfaced to the request.
    pub fn record(&self, entry: AuditEntry) -> bool {
        if let Err(e) = entry.validate() {
            warn!(action = %entry.action, "audit entry rejected: {}", e);
            return false;
        }
        match self
            .store
            .insert_many(AUDIT_COLLECTION, vec![entry.to_document()])
        {
            Ok(_) => {
                debug!(action = %entry.action, status = entry.status.as_str(), "audit entry stored");
                true
            }
            Err(e) => {
                warn!(action = %entry.action, "audit entry not stored: {}", e);
                false
            }
        }
    }
}
