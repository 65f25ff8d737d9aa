//! # Meal Planner Backup Server
//!
//! HTTP surface for the backup subsystem.
//!
//! This crate provides:
//! - The `/backup/*` endpoints (database info, script generation,
//!   compatibility checks, script execution)
//! - Authentication middleware (HMAC-SHA256 bearer tokens, admin role)
//! - An audit trail written to the `audits` collection
//!
//! # Authentication
//!
//! Every `/backup/*` route requires an administrator token:
//!
//! ```rust,ignore
//! use mealplan_server::{AuthConfig, Role, TokenValidator};
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(user_id, Role::Admin)?;
//! // Authorization: Bearer <token>
//! ```
//!
//! Missing or invalid tokens get `401`; valid tokens without the admin
//! role get `403 Admin access required`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod audit;
mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use audit::{
    actions, ActorType, AuditEntry, AuditLog, AuditStatus, InvalidAuditEntry, RequestMeta,
    AUDIT_COLLECTION,
};
pub use auth::{bearer_token, AuthConfig, Claims, Role, TokenValidator};
pub use config::{
    ServerConfig, ENV_AUTH_SECRET, ENV_BIND_ADDR, ENV_MIN_SUPPORTED_VERSION, ENV_MODE,
    ENV_SCRIPT_STEP_LIMIT,
};
pub use error::{ErrorResponse, FieldError, ServerError, ServerResult};
pub use handler::{AppState, HandlerContext};
pub use server::{router, BackupServer};
