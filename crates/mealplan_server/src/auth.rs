//! Bearer-token authentication using HMAC-SHA256.
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 16 bytes: user id (UUID)
//! - 1 byte: role
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the preceding 25 bytes
//!
//! Total: 57 bytes, hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_LEN: usize = 25;
const TOKEN_LEN: usize = PAYLOAD_LEN + 32;

/// Role carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular application user.
    User,
    /// Administrator; may use the backup endpoints.
    Admin,
}

impl Role {
    fn to_byte(self) -> u8 {
        match self {
            Role::User => 0,
            Role::Admin => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Role::User),
            1 => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Admin => "admin",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Identity extracted from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Authenticated user.
    pub user_id: Uuid,
    /// Role of the user.
    pub role: Role,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
}

impl Claims {
    /// Returns true for administrators.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a hex-encoded token for `user_id` issued now.
    pub fn create_token(&self, user_id: Uuid, role: Role) -> ServerResult<String> {
        let issued = Utc::now().timestamp_millis();

        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.extend_from_slice(user_id.as_bytes());
        data.push(role.to_byte());
        data.extend_from_slice(&issued.to_be_bytes());

        let signature = self.mac(&data)?.finalize().into_bytes();
        data.extend_from_slice(&signature);
        Ok(hex::encode(data))
    }

    /// Validates a hex-encoded token and returns its claims.
    pub fn validate_token(&self, token: &str) -> ServerResult<Claims> {
        let invalid = || ServerError::Unauthorized("Invalid token".into());

        let bytes = hex::decode(token.trim()).map_err(|_| invalid())?;
        if bytes.len() != TOKEN_LEN {
            return Err(invalid());
        }
        let (payload, signature) = bytes.split_at(PAYLOAD_LEN);

        self.mac(payload)?
            .verify_slice(signature)
            .map_err(|_| invalid())?;

        let user_id = Uuid::from_slice(&payload[0..16]).map_err(|_| invalid())?;
        let role = Role::from_byte(payload[16]).ok_or_else(invalid)?;
        let mut millis = [0u8; 8];
        millis.copy_from_slice(&payload[17..PAYLOAD_LEN]);
        let millis = i64::from_be_bytes(millis);

        let now = Utc::now().timestamp_millis();
        let expiry = i64::try_from(self.config.token_expiry.as_millis()).unwrap_or(i64::MAX);
        if now > millis.saturating_add(expiry) {
            return Err(ServerError::Unauthorized("Token expired".into()));
        }

        let issued_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(invalid)?;
        Ok(Claims {
            user_id,
            role,
            issued_at,
        })
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> ServerResult<&str> {
    let header =
        header.ok_or_else(|| ServerError::Unauthorized("Authentication required".into()))?;
    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(ServerError::Unauthorized("Invalid token".into())),
    }
}
