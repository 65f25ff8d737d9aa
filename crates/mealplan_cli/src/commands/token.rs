//! Token command implementation.

use super::CommandResult;
use mealplan_server::{AuthConfig, Role, TokenValidator};
use uuid::Uuid;

/// Prints a bearer token signed with `secret`.
pub fn run(role: &str, secret: &str, user: Option<Uuid>) -> CommandResult {
    println!("{}", mint(role, secret, user)?);
    Ok(())
}

/// Creates the token.
pub fn mint(role: &str, secret: &str, user: Option<Uuid>) -> CommandResult<String> {
    if secret.is_empty() {
        return Err("Token secret must not be empty".into());
    }
    let role: Role = role.parse()?;
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    Ok(validator.create_token(user.unwrap_or_else(Uuid::new_v4), role)?)
}
