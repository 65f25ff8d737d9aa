//! Request handlers for the backup endpoints.

use crate::audit::{actions, AuditEntry, AuditLog, RequestMeta};
use crate::auth::{bearer_token, AuthConfig, Claims, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ErrorResponse, FieldError, ServerError, ServerResult};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use mealplan_backup::{
    CollectionInventory, CollectionRegistry, CompatibilityValidator, ExportFormat, ExportRequest,
    Exporter, ForeignSchema, ScriptSandbox, Version,
};
use mealplan_store::DocumentStore;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Backing store.
    pub store: Arc<dyn DocumentStore>,
    /// Bearer token issuer and validator.
    pub tokens: TokenValidator,
    /// Audit trail writer.
    pub audit: AuditLog,
    inventory: CollectionInventory,
    exporter: Exporter,
    validator: CompatibilityValidator,
    sandbox: ScriptSandbox,
}

impl HandlerContext {
    /// Wires the backup components over `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn DocumentStore>) -> Self {
        let registry = Arc::new(CollectionRegistry::meal_planner());
        let tokens = TokenValidator::new(
            AuthConfig::new(config.auth_secret.clone()).with_expiry(config.token_expiry),
        );
        Self {
            tokens,
            audit: AuditLog::new(Arc::clone(&store)),
            inventory: CollectionInventory::new(Arc::clone(&store), Arc::clone(&registry)),
            exporter: Exporter::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                config.backup.clone(),
            ),
            validator: CompatibilityValidator::new(registry, config.backup.clone()),
            sandbox: ScriptSandbox::new(Arc::clone(&store)).with_config(config.sandbox),
            store,
            config,
        }
    }

    fn fail(&self, err: ServerError) -> ErrorResponse {
        if err.is_server_error() {
            error!("request failed: {}", err);
        }
        err.in_mode(self.config.production)
    }
}

/// Shared handler state.
pub type AppState = Arc<HandlerContext>;

/// Runs store-bound work on the blocking pool so store scans never stall
/// the async workers.
async fn run_blocking<T, F>(state: &AppState, work: F) -> ServerResult<T>
where
    F: FnOnce(&HandlerContext) -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(state.as_ref()))
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}

/// Writes an audit entry from the blocking pool.
async fn audit(state: &AppState, entry: AuditEntry) {
    let log = state.audit.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || log.record(entry)).await {
        error!("audit task failed: {}", e);
    }
}

/// Audits the outcome of `action` and converts errors for the response.
async fn finish<T>(
    state: &AppState,
    action: &str,
    claims: &Claims,
    meta: &RequestMeta,
    result: ServerResult<T>,
) -> Result<T, ErrorResponse> {
    let entry = match &result {
        Ok(_) => AuditEntry::success(action, claims, meta),
        Err(e) => AuditEntry::failure(action, Some(claims), meta, e.to_string()),
    };
    audit(state, entry).await;
    result.map_err(|e| state.fail(e))
}

/// Reads client address and user agent from a request.
///
/// The first `X-Forwarded-For` hop wins over the socket address.
pub fn request_meta(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestMeta {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let ip_address = forwarded
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_default();
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    RequestMeta {
        ip_address,
        user_agent,
    }
}

/// Auth gate: valid bearer token and administrator role.
///
/// Rejections are audited as `auth.denied`. On success the [`Claims`] and
/// [`RequestMeta`] are attached to the request for the handler.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0);
    let meta = request_meta(request.headers(), peer);
    let path = request.uri().path().to_string();

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let claims = match bearer_token(header).and_then(|t| state.tokens.validate_token(t)) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(path = %path, ip = %meta.ip_address, "rejected request: {}", e);
            audit(
                &state,
                AuditEntry::failure(actions::AUTH_DENIED, None, &meta, e.to_string()),
            )
            .await;
            return state.fail(e).into_response();
        }
    };

    if !claims.is_admin() {
        let e = ServerError::Forbidden;
        warn!(path = %path, user = %claims.user_id, "non-admin request refused");
        audit(
            &state,
            AuditEntry::failure(actions::AUTH_DENIED, Some(&claims), &meta, e.to_string()),
        )
        .await;
        return state.fail(e).into_response();
    }

    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(meta);
    next.run(request).await
}

/// Parses a JSON object body; an empty body reads as `{}`.
fn parse_body(body: &Bytes) -> ServerResult<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ServerError::field("body", "body must be a JSON object")),
    }
}

/// Validates a `generate-script` body.
pub fn parse_export_request(body: &Map<String, Value>) -> ServerResult<ExportRequest> {
    let mut errors = Vec::new();

    let format = match body.get("format") {
        Some(Value::String(s)) => match s.parse::<ExportFormat>() {
            Ok(format) => Some(format),
            Err(_) => {
                errors.push(FieldError::new(
                    "format",
                    "format must be one of: mongodb, json",
                ));
                None
            }
        },
        None | Some(Value::Null) => {
            errors.push(FieldError::new("format", "format is required"));
            None
        }
        Some(_) => {
            errors.push(FieldError::new("format", "format must be a string"));
            None
        }
    };

    let collections = match body.get("collections") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let names: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect();
            names.unwrap_or_else(|| {
                errors.push(FieldError::new(
                    "collections",
                    "collections must be an array of strings",
                ));
                Vec::new()
            })
        }
        Some(_) => {
            errors.push(FieldError::new(
                "collections",
                "collections must be an array of strings",
            ));
            Vec::new()
        }
    };

    let include_indexes = match body.get("includeIndexes") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            errors.push(FieldError::new(
                "includeIndexes",
                "includeIndexes must be a boolean",
            ));
            false
        }
    };

    match format {
        Some(format) if errors.is_empty() => Ok(ExportRequest::all(format)
            .with_collections(collections)
            .with_indexes(include_indexes)),
        _ => Err(ServerError::Validation(errors)),
    }
}

/// Validates a `validate-compatibility` body.
pub fn parse_compatibility_request(
    body: &Map<String, Value>,
) -> ServerResult<(Version, Option<ForeignSchema>)> {
    let version = match body.get("backupVersion") {
        Some(Value::String(s)) if !s.trim().is_empty() => Version::parse(s).map_err(|_| {
            ServerError::field(
                "backupVersion",
                "backupVersion must be a version like 1.2.3",
            )
        })?,
        None | Some(Value::Null) => {
            return Err(ServerError::field("backupVersion", "backupVersion is required"))
        }
        Some(_) => {
            return Err(ServerError::field(
                "backupVersion",
                "backupVersion must be a non-empty string",
            ))
        }
    };
    let foreign = body.get("backupData").and_then(ForeignSchema::from_backup_data);
    Ok((version, foreign))
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": state.config.backup.app_version.to_string(),
    }))
}

/// `GET /backup/database-info`.
pub async fn database_info(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<Json<Value>, ErrorResponse> {
    let version = state.config.backup.app_version.to_string();
    let result = run_blocking(&state, move |ctx| {
        Ok(ctx.inventory.database_info(&version)?)
    })
    .await;
    let info = finish(&state, actions::DATABASE_INFO, &claims, &meta, result).await?;
    info!(
        user = %claims.user_id,
        "database info: {} documents",
        info.total_documents
    );
    Ok(Json(json!({ "success": true, "data": info })))
}

/// `POST /backup/generate-script`.
pub async fn generate_script(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(meta): Extension<RequestMeta>,
    body: Bytes,
) -> Result<Response, ErrorResponse> {
    let result = match parse_body(&body).and_then(|body| parse_export_request(&body)) {
        Ok(request) => {
            run_blocking(&state, move |ctx| {
                let payload = ctx.exporter.generate(&request)?;
                Ok((request, payload))
            })
            .await
        }
        Err(e) => Err(e),
    };
    let (request, payload) =
        finish(&state, actions::GENERATE_SCRIPT, &claims, &meta, result).await?;
    info!(
        user = %claims.user_id,
        format = %request.format,
        "generated {}",
        payload.filename
    );

    let headers = [
        (CONTENT_TYPE, payload.content_type.to_string()),
        (
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", payload.filename),
        ),
    ];
    Ok((headers, payload.body).into_response())
}

/// `POST /backup/validate-compatibility`.
pub async fn validate_compatibility(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(meta): Extension<RequestMeta>,
    body: Bytes,
) -> Result<Json<Value>, ErrorResponse> {
    let result = parse_body(&body).and_then(|body| parse_compatibility_request(&body));
    let (backup, foreign) =
        finish(&state, actions::VALIDATE_COMPATIBILITY, &claims, &meta, result).await?;

    let report = state.validator.validate(&backup, foreign.as_ref());
    info!(
        user = %claims.user_id,
        backup = %backup,
        compatible = report.is_compatible,
        "compatibility checked"
    );
    Ok(Json(json!({
        "success": true,
        "data": {
            "currentVersion": report.current_version,
            "backupVersion": report.backup_version,
            "compatibility": report,
        }
    })))
}

/// `POST /backup/execute-script`.
///
/// The script runs on the blocking pool; the response is sent once it has
/// run to completion.
pub async fn execute_script(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(meta): Extension<RequestMeta>,
    body: Bytes,
) -> Result<Response, ErrorResponse> {
    let script = match parse_body(&body) {
        Ok(mut body) => body.remove("script").unwrap_or(Value::Null),
        Err(e) => return finish(&state, actions::EXECUTE_SCRIPT, &claims, &meta, Err(e)).await,
    };

    let result = run_blocking(&state, move |ctx| Ok(ctx.sandbox.execute_json(&script)?)).await;
    let result = match result {
        Ok(result) => result,
        Err(e) => return finish(&state, actions::EXECUTE_SCRIPT, &claims, &meta, Err(e)).await,
    };

    if result.success {
        audit(&state, AuditEntry::success(actions::EXECUTE_SCRIPT, &claims, &meta)).await;
        info!(
            user = %claims.user_id,
            lines = result.output.len(),
            "script executed"
        );
        return Ok(Json(json!({ "success": true, "output": result.output })).into_response());
    }

    let detail = result.error.clone().unwrap_or_default();
    warn!(user = %claims.user_id, "script failed: {}", detail);
    audit(
        &state,
        AuditEntry::failure(
            actions::EXECUTE_SCRIPT,
            Some(&claims),
            &meta,
            format!("Script execution failed: {detail}"),
        ),
    )
    .await;
    let body = json!({
        "success": false,
        "message": "Script execution failed",
        "error": result.error,
        "errorKind": result.error_kind,
        "output": result.output,
    });
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn export_request_defaults() {
        let request = parse_export_request(&body(json!({"format": "json"}))).unwrap();
        assert_eq!(request.format, ExportFormat::JsonExport);
        assert!(request.collections.is_empty());
        assert!(!request.include_indexes);
    }

    #[test]
    fn export_request_fields() {
        let request = parse_export_request(&body(json!({
            "format": "mongodb",
            "collections": ["Meal", "users"],
            "includeIndexes": true,
        })))
        .unwrap();
        assert_eq!(request.format, ExportFormat::ScriptDump);
        assert_eq!(request.collections, vec!["Meal", "users"]);
        assert!(request.include_indexes);
    }

    #[test]
    fn export_request_collects_every_problem() {
        let err = parse_export_request(&body(json!({
            "format": "xml",
            "collections": "Meal",
            "includeIndexes": "yes",
        })))
        .unwrap_err();
        let ServerError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["format", "collections", "includeIndexes"]);
    }

    #[test]
    fn export_request_requires_format() {
        let err = parse_export_request(&Map::new()).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn compatibility_request_parsing() {
        let (version, foreign) = parse_compatibility_request(&body(json!({
            "backupVersion": "1.2.0",
            "backupData": {"metadata": {"statistics": {"recipes": {"schema": ["name"]}}}},
        })))
        .unwrap();
        assert_eq!(version, Version::new(1, 2, 0));
        assert!(foreign.unwrap().collections.contains_key("recipes"));

        assert!(parse_compatibility_request(&Map::new()).is_err());
        assert!(parse_compatibility_request(&body(json!({"backupVersion": "abc"}))).is_err());
        assert!(parse_compatibility_request(&body(json!({"backupVersion": 1}))).is_err());
    }

    #[test]
    fn body_parsing() {
        assert!(parse_body(&Bytes::new()).unwrap().is_empty());
        assert!(parse_body(&Bytes::from_static(b"[1]")).is_err());
        assert!(parse_body(&Bytes::from_static(b"{oops")).is_err());
        assert_eq!(
            parse_body(&Bytes::from_static(br#"{"a": 1}"#)).unwrap()["a"],
            1
        );
    }

    #[test]
    fn meta_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        headers.insert(USER_AGENT, HeaderValue::from_static("test-agent"));
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let meta = request_meta(&headers, Some(peer));
        assert_eq!(meta.ip_address, "203.0.113.9");
        assert_eq!(meta.user_agent, "test-agent");

        let meta = request_meta(&HeaderMap::new(), Some(peer));
        assert_eq!(meta.ip_address, "127.0.0.1");
        assert_eq!(meta.user_agent, "unknown");

        assert_eq!(request_meta(&HeaderMap::new(), None).ip_address, "");
    }
}
