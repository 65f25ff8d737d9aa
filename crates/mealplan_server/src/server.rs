//! Router construction and the listening server.

use crate::auth::Role;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{self, AppState, HandlerContext};
use axum::routing::{get, post};
use axum::{middleware, Router};
use mealplan_store::DocumentStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Builds the router: `/health` plus the admin-only `/backup/*` endpoints.
pub fn router(state: AppState) -> Router {
    let backup = Router::new()
        .route("/database-info", get(handler::database_info))
        .route("/generate-script", post(handler::generate_script))
        .route(
            "/validate-compatibility",
            post(handler::validate_compatibility),
        )
        .route("/execute-script", post(handler::execute_script))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            handler::require_admin,
        ));

    Router::new()
        .route("/health", get(handler::health))
        .nest("/backup", backup)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The backup server.
///
/// # Example
///
/// ```no_run
/// use mealplan_server::{BackupServer, ServerConfig};
/// use mealplan_store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn run() -> mealplan_server::ServerResult<()> {
/// let server = BackupServer::new(ServerConfig::default(), Arc::new(MemoryStore::new()));
/// server.serve().await
/// # }
/// ```
pub struct BackupServer {
    context: AppState,
}

impl BackupServer {
    /// Creates a server over `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            context: Arc::new(HandlerContext::new(config, store)),
        }
    }

    /// Returns the shared handler state.
    pub fn context(&self) -> &AppState {
        &self.context
    }

    /// Returns a router bound to this server's state.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.context))
    }

    /// Issues a bearer token signed with this server's secret.
    pub fn issue_token(&self, user_id: Uuid, role: Role) -> ServerResult<String> {
        self.context.tokens.create_token(user_id, role)
    }

    /// Serves until Ctrl-C.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_with_shutdown(async {
            // An unavailable signal handler leaves the server running.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves until `shutdown` completes.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.context.config.bind_addr).await?;
        info!("backup server listening on {}", listener.local_addr()?);
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        info!("backup server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealplan_store::MemoryStore;

    fn server() -> BackupServer {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_auth_secret(b"server-test-secret".to_vec());
        BackupServer::new(config, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn issued_tokens_validate() {
        let server = server();
        let user = Uuid::new_v4();
        let token = server.issue_token(user, Role::Admin).unwrap();
        let claims = server.context().tokens.validate_token(&token).unwrap();
        assert_eq!(claims.user_id, user);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        server().serve_with_shutdown(async {}).await.unwrap();
    }
}
