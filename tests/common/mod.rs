use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    routing::get,
    Json, Router,
};
use branchpoint_api::{
    auth::{AuthConfig, AuthService, Claims},
    config::AppConfig,
    db,
    entities::{branch_grant, dining_table},
    events::{self, EventBroadcaster},
    services::AppServices,
    AppState,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseBackend as DbBackend, Set, Statement};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const TEST_JWT_SECRET: &str =
    "integration_test_secret_with_sufficient_length_and_varied_characters_0123456789";

/// Helper harness for spinning up an application state backed by a
/// file-based SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub branch_id: Uuid,
    token: String,
    auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir for test database");
        let db_file = tmp.path().join("branchpoint_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        // Ensure a clean schema for each test run.
        let reset_statements = [
            "DROP TABLE IF EXISTS order_items;",
            "DROP TABLE IF EXISTS payments;",
            "DROP TABLE IF EXISTS idempotency_keys;",
            "DROP TABLE IF EXISTS orders;",
            "DROP TABLE IF EXISTS inventory_transactions;",
            "DROP TABLE IF EXISTS stocktake_items;",
            "DROP TABLE IF EXISTS stocktakes;",
            "DROP TABLE IF EXISTS dining_tables;",
            "DROP TABLE IF EXISTS branch_grants;",
        ];
        for sql in reset_statements {
            let _ = pool
                .execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
                .await;
        }

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = events::event_channel(256);
        let broadcaster = Arc::new(EventBroadcaster::new(64));
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            Some(broadcaster.clone()),
        ));

        let auth_cfg = AuthConfig::new(
            cfg.jwt_secret.clone(),
            "branchpoint-api".to_string(),
            "branchpoint-auth".to_string(),
            std::time::Duration::from_secs(cfg.jwt_expiration as u64),
        );
        let auth_service = Arc::new(AuthService::new(auth_cfg));

        let services = AppServices::new(db_arc.clone(), &cfg, Some(Arc::new(event_sender.clone())))
            .expect("build app services for tests");

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            broadcaster,
            services,
            auth: auth_service.clone(),
        };

        let branch_id = Uuid::new_v4();
        let token = mint_token(
            &cfg.jwt_secret,
            &["admin"],
            &["admin:*"],
            Some(branch_id),
        );

        let auth_service_for_layer = auth_service.clone();
        let api_router =
            branchpoint_api::api_v1_routes().layer(middleware::from_fn_with_state(
                auth_service_for_layer,
                |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
                 mut req: Request<Body>,
                 next: axum::middleware::Next| async move {
                    req.extensions_mut().insert(auth);
                    next.run(req).await
                },
            ));

        let router = Router::new()
            .route("/health", get(branchpoint_api::health_check))
            .route(
                "/health/live",
                get(|| async { (StatusCode::OK, Json(json!({ "status": "up" }))) }),
            )
            .nest("/api/v1", api_router)
            .with_state(state.clone());

        Self {
            router,
            state,
            branch_id,
            token,
            auth_service,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    #[allow(dead_code)]
    pub fn auth_service(&self) -> Arc<AuthService> {
        self.auth_service.clone()
    }

    /// Clone of the router, for tests that build raw requests.
    #[allow(dead_code)]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bearer token for the default admin user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Mint a token for a non-admin user with explicit grants.
    #[allow(dead_code)]
    pub fn token_for(
        &self,
        roles: &[&str],
        permissions: &[&str],
        branch_id: Option<Uuid>,
    ) -> String {
        self.token_for_user(Uuid::new_v4(), roles, permissions, branch_id)
    }

    /// Mint a token for a specific user id, for tests that pair tokens
    /// with seeded branch grants.
    #[allow(dead_code)]
    pub fn token_for_user(
        &self,
        user_id: Uuid,
        roles: &[&str],
        permissions: &[&str],
        branch_id: Option<Uuid>,
    ) -> String {
        mint_token_for(
            &self.state.config.jwt_secret,
            user_id,
            roles,
            permissions,
            branch_id,
        )
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn request_authenticated_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let token = self.token().to_string();
        self.request_with_headers(method, uri, body, &token, headers)
            .await
    }

    /// Like `request_authenticated_with_headers` but with an explicit
    /// bearer token, for tests exercising per-user behavior.
    #[allow(dead_code)]
    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: &str,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        builder = builder.header("authorization", format!("Bearer {}", token));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Seed a dining table in the default branch.
    #[allow(dead_code)]
    pub async fn seed_table(&self, name: &str) -> dining_table::Model {
        dining_table::ActiveModel {
            id: Set(Uuid::new_v4()),
            branch_id: Set(self.branch_id),
            name: Set(name.to_string()),
            status: Set(dining_table::status::AVAILABLE.to_string()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed dining table for tests")
    }

    /// Grant a user explicit access to a branch.
    #[allow(dead_code)]
    pub async fn seed_branch_grant(&self, user_id: Uuid, branch_id: Uuid) {
        branch_grant::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            branch_id: Set(branch_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed branch grant for tests");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

fn mint_token(
    secret: &str,
    roles: &[&str],
    permissions: &[&str],
    branch_id: Option<Uuid>,
) -> String {
    mint_token_for(secret, Uuid::new_v4(), roles, permissions, branch_id)
}

fn mint_token_for(
    secret: &str,
    user_id: Uuid,
    roles: &[&str],
    permissions: &[&str],
    branch_id: Option<Uuid>,
) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        name: Some("Test User".to_string()),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        branch_id,
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::hours(1)).timestamp(),
        nbf: now.timestamp(),
        iss: "branchpoint-auth".to_string(),
        aud: "branchpoint-api".to_string(),
    };

    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode access token")
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body should be JSON")
}
