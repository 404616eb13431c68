//! HTTP server
//!
//! Middleware order, outermost first: panic catcher, tracing, CORS,
//! request timeout, [`auth::authenticate`], [`transaction::transaction`],
//! [`auth::load_identity`]. Admin routes add [`auth::require_admin`].

use axum::{
    Router,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::BarbellConfig;
use crate::storage::SqliteStore;
use crate::storage::migrate::DirectorySource;

pub mod auth;
pub mod context;
pub mod error;
pub mod routes;
pub mod transaction;

pub use auth::{CredentialVerifier, StaticTokenVerifier, VerifiedSubject};
pub use context::{AbortTransaction, CurrentIdentity, Executor, JsonBody, PathId, executor};

/// Server state
#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub auth_required: bool,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(store: SqliteStore, config: &BarbellConfig) -> Self {
        Self {
            store,
            verifier: Arc::new(StaticTokenVerifier::new(&config.auth.tokens)),
            auth_required: config.auth.required,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/exercises", post(routes::create_exercise))
        .route("/exercises/{id}", put(routes::update_exercise))
        .route_layer(middleware::from_fn(auth::require_admin));

    Router::new()
        .route("/hello", get(routes::hello))
        .route("/users", get(routes::list_users))
        .route("/regions", get(routes::list_regions))
        .route("/muscle-groups", get(routes::list_muscle_groups))
        .route("/exercise-areas", get(routes::list_exercise_areas))
        .route("/muscles", get(routes::list_muscles))
        .route("/exercise-types", get(routes::exercise_types))
        .route("/exercises", get(routes::list_exercises))
        .route("/exercises/{id}", get(routes::get_exercise))
        .route("/workouts", get(routes::list_workouts).post(routes::create_workout))
        .route(
            "/workouts/{id}",
            get(routes::get_workout)
                .put(routes::update_workout)
                .delete(routes::delete_workout),
        )
        .route(
            "/workouts/{id}/exercises",
            get(routes::list_workout_exercises).post(routes::add_workout_exercise),
        )
        .route(
            "/workout-exercises/{id}",
            put(routes::update_workout_exercise).delete(routes::remove_workout_exercise),
        )
        .merge(admin)
        .layer(middleware::from_fn(auth::load_identity))
        .layer(middleware::from_fn_with_state(state.clone(), transaction::transaction))
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.request_timeout,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Open the store, migrate it and serve until Ctrl-C
pub async fn start_server(config: BarbellConfig) -> anyhow::Result<()> {
    let source = DirectorySource::new(&config.store.migrations_dir);
    let store = SqliteStore::open(&config.store, &source)?;

    let state = AppState::new(store.clone(), &config);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    tracing::info!("Starting server on {}", addr);
    println!("🏋️  Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    store.close()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
