pub mod auth;
pub mod authorizer;
pub mod config;
pub mod db;
pub mod error;
pub mod item_store;
pub mod ledger;
pub mod model;
pub mod routes;
pub mod schema;
pub mod tokens;
pub mod types;
pub mod verifier;

use std::net::SocketAddr;
use std::sync::Arc;

use auth::GoogleAuth;
use authorizer::Authorizer;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use config::Config;
use db::DbPool;
use item_store::{ItemStore, StorageConfig};
use ledger::QuotaLedger;
use routes::items::item_router;
use tokens::TokenStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::{
    ApiResponse, EmptyData, EnumeratedItem, PurchaseClaim, ScanUseData, VerifyData, VersionData,
};
use utoipa::OpenApi;
use verifier::{GooglePlayVerifier, MockVerifier, PurchaseVerifier};

#[derive(Clone)]
pub struct AppState {
    pub authorizer: Authorizer,
    pub pool: DbPool,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config, verifier: Arc<dyn PurchaseVerifier>) -> Self {
        let authorizer = Authorizer::new(
            TokenStore::new(pool.clone(), config.token_policy),
            QuotaLedger::new(pool.clone(), config.ocr_scans_per_unit),
            verifier,
            config.expected_package_name.clone(),
            config.verify_timeout,
        );
        Self {
            authorizer,
            pool,
            config: Arc::new(config),
        }
    }

    pub fn item_store(&self, config: StorageConfig) -> ItemStore {
        ItemStore::new(self.pool.clone(), config)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::verify::verify_license,
        routes::record::record_purchase,
        routes::scans::consume_scan,
        health_check,
        version
    ),
    components(
        schemas(ApiResponse<EmptyData>, EmptyData, PurchaseClaim, VerifyData, ScanUseData, VersionData, EnumeratedItem)
    ),
    tags(
        (name = "Licensing", description = "License verification, purchase recording and scan metering"),
        (name = "Health", description = "Health check endpoints")
    ),
    info(
        title = "DivisiBill Licensing API",
        version = "1.0.0",
        description = "Authorizes DivisiBill clients from Google Play purchases and meters OCR scans"
    )
)]
struct ApiDoc;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = serde_json::Value)
    ),
    tag = "Health"
)]
async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({"status": "ok"})))
}

#[utoipa::path(
    get,
    path = "/version",
    responses(
        (status = 200, description = "Build and configuration summary", body = ApiResponse<VersionData>)
    ),
    tag = "Health"
)]
async fn version(
    axum::extract::State(app_state): axum::extract::State<AppState>,
) -> Json<ApiResponse<VersionData>> {
    Json(ApiResponse::ok(VersionData {
        application: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        debug: cfg!(debug_assertions),
        play_store_key: GoogleAuth::is_configured(),
        sentry_dsn: app_state.config.sentry_dsn.is_some(),
    }))
}

async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

pub fn app(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/version", get(version))
        .route("/verify", post(routes::verify::verify_license))
        .route("/recordpurchase", post(routes::record::record_purchase))
        .route("/scans/consume", post(routes::scans::consume_scan))
        .merge(item_router("/meal/{name}", "/meals", StorageConfig::MEAL))
        .merge(item_router(
            "/personlist/{name}",
            "/personlists",
            StorageConfig::PERSON_LIST,
        ))
        .merge(item_router(
            "/venuelist/{name}",
            "/venuelists",
            StorageConfig::VENUE_LIST,
        ))
        .route("/api-doc/openapi.json", get(openapi_spec))
        .with_state(app_state)
}

fn build_verifier(config: &Config) -> Result<Arc<dyn PurchaseVerifier>, String> {
    if cfg!(any(feature = "local", feature = "mock-google-api")) {
        warn!("using the mock purchase verifier, every purchase is treated as genuine");
        return Ok(Arc::new(MockVerifier::genuine()));
    }

    let auth = GoogleAuth::from_env()
        .map_err(|e| format!("Failed to initialize Google Auth: {e}"))?;
    info!("Google Auth initialized successfully");
    let verifier = GooglePlayVerifier::new(Arc::new(auth), config.verify_timeout)
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(verifier))
}

fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_deref()?;
    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            // Events from debug builds are dropped.
            before_send: Some(Arc::new(|event: sentry::protocol::Event<'static>| {
                if cfg!(debug_assertions) {
                    None
                } else {
                    Some(event)
                }
            })),
            ..Default::default()
        },
    ));
    info!("sentry initialized");
    Some(guard)
}

async fn serve(config: Config) -> Result<(), String> {
    let pool = db::create_pool(&config.database_url).map_err(|e| e.to_string())?;
    db::run_migrations(&pool).map_err(|e| e.to_string())?;

    let verifier = build_verifier(&config)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = app(AppState::new(pool, config, verifier));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {addr}: {e}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| format!("Server error: {e}"))
}

pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let _sentry = init_sentry(&config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start the runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(serve(config)) {
        error!("{e}");
        std::process::exit(1);
    }
}
