#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use divisibill_licensing::config::Config;
use divisibill_licensing::db::{create_pool, run_migrations};
use divisibill_licensing::routes::headers::{PURCHASE_HEADER, TOKEN_HEADER};
use divisibill_licensing::types::PurchaseClaim;
use divisibill_licensing::verifier::{MockOutcome, MockVerifier};
use divisibill_licensing::{app, AppState};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

pub const PACKAGE: &str = "com.autoplus.divisibill";

// Owns a fresh database file per test and removes it afterwards.
pub struct TestDbGuard {
    db_path: String,
    pub state: AppState,
    pub verifier: Arc<MockVerifier>,
}

impl TestDbGuard {
    pub fn new() -> Self {
        Self::with(MockOutcome::Genuine, Config::default())
    }

    pub fn with_outcome(outcome: MockOutcome) -> Self {
        Self::with(outcome, Config::default())
    }

    pub fn with(outcome: MockOutcome, config: Config) -> Self {
        Self::with_verifier(MockVerifier::new(outcome), config)
    }

    pub fn with_verifier(verifier: MockVerifier, config: Config) -> Self {
        let db_path = std::env::temp_dir()
            .join(format!("test_{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        let pool = create_pool(&db_path).unwrap();
        run_migrations(&pool).unwrap();

        let verifier = Arc::new(verifier);
        let config = Config {
            database_url: db_path.clone(),
            ..config
        };
        let state = AppState::new(pool, config, verifier.clone());

        Self {
            db_path,
            state,
            verifier,
        }
    }

    pub fn app(&self) -> Router {
        app(self.state.clone())
    }
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.db_path, suffix));
        }
    }
}

pub fn claim(order_id: &str, product_id: &str, token: &str, account: Option<&str>) -> PurchaseClaim {
    PurchaseClaim {
        package_name: Some(PACKAGE.to_string()),
        order_id: Some(order_id.to_string()),
        product_id: Some(product_id.to_string()),
        purchase_token: token.to_string(),
        obfuscated_account_id: account.map(str::to_string),
        quantity: 1,
    }
}

pub fn claim_header(claim: &PurchaseClaim) -> String {
    let json = serde_json::to_string(claim).unwrap();
    utf8_percent_encode(&json, NON_ALPHANUMERIC).to_string()
}

pub fn json_post(uri: &str, claim: &PurchaseClaim) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(claim).unwrap()))
        .unwrap()
}

pub enum Credential<'a> {
    Token(&'a str),
    Claim(&'a PurchaseClaim),
    None,
}

pub fn request(method: &str, uri: &str, credential: Credential<'_>, form: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = match credential {
        Credential::Token(token) => builder.header(TOKEN_HEADER, token),
        Credential::Claim(claim) => builder.header(PURCHASE_HEADER, claim_header(claim)),
        Credential::None => builder,
    };
    match form {
        Some(form) => builder
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn issued_token(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get(TOKEN_HEADER)
        .map(|value| value.to_str().unwrap().to_string())
}

pub async fn body_string(res: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(res: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(res).await).unwrap()
}
