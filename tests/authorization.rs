mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::*;
use divisibill_licensing::config::Config;
use divisibill_licensing::types::SubscriptionState;
use divisibill_licensing::verifier::{MockOutcome, MockVerifier};
use tower::ServiceExt; // for `oneshot`

const PRO: &str = "pro.subscription";
const OCR: &str = "ocr.calls";

#[tokio::test]
async fn test_verify_pro_license_issues_token() {
    let guard = TestDbGuard::new();
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let token = issued_token(&res).expect("a token should be issued for a Pro license");
    assert_eq!(token.len(), 50);
    let body = body_json(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["scans_left"], 0);

    // The verified purchase is now in the ledger.
    let record = guard.state.authorizer.ledger().purchase("GPA.1").unwrap();
    assert!(record.is_some());
}

#[tokio::test]
async fn test_token_authorizes_without_reverifying() {
    let guard = TestDbGuard::new();
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));
    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    let token = issued_token(&res).unwrap();
    assert_eq!(guard.verifier.calls(), 1);

    let put = request(
        "PUT",
        "/personlist/20240101000000",
        Credential::Token(&token),
        Some("data=alice%2Cbob"),
    );
    let res = guard.app().oneshot(put).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    // A live token is not replaced.
    assert_eq!(issued_token(&res), None);

    let get = request(
        "GET",
        "/personlist/20240101000000",
        Credential::Token(&token),
        None,
    );
    let res = guard.app().oneshot(get).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res).await, "alice,bob");

    assert_eq!(guard.verifier.calls(), 1);
}

#[tokio::test]
async fn test_claim_header_authorizes_and_issues_token() {
    let guard = TestDbGuard::new();
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard
        .app()
        .oneshot(request("GET", "/venuelists?top=10", Credential::Claim(&pro), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let token = issued_token(&res).expect("claim authorization should hand out a token");
    assert_eq!(body_json(res).await, serde_json::json!([]));

    // The claim is confirmed upstream every time; the token is still live so none is sent.
    let res = guard
        .app()
        .oneshot(request("GET", "/venuelists?top=10", Credential::Claim(&pro), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(issued_token(&res), None);
    assert_eq!(guard.verifier.calls(), 2);

    let res = guard
        .app()
        .oneshot(request("GET", "/venuelists?top=10", Credential::Token(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(guard.verifier.calls(), 2);
}

#[tokio::test]
async fn test_missing_or_unknown_credentials_are_unauthorized() {
    let guard = TestDbGuard::new();

    let res = guard
        .app()
        .oneshot(request("GET", "/meals?top=5", Credential::None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = guard
        .app()
        .oneshot(request("GET", "/meals?top=5", Credential::Token("not-a-token"), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // An OCR license does not unlock storage.
    let ocr = claim("GPA.2", OCR, "tok-2", Some("acct-1"));
    let res = guard
        .app()
        .oneshot(request("GET", "/meals?top=5", Credential::Claim(&ocr), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(guard.verifier.calls(), 0);
}

#[tokio::test]
async fn test_rejected_purchase_is_not_recorded() {
    let guard = TestDbGuard::with_outcome(MockOutcome::Rejected);
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(issued_token(&res), None);

    let res = guard
        .app()
        .oneshot(request("GET", "/meals?top=5", Credential::Claim(&pro), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    assert!(guard.state.authorizer.ledger().purchase("GPA.1").unwrap().is_none());
}

#[tokio::test]
async fn test_inactive_subscription_is_denied() {
    let guard = TestDbGuard::with_outcome(MockOutcome::Subscription(SubscriptionState::OnHold));
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(issued_token(&res), None);
}

#[tokio::test]
async fn test_grace_period_subscription_is_honoured() {
    let guard =
        TestDbGuard::with_outcome(MockOutcome::Subscription(SubscriptionState::InGracePeriod));
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(issued_token(&res).is_some());
}

#[tokio::test]
async fn test_unreachable_verifier_fails_closed() {
    let guard = TestDbGuard::with_outcome(MockOutcome::Unavailable);
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let res = guard
        .app()
        .oneshot(request("GET", "/meals?top=5", Credential::Claim(&pro), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_slow_verifier_times_out() {
    let config = Config {
        verify_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let guard = TestDbGuard::with(MockOutcome::Slow(Duration::from_secs(2)), config);
    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(guard.state.authorizer.ledger().purchase("GPA.1").unwrap().is_none());
}

#[tokio::test]
async fn test_claim_for_another_package_is_invalid() {
    let guard = TestDbGuard::new();
    let mut pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));
    pro.package_name = Some("com.example.other".to_string());

    let res = guard.app().oneshot(json_post("/verify", &pro)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(guard.verifier.calls(), 0);
}

#[tokio::test]
async fn test_purchase_token_bound_to_order_conflicts() {
    let guard = TestDbGuard::new();
    let original = claim("GPA.1", PRO, "tok-1", Some("acct-1"));
    let res = guard.app().oneshot(json_post("/verify", &original)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let swapped = claim("GPA.1", PRO, "tok-other", Some("acct-1"));
    let res = guard.app().oneshot(json_post("/verify", &swapped)).await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_record_purchase_once() {
    let guard = TestDbGuard::new();
    let ocr = claim("GPA.1", OCR, "tok-1", Some("acct-1"));

    let res = guard
        .app()
        .oneshot(json_post("/recordpurchase", &ocr))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = guard
        .app()
        .oneshot(json_post("/recordpurchase", &ocr))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let record = guard.state.authorizer.ledger().purchase("GPA.1").unwrap().unwrap();
    assert_eq!(record.scans_left, 30);
}

#[tokio::test]
async fn test_record_purchase_requires_account() {
    let guard = TestDbGuard::new();
    let ocr = claim("GPA.1", OCR, "tok-1", None);

    let res = guard
        .app()
        .oneshot(json_post("/recordpurchase", &ocr))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(guard.verifier.calls(), 0);
}

#[tokio::test]
async fn test_consume_scans_until_exhausted() {
    let config = Config {
        ocr_scans_per_unit: 2,
        ..Config::default()
    };
    let guard = TestDbGuard::with(MockOutcome::Genuine, config);
    let ocr = claim("GPA.1", OCR, "tok-1", Some("acct-1"));
    let res = guard
        .app()
        .oneshot(json_post("/recordpurchase", &ocr))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    for expected in [1, 0] {
        let res = guard
            .app()
            .oneshot(request("POST", "/scans/consume", Credential::Claim(&ocr), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["data"]["scans_left"], expected);
    }

    let res = guard
        .app()
        .oneshot(request("POST", "/scans/consume", Credential::Claim(&ocr), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let record = guard.state.authorizer.ledger().purchase("GPA.1").unwrap().unwrap();
    assert_eq!(record.scans_left, 0);
}

#[tokio::test]
async fn test_consume_requires_ocr_license() {
    let guard = TestDbGuard::new();

    let res = guard
        .app()
        .oneshot(request("POST", "/scans/consume", Credential::None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let pro = claim("GPA.1", PRO, "tok-1", Some("acct-1"));
    let res = guard
        .app()
        .oneshot(request("POST", "/scans/consume", Credential::Claim(&pro), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_new_ocr_purchase_absorbs_unused_scans() {
    let guard = TestDbGuard::new();
    let first = claim("GPA.1", OCR, "tok-1", Some("acct-1"));
    guard
        .app()
        .oneshot(json_post("/recordpurchase", &first))
        .await
        .unwrap();
    let res = guard
        .app()
        .oneshot(request("POST", "/scans/consume", Credential::Claim(&first), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["data"]["scans_left"], 29);

    let second = claim("GPA.2", OCR, "tok-2", Some("acct-1"));
    let res = guard
        .app()
        .oneshot(json_post("/recordpurchase", &second))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let ledger = guard.state.authorizer.ledger();
    assert_eq!(ledger.purchase("GPA.1").unwrap().unwrap().scans_left, 0);
    assert_eq!(ledger.purchase("GPA.2").unwrap().unwrap().scans_left, 59);
}

#[tokio::test]
async fn test_health_and_version() {
    let guard = TestDbGuard::new();

    let res = guard
        .app()
        .oneshot(request("GET", "/health", Credential::None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = guard
        .app()
        .oneshot(request("GET", "/version", Credential::None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["data"]["application"], "divisibill-licensing");
    assert_eq!(body["data"]["sentry_dsn"], false);
}

#[tokio::test]
async fn test_record_purchase_for_another_account_is_refused() {
    let guard = TestDbGuard::with_verifier(
        MockVerifier::genuine().with_account_id("acct-attacker"),
        Config::default(),
    );
    let forged = claim("GPA.9", OCR, "tok-9", Some("acct-victim"));

    let res = guard
        .app()
        .oneshot(json_post("/recordpurchase", &forged))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(guard.state.authorizer.ledger().purchase("GPA.9").unwrap().is_none());
}

#[tokio::test]
async fn test_openapi_document_lists_license_routes() {
    let guard = TestDbGuard::new();

    let res = guard
        .app()
        .oneshot(request("GET", "/api-doc/openapi.json", Credential::None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    for path in ["/verify", "/recordpurchase", "/scans/consume"] {
        assert!(body["paths"].get(path).is_some(), "missing {path}");
    }
}
