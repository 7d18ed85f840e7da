//! Adapter over the upstream billing verifier.
//!
//! The authorizer only sees [`PurchaseVerifier`]; [`GooglePlayVerifier`] talks to
//! the Play Developer API and [`MockVerifier`] stands in for it locally and in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::auth::GoogleAuth;
use crate::error::{AppError, AppResult};
use crate::types::google_play_acknowledgement_state::ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED;
use crate::types::{
    GooglePlayProductResponse, GooglePlaySubscriptionResponse, SubscriptionState,
};

const PLAY_API_BASE: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// The billing provider's view of a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPurchase {
    pub order_id: Option<String>,
    pub acknowledged: bool,
    pub account_id: Option<String>,
    /// Only present for subscriptions.
    pub lifecycle_state: Option<SubscriptionState>,
}

#[async_trait]
pub trait PurchaseVerifier: Send + Sync {
    /// Ask the billing provider about a purchase.
    ///
    /// `Err(VerificationFailed)` means the provider does not recognise it;
    /// `Err(UpstreamUnavailable)` means we could not get an answer.
    async fn verify(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
        is_subscription: bool,
    ) -> AppResult<VerifiedPurchase>;
}

pub struct GooglePlayVerifier {
    auth: Arc<GoogleAuth>,
    client: reqwest::Client,
}

impl GooglePlayVerifier {
    pub fn new(auth: Arc<GoogleAuth>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("http client: {e}")))?;
        Ok(Self { auth, client })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let access_token = self
            .auth
            .get_token_for_default_scopes()
            .await
            .map_err(|e| AppError::AccessTokenFailed(e.to_string()))?;

        let res = self
            .client
            .get(url)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(AppError::from)?;

        match res.status() {
            status if status.is_success() => res
                .json::<T>()
                .await
                .map_err(|e| AppError::GooglePlayResponseParse(e.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(AppError::VerificationFailed(format!(
                    "Google Play returned {}",
                    res.status()
                )))
            }
            status => Err(AppError::UpstreamUnavailable(format!(
                "Google Play returned {status}"
            ))),
        }
    }

    async fn verify_product(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> AppResult<VerifiedPurchase> {
        let url = format!(
            "{PLAY_API_BASE}/applications/{}/purchases/products/{}/tokens/{}",
            utf8_percent_encode(package_name, PATH_SEGMENT),
            utf8_percent_encode(product_id, PATH_SEGMENT),
            utf8_percent_encode(purchase_token, PATH_SEGMENT),
        );
        let purchase: GooglePlayProductResponse = self.get(&url).await?;

        // purchaseState 1 is a canceled (refunded) purchase.
        if purchase.purchase_state == Some(1) {
            return Err(AppError::VerificationFailed(
                "purchase was canceled".to_string(),
            ));
        }

        Ok(VerifiedPurchase {
            order_id: purchase.order_id,
            acknowledged: purchase.acknowledgement_state == Some(1),
            account_id: purchase.obfuscated_external_account_id,
            lifecycle_state: None,
        })
    }

    async fn verify_subscription(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> AppResult<VerifiedPurchase> {
        let url = format!(
            "{PLAY_API_BASE}/applications/{}/purchases/subscriptionsv2/tokens/{}",
            utf8_percent_encode(package_name, PATH_SEGMENT),
            utf8_percent_encode(purchase_token, PATH_SEGMENT),
        );
        let subscription: GooglePlaySubscriptionResponse = self.get(&url).await?;

        if !subscription
            .line_items
            .iter()
            .any(|item| item.product_id == product_id)
        {
            return Err(AppError::VerificationFailed(format!(
                "subscription has no line item for {product_id}"
            )));
        }

        Ok(VerifiedPurchase {
            order_id: subscription.latest_order_id,
            acknowledged: subscription.acknowledgement_state.as_deref()
                == Some(ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED),
            account_id: subscription
                .external_account_identifiers
                .and_then(|ids| ids.obfuscated_external_account_id),
            lifecycle_state: Some(SubscriptionState::from_google(
                &subscription.subscription_state,
            )),
        })
    }
}

#[async_trait]
impl PurchaseVerifier for GooglePlayVerifier {
    async fn verify(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
        is_subscription: bool,
    ) -> AppResult<VerifiedPurchase> {
        let verified = if is_subscription {
            self.verify_subscription(package_name, product_id, purchase_token)
                .await
        } else {
            self.verify_product(package_name, product_id, purchase_token)
                .await
        };

        match &verified {
            Ok(purchase) => info!(
                product_id,
                acknowledged = purchase.acknowledged,
                "verified purchase with Google Play"
            ),
            Err(e) => warn!(product_id, error = %e, "could not verify purchase with Google Play"),
        }
        verified
    }
}

/// What [`MockVerifier`] answers with.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Every purchase is genuine and subscriptions are active.
    Genuine,
    /// Subscriptions report this lifecycle state; products are genuine.
    Subscription(SubscriptionState),
    /// The provider does not recognise the purchase.
    Rejected,
    /// The provider cannot be reached.
    Unavailable,
    /// Answers `Genuine` after sleeping this long.
    Slow(Duration),
}

/// In-process verifier that counts how often it is asked.
///
/// Unless told otherwise it reports neither an order id nor an account id,
/// so the claim's own values stand.
pub struct MockVerifier {
    outcome: MockOutcome,
    order_id: Option<String>,
    account_id: Option<String>,
    calls: AtomicUsize,
}

impl MockVerifier {
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            order_id: None,
            account_id: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn genuine() -> Self {
        Self::new(MockOutcome::Genuine)
    }

    /// Report this order id for every genuine purchase.
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Report this buyer account for every genuine purchase.
    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn genuine_purchase(&self, state: Option<SubscriptionState>) -> VerifiedPurchase {
        VerifiedPurchase {
            order_id: self.order_id.clone(),
            acknowledged: true,
            account_id: self.account_id.clone(),
            lifecycle_state: state,
        }
    }
}

#[async_trait]
impl PurchaseVerifier for MockVerifier {
    async fn verify(
        &self,
        _package_name: &str,
        _product_id: &str,
        _purchase_token: &str,
        is_subscription: bool,
    ) -> AppResult<VerifiedPurchase> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let active = is_subscription.then_some(SubscriptionState::Active);
        match &self.outcome {
            MockOutcome::Genuine => Ok(self.genuine_purchase(active)),
            MockOutcome::Subscription(state) => {
                Ok(self.genuine_purchase(is_subscription.then_some(*state)))
            }
            MockOutcome::Rejected => Err(AppError::VerificationFailed(
                "mock verifier rejected the purchase".to_string(),
            )),
            MockOutcome::Unavailable => Err(AppError::UpstreamUnavailable(
                "mock verifier is unavailable".to_string(),
            )),
            MockOutcome::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(self.genuine_purchase(active))
            }
        }
    }
}
