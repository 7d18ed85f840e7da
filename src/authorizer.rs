//! Decides whether a request is authorized, and as whom.
//!
//! A bearer token is checked first because it only costs one local lookup.
//! Without a live token the request must carry a purchase claim, which has to
//! be known to the ledger and confirmed by the billing provider. Any failure to
//! reach the provider denies the request.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::{NewPurchase, QuotaLedger};
use crate::tokens::TokenStore;
use crate::types::{products, PurchaseClaim, ScanLookup};
use crate::verifier::{PurchaseVerifier, VerifiedPurchase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    Token,
    Claim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub user_key: String,
    pub source: AuthSource,
    /// The claimed order, when authorized by claim.
    pub order_id: Option<String>,
    pub scans_left: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Neither a live token nor a claim was presented.
    NoCredentials,
    InvalidClaim(String),
    /// The ledger does not know the order and it could not be recorded.
    UnknownPurchase,
    /// The billing provider does not recognise the purchase.
    Rejected(String),
    /// The subscription exists but is not active or in its grace period.
    NotActive,
    /// The billing provider could not be reached; the caller may retry later.
    UpstreamUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Authorized(Authorized),
    Denied(DenyReason),
}

impl Decision {
    pub fn user_key(&self) -> Option<&str> {
        match self {
            Decision::Authorized(auth) => Some(&auth.user_key),
            Decision::Denied(_) => None,
        }
    }
}

/// Result of an explicit license verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub scans_left: i32,
    /// A new bearer token for the client, if one was issued.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanUse {
    Consumed { remaining: i32 },
    Exhausted,
}

#[derive(Clone)]
pub struct Authorizer {
    tokens: TokenStore,
    ledger: QuotaLedger,
    verifier: Arc<dyn PurchaseVerifier>,
    expected_package_name: String,
    verify_timeout: Duration,
}

impl Authorizer {
    pub fn new(
        tokens: TokenStore,
        ledger: QuotaLedger,
        verifier: Arc<dyn PurchaseVerifier>,
        expected_package_name: String,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            ledger,
            verifier,
            expected_package_name,
            verify_timeout,
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn expected_package_name(&self) -> &str {
        &self.expected_package_name
    }

    /// Authorize with a bearer token if it is live, otherwise with the purchase claim.
    pub async fn authorize(
        &self,
        token: Option<&str>,
        claim: Option<&PurchaseClaim>,
    ) -> AppResult<Decision> {
        if let Some(token) = token {
            if let Some(user_key) = self.tokens.resolve(token)? {
                return Ok(Decision::Authorized(Authorized {
                    user_key,
                    source: AuthSource::Token,
                    order_id: None,
                    scans_left: None,
                }));
            }
        }

        let Some(claim) = claim else {
            info!("no live token and no purchase claim");
            return Ok(Decision::Denied(DenyReason::NoCredentials));
        };

        if let Err(reason) = self.check_claim(claim) {
            warn!(%reason, "purchase claim rejected");
            return Ok(Decision::Denied(DenyReason::InvalidClaim(reason)));
        }

        self.authorize_claim(claim).await
    }

    /// Issue or rotate the bearer token for an authorized user.
    pub fn issue_token(&self, user_key: &str) -> AppResult<Option<String>> {
        self.tokens.issue_or_rotate(user_key)
    }

    fn check_claim(&self, claim: &PurchaseClaim) -> Result<(), String> {
        if claim.order_id().is_none() {
            return Err("missing order id".to_string());
        }
        if claim.product_id().is_none() {
            return Err("missing product id".to_string());
        }
        if claim.purchase_token().is_none() {
            return Err("missing purchase token".to_string());
        }
        match claim.package_name() {
            None => Err("missing package name".to_string()),
            Some(package) if package != self.expected_package_name => {
                Err(format!("purchase is for another application: {package}"))
            }
            Some(_) => Ok(()),
        }
    }

    /// The ledger is consulted before the provider since it is cheaper.
    async fn authorize_claim(&self, claim: &PurchaseClaim) -> AppResult<Decision> {
        let (order_id, product_id, purchase_token) = claim_identity(claim);
        let is_subscription = products::is_subscription(product_id);

        let mut verified = None;
        let mut lookup = self.ledger.get_scans(order_id, purchase_token)?;

        if lookup == ScanLookup::NotFound {
            // Only purchases the provider vouches for are recorded.
            let purchase = match self.verify_upstream(claim, is_subscription).await {
                Ok(purchase) => purchase,
                Err(reason) => return Ok(Decision::Denied(reason)),
            };
            self.record_claim(claim, &purchase)?;
            verified = Some(purchase);
            lookup = self.ledger.get_scans(order_id, purchase_token)?;
        }

        let scans_left = match lookup {
            ScanLookup::Found(scans) => scans,
            ScanLookup::NotFound => {
                warn!(order_id, "order unknown and could not be recorded");
                return Ok(Decision::Denied(DenyReason::UnknownPurchase));
            }
            ScanLookup::TokenConflict => {
                error!(order_id, "purchase token does not belong to this order");
                return Err(AppError::PurchaseTokenConflict);
            }
        };

        let purchase = match verified {
            Some(purchase) => purchase,
            None => match self.verify_upstream(claim, is_subscription).await {
                Ok(purchase) => purchase,
                Err(reason) => return Ok(Decision::Denied(reason)),
            },
        };

        let user_key = buyer_account(claim, &purchase)
            .unwrap_or(order_id)
            .to_string();
        info!(order_id, user_key = %user_key, "authorized by purchase claim");
        Ok(Decision::Authorized(Authorized {
            user_key,
            source: AuthSource::Claim,
            order_id: Some(order_id.to_string()),
            scans_left: Some(scans_left),
        }))
    }

    fn record_claim(&self, claim: &PurchaseClaim, purchase: &VerifiedPurchase) -> AppResult<bool> {
        let (order_id, product_id, purchase_token) = claim_identity(claim);
        self.ledger.record_purchase(NewPurchase {
            order_id,
            product_id,
            purchase_token,
            account_id: buyer_account(claim, purchase).unwrap_or_default(),
            quantity: claim.quantity,
        })
    }

    /// Ask the provider about the claim and check its answer agrees with it.
    async fn verify_upstream(
        &self,
        claim: &PurchaseClaim,
        is_subscription: bool,
    ) -> Result<VerifiedPurchase, DenyReason> {
        let (order_id, product_id, purchase_token) = claim_identity(claim);
        let package_name = claim.package_name().unwrap_or_default();

        let call = self
            .verifier
            .verify(package_name, product_id, purchase_token, is_subscription);
        let purchase = match tokio::time::timeout(self.verify_timeout, call).await {
            Err(_) => {
                warn!(order_id, "purchase verification timed out");
                return Err(DenyReason::UpstreamUnavailable(
                    "verification timed out".to_string(),
                ));
            }
            Ok(Err(AppError::VerificationFailed(msg))) => {
                warn!(order_id, %msg, "billing provider rejected the purchase");
                return Err(DenyReason::Rejected(msg));
            }
            Ok(Err(e)) => {
                warn!(order_id, error = %e, "could not reach the billing provider");
                return Err(DenyReason::UpstreamUnavailable(e.to_string()));
            }
            Ok(Ok(purchase)) => purchase,
        };

        // Subscription renewals get new order ids; one-off purchases keep theirs.
        if !is_subscription {
            if let Some(reported) = reported(&purchase.order_id) {
                if reported != order_id {
                    warn!(order_id, reported, "claimed order id differs from the provider's");
                    return Err(DenyReason::Rejected(
                        "order id does not match the purchase".to_string(),
                    ));
                }
            }
        }
        if let (Some(reported), Some(claimed)) = (reported(&purchase.account_id), claim.account_id())
        {
            if reported != claimed {
                warn!(order_id, "claimed account differs from the provider's");
                return Err(DenyReason::Rejected(
                    "account does not match the purchase".to_string(),
                ));
            }
        }
        if let Some(state) = purchase.lifecycle_state {
            if !state.grants_access() {
                info!(order_id, ?state, "subscription is not active");
                return Err(DenyReason::NotActive);
            }
        }
        Ok(purchase)
    }

    /// Verify a license the client holds and report its remaining scans.
    ///
    /// Unknown but genuine purchases are recorded. Pro licenses also get a
    /// bearer token when the client needs a new one.
    pub async fn verify_license(
        &self,
        claim: &PurchaseClaim,
        is_subscription: bool,
    ) -> AppResult<VerifyOutcome> {
        self.check_claim(claim).map_err(AppError::Invalid)?;
        let (order_id, product_id, purchase_token) = claim_identity(claim);
        let is_subscription = is_subscription || products::is_subscription(product_id);

        let purchase = self
            .verify_upstream(claim, is_subscription)
            .await
            .map_err(deny_to_error)?;

        let mut lookup = self.ledger.get_scans(order_id, purchase_token)?;
        if lookup == ScanLookup::NotFound {
            info!(order_id, "verified purchase not yet recorded, recording it");
            if self.record_claim(claim, &purchase)? {
                lookup = self.ledger.get_scans(order_id, purchase_token)?;
            }
        }

        let scans_left = match lookup {
            ScanLookup::Found(scans) => scans,
            ScanLookup::NotFound => return Err(AppError::NotFound),
            ScanLookup::TokenConflict => {
                error!(order_id, "purchase token does not belong to this order");
                return Err(AppError::PurchaseTokenConflict);
            }
        };

        self.ledger.update_time_used(order_id)?;

        let token = if products::is_pro(product_id) {
            let user_key = buyer_account(claim, &purchase).unwrap_or(order_id);
            self.tokens.issue_or_rotate(user_key)?
        } else {
            None
        };

        Ok(VerifyOutcome { scans_left, token })
    }

    /// Record a purchase the client has just made.
    ///
    /// Returns `Ok(false)` when the provider rejects it or the ledger already has it.
    pub async fn record_purchase(
        &self,
        claim: &PurchaseClaim,
        is_subscription: bool,
    ) -> AppResult<bool> {
        self.check_claim(claim).map_err(AppError::Invalid)?;
        if claim.account_id().is_none() {
            return Err(AppError::Invalid("missing obfuscated account id".to_string()));
        }
        let (_, product_id, _) = claim_identity(claim);
        let is_subscription = is_subscription || products::is_subscription(product_id);

        match self.verify_upstream(claim, is_subscription).await {
            Ok(purchase) => self.record_claim(claim, &purchase),
            Err(DenyReason::UpstreamUnavailable(msg)) => Err(AppError::UpstreamUnavailable(msg)),
            Err(reason) => {
                info!(?reason, "purchase not recorded");
                Ok(false)
            }
        }
    }

    /// Authorize an OCR license and consume one of its scans.
    pub async fn consume_scan(&self, claim: &PurchaseClaim) -> AppResult<ScanUse> {
        if !claim.is_license_for(products::OCR_LICENSE_PRODUCT_ID, &self.expected_package_name) {
            return Err(AppError::Invalid("not an OCR license".to_string()));
        }

        let authorized = match self.authorize(None, Some(claim)).await? {
            Decision::Authorized(authorized) => authorized,
            Decision::Denied(reason) => return Err(deny_to_error(reason)),
        };

        let order_id = authorized.order_id.as_deref().unwrap_or_default();
        match self.ledger.take_scan(order_id)? {
            Some(remaining) => Ok(ScanUse::Consumed { remaining }),
            None => Ok(ScanUse::Exhausted),
        }
    }
}

/// Order id, product id and purchase token of a claim that passed `check_claim`.
fn claim_identity(claim: &PurchaseClaim) -> (&str, &str, &str) {
    (
        claim.order_id().unwrap_or_default(),
        claim.product_id().unwrap_or_default(),
        claim.purchase_token().unwrap_or_default(),
    )
}

fn reported(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// The buyer's account: the provider's when it names one, else the claim's.
fn buyer_account<'a>(claim: &'a PurchaseClaim, purchase: &'a VerifiedPurchase) -> Option<&'a str> {
    reported(&purchase.account_id).or_else(|| claim.account_id())
}

pub fn deny_to_error(reason: DenyReason) -> AppError {
    match reason {
        DenyReason::NoCredentials | DenyReason::UnknownPurchase => AppError::Unauthorized,
        DenyReason::InvalidClaim(msg) => AppError::Invalid(msg),
        DenyReason::Rejected(msg) => AppError::VerificationFailed(msg),
        DenyReason::NotActive => {
            AppError::VerificationFailed("subscription is not active".to_string())
        }
        DenyReason::UpstreamUnavailable(msg) => AppError::UpstreamUnavailable(msg),
    }
}
