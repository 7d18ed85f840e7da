use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response envelope shared by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            msg: None,
            data: Some(data),
        }
    }

    pub fn ok_with_msg(msg: impl Into<String>) -> Self {
        Self {
            success: true,
            msg: Some(msg.into()),
            data: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: Some(msg.into()),
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EmptyData {}

/// Product ids known to the licensing layer.
pub mod products {
    pub const PRO_SUBSCRIPTION_ID: &str = "pro.subscription";
    /// Pre-subscription one-off Pro upgrade, still honoured.
    pub const PRO_SUBSCRIPTION_ID_OLD: &str = "pro.upgrade";
    pub const OCR_LICENSE_PRODUCT_ID: &str = "ocr.calls";
    pub const DEFAULT_OCR_SCANS_PER_UNIT: i32 = 30;
    pub const DEFAULT_EXPECTED_PACKAGE_NAME: &str = "com.autoplus.divisibill";

    pub fn is_pro(product_id: &str) -> bool {
        product_id == PRO_SUBSCRIPTION_ID || product_id == PRO_SUBSCRIPTION_ID_OLD
    }

    pub fn is_consumable(product_id: &str) -> bool {
        product_id == OCR_LICENSE_PRODUCT_ID
    }

    pub fn is_subscription(product_id: &str) -> bool {
        product_id.ends_with(".subscription")
    }
}

/// Google Play `subscriptionState` values (subscriptionsv2).
pub mod google_play_subscription_state {
    pub const SUBSCRIPTION_STATE_UNSPECIFIED: &str = "SUBSCRIPTION_STATE_UNSPECIFIED";
    pub const SUBSCRIPTION_STATE_PENDING: &str = "SUBSCRIPTION_STATE_PENDING";
    pub const SUBSCRIPTION_STATE_ACTIVE: &str = "SUBSCRIPTION_STATE_ACTIVE";
    pub const SUBSCRIPTION_STATE_PAUSED: &str = "SUBSCRIPTION_STATE_PAUSED";
    pub const SUBSCRIPTION_STATE_IN_GRACE_PERIOD: &str = "SUBSCRIPTION_STATE_IN_GRACE_PERIOD";
    pub const SUBSCRIPTION_STATE_ON_HOLD: &str = "SUBSCRIPTION_STATE_ON_HOLD";
    pub const SUBSCRIPTION_STATE_CANCELED: &str = "SUBSCRIPTION_STATE_CANCELED";
    pub const SUBSCRIPTION_STATE_EXPIRED: &str = "SUBSCRIPTION_STATE_EXPIRED";
}

pub mod google_play_acknowledgement_state {
    pub const ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED: &str = "ACKNOWLEDGEMENT_STATE_ACKNOWLEDGED";
}

/// Lifecycle of a subscription as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Pending,
    Active,
    Paused,
    InGracePeriod,
    OnHold,
    Canceled,
    Expired,
    Unspecified,
}

impl SubscriptionState {
    pub fn from_google(state: &str) -> Self {
        use google_play_subscription_state::*;
        match state {
            SUBSCRIPTION_STATE_PENDING => Self::Pending,
            SUBSCRIPTION_STATE_ACTIVE => Self::Active,
            SUBSCRIPTION_STATE_PAUSED => Self::Paused,
            SUBSCRIPTION_STATE_IN_GRACE_PERIOD => Self::InGracePeriod,
            SUBSCRIPTION_STATE_ON_HOLD => Self::OnHold,
            SUBSCRIPTION_STATE_CANCELED => Self::Canceled,
            SUBSCRIPTION_STATE_EXPIRED => Self::Expired,
            _ => Self::Unspecified,
        }
    }

    /// Only active and grace-period subscriptions grant access.
    pub fn grants_access(self) -> bool {
        matches!(self, Self::Active | Self::InGracePeriod)
    }
}

/// A purchase as reported by the Android billing library on the device.
///
/// Accepts both the camelCase JSON produced by Android and the PascalCase
/// produced by older clients. Other fields the device reports, such as the
/// purchase time or acknowledgement, are ignored in favour of the provider's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseClaim {
    #[serde(default, alias = "PackageName")]
    pub package_name: Option<String>,
    #[serde(default, alias = "OrderId")]
    pub order_id: Option<String>,
    #[serde(default, alias = "ProductId")]
    pub product_id: Option<String>,
    #[serde(alias = "PurchaseToken")]
    pub purchase_token: String,
    #[serde(default, alias = "ObfuscatedAccountId")]
    pub obfuscated_account_id: Option<String>,
    #[serde(default, alias = "Quantity")]
    pub quantity: i32,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl PurchaseClaim {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn order_id(&self) -> Option<&str> {
        present(&self.order_id)
    }

    pub fn product_id(&self) -> Option<&str> {
        present(&self.product_id)
    }

    pub fn package_name(&self) -> Option<&str> {
        present(&self.package_name)
    }

    pub fn account_id(&self) -> Option<&str> {
        present(&self.obfuscated_account_id)
    }

    pub fn purchase_token(&self) -> Option<&str> {
        Some(self.purchase_token.as_str()).filter(|t| !t.trim().is_empty())
    }

    /// The key this purchaser is known by once authorized.
    pub fn user_key(&self) -> Option<&str> {
        self.account_id().or_else(|| self.order_id())
    }

    /// True if the claim is complete, belongs to `expected_package`, and is for `product_id`.
    pub fn is_license_for(&self, product_id: &str, expected_package: &str) -> bool {
        self.order_id().is_some()
            && self.purchase_token().is_some()
            && self.package_name() == Some(expected_package)
            && self.product_id() == Some(product_id)
    }

    pub fn is_pro_license(&self, expected_package: &str) -> bool {
        self.is_license_for(products::PRO_SUBSCRIPTION_ID, expected_package)
            || self.is_license_for(products::PRO_SUBSCRIPTION_ID_OLD, expected_package)
    }
}

/// Result of looking an order up in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLookup {
    Found(i32),
    NotFound,
    /// The order exists but is bound to a different purchase token.
    TokenConflict,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionQuery {
    pub subscription: Option<String>,
}

impl SubscriptionQuery {
    pub fn is_subscription(&self) -> bool {
        self.subscription.as_deref() == Some("1")
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyData {
    pub scans_left: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScanUseData {
    pub scans_left: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VersionData {
    pub application: String,
    pub version: String,
    pub debug: bool,
    pub play_store_key: bool,
    pub sentry_dsn: bool,
}

#[derive(Debug, Deserialize)]
pub struct PutItemForm {
    pub data: String,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnumerateQuery {
    pub before: Option<String>,
    pub top: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct EnumeratedItem {
    pub name: String,
    pub data_length: i64,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub has_remote_image: bool,
}

// Google Play Developer API payloads

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePlayProductResponse {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    /// 0 purchased, 1 canceled, 2 pending.
    #[serde(default)]
    pub purchase_state: Option<i32>,
    /// 0 yet to be acknowledged, 1 acknowledged.
    #[serde(default)]
    pub acknowledgement_state: Option<i32>,
    #[serde(default)]
    pub obfuscated_external_account_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionLineItem {
    pub product_id: String,
    #[serde(default)]
    pub expiry_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccountIdentifiers {
    #[serde(default)]
    pub external_account_id: Option<String>,
    #[serde(default)]
    pub obfuscated_external_account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePlaySubscriptionResponse {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    pub subscription_state: String,
    #[serde(default)]
    pub latest_order_id: Option<String>,
    #[serde(default)]
    pub acknowledgement_state: Option<String>,
    #[serde(default)]
    pub line_items: Vec<SubscriptionLineItem>,
    #[serde(default)]
    pub external_account_identifiers: Option<ExternalAccountIdentifiers>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str = "com.autoplus.divisibill";

    #[test]
    fn claim_accepts_camel_and_pascal_casing() {
        let android = r#"{"packageName":"com.autoplus.divisibill","orderId":"GPA.1","productId":"pro.subscription","purchaseTime":1700000000000,"purchaseState":0,"purchaseToken":"tok","quantity":1,"acknowledged":true}"#;
        let pascal = r#"{"PackageName":"com.autoplus.divisibill","OrderId":"GPA.1","ProductId":"pro.subscription","PurchaseToken":"tok","Quantity":1}"#;

        let a = PurchaseClaim::from_json(android).unwrap();
        let b = PurchaseClaim::from_json(pascal).unwrap();
        assert_eq!(a, b);
        assert!(a.is_pro_license(PACKAGE));
    }

    #[test]
    fn claim_for_other_package_is_not_a_license() {
        let claim = PurchaseClaim {
            package_name: Some("com.example.other".into()),
            order_id: Some("GPA.1".into()),
            product_id: Some(products::PRO_SUBSCRIPTION_ID.into()),
            purchase_token: "tok".into(),
            ..Default::default()
        };
        assert!(!claim.is_pro_license(PACKAGE));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let claim = PurchaseClaim {
            package_name: Some(PACKAGE.into()),
            order_id: Some("  ".into()),
            product_id: Some(products::OCR_LICENSE_PRODUCT_ID.into()),
            purchase_token: "tok".into(),
            ..Default::default()
        };
        assert_eq!(claim.order_id(), None);
        assert!(!claim.is_license_for(products::OCR_LICENSE_PRODUCT_ID, PACKAGE));
    }

    #[test]
    fn user_key_prefers_account_id() {
        let mut claim = PurchaseClaim {
            order_id: Some("GPA.1".into()),
            ..Default::default()
        };
        assert_eq!(claim.user_key(), Some("GPA.1"));
        claim.obfuscated_account_id = Some("acct".into());
        assert_eq!(claim.user_key(), Some("acct"));
    }

    #[test]
    fn only_active_and_grace_period_grant_access() {
        assert!(SubscriptionState::from_google("SUBSCRIPTION_STATE_ACTIVE").grants_access());
        assert!(SubscriptionState::from_google("SUBSCRIPTION_STATE_IN_GRACE_PERIOD").grants_access());
        assert!(!SubscriptionState::from_google("SUBSCRIPTION_STATE_ON_HOLD").grants_access());
        assert!(!SubscriptionState::from_google("bogus").grants_access());
    }
}
