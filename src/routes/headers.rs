use axum::http::{HeaderMap, HeaderValue};
use percent_encoding::percent_decode_str;
use tracing::warn;

use crate::authorizer::{deny_to_error, AuthSource, Decision};
use crate::error::{AppError, AppResult};
use crate::types::PurchaseClaim;
use crate::AppState;

/// Request and response header carrying the bearer token.
pub const TOKEN_HEADER: &str = "divisibill-token";
/// Request header carrying a URL-encoded JSON purchase claim.
pub const PURCHASE_HEADER: &str = "divisibill-android-purchase";

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// The purchase claim in the request headers, if one is present and parses.
pub fn purchase_claim(headers: &HeaderMap) -> Option<PurchaseClaim> {
    let raw = headers.get(PURCHASE_HEADER)?.to_str().ok()?;
    let json = match percent_decode_str(raw).decode_utf8() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "purchase header is not valid UTF-8");
            return None;
        }
    };
    match PurchaseClaim::from_json(&json) {
        Ok(claim) => Some(claim),
        Err(e) => {
            warn!(error = %e, "could not deserialize purchase header");
            None
        }
    }
}

/// Response headers handing a newly issued token back to the client.
pub fn token_headers(token: Option<String>) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let value = HeaderValue::from_str(&token)
            .map_err(|e| AppError::InternalError(format!("token header: {e}")))?;
        headers.insert(TOKEN_HEADER, value);
    }
    Ok(headers)
}

/// Authorize a request by token or Pro license header.
///
/// Returns the user key and, when authorized by the license, any token the
/// client should use from now on.
pub async fn authorize_request(
    state: &AppState,
    headers: &HeaderMap,
) -> AppResult<(String, Option<String>)> {
    let authorizer = &state.authorizer;
    let claim = purchase_claim(headers)
        .filter(|claim| claim.is_pro_license(authorizer.expected_package_name()));

    match authorizer.authorize(bearer_token(headers), claim.as_ref()).await? {
        Decision::Authorized(auth) if auth.source == AuthSource::Claim => {
            let token = authorizer.issue_token(&auth.user_key)?;
            Ok((auth.user_key, token))
        }
        Decision::Authorized(auth) => Ok((auth.user_key, None)),
        Decision::Denied(reason) => Err(deny_to_error(reason)),
    }
}
