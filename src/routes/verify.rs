use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use crate::error::AppError;
use crate::routes::headers::token_headers;
use crate::types::{ApiResponse, EmptyData, PurchaseClaim, SubscriptionQuery, VerifyData};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/verify",
    request_body = PurchaseClaim,
    params(
        ("subscription" = Option<String>, Query, description = "1 when the purchase is a subscription")
    ),
    responses(
        (status = 200, description = "License is genuine; remaining scans in the body, a new token in the divisibill-token header when issued", body = ApiResponse<VerifyData>),
        (status = 400, description = "Malformed claim, or the billing provider rejected the purchase", body = ApiResponse<EmptyData>),
        (status = 409, description = "Purchase token belongs to a different order", body = ApiResponse<EmptyData>),
        (status = 502, description = "Billing provider unavailable", body = ApiResponse<EmptyData>)
    ),
    tag = "Licensing"
)]
pub async fn verify_license(
    State(app_state): State<AppState>,
    Query(query): Query<SubscriptionQuery>,
    Json(claim): Json<PurchaseClaim>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = app_state
        .authorizer
        .verify_license(&claim, query.is_subscription())
        .await?;

    info!(
        scans_left = outcome.scans_left,
        token_issued = outcome.token.is_some(),
        "license verified"
    );
    let headers = token_headers(outcome.token)?;
    Ok((
        headers,
        Json(ApiResponse::ok(VerifyData {
            scans_left: outcome.scans_left,
        })),
    ))
}
