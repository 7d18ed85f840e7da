use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppError;
use crate::types::{ApiResponse, EmptyData, PurchaseClaim, SubscriptionQuery};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/recordpurchase",
    request_body = PurchaseClaim,
    params(
        ("subscription" = Option<String>, Query, description = "1 when the purchase is a subscription")
    ),
    responses(
        (status = 200, description = "Purchase recorded", body = ApiResponse<EmptyData>),
        (status = 400, description = "Claim incomplete, rejected upstream, or already recorded", body = ApiResponse<EmptyData>),
        (status = 502, description = "Billing provider unavailable", body = ApiResponse<EmptyData>)
    ),
    tag = "Licensing"
)]
pub async fn record_purchase(
    State(app_state): State<AppState>,
    Query(query): Query<SubscriptionQuery>,
    Json(claim): Json<PurchaseClaim>,
) -> Result<impl IntoResponse, AppError> {
    let recorded = app_state
        .authorizer
        .record_purchase(&claim, query.is_subscription())
        .await?;

    if recorded {
        Ok(Json(ApiResponse::<EmptyData>::ok_with_msg("Purchase recorded")))
    } else {
        Err(AppError::Invalid("purchase was not recorded".to_string()))
    }
}
