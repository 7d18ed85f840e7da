use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::info;

use crate::authorizer::ScanUse;
use crate::error::AppError;
use crate::routes::headers::purchase_claim;
use crate::types::{ApiResponse, EmptyData, ScanUseData};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/scans/consume",
    params(
        ("divisibill-android-purchase" = String, Header, description = "URL-encoded JSON claim for an OCR license")
    ),
    responses(
        (status = 200, description = "One scan consumed; remaining scans in the body", body = ApiResponse<ScanUseData>),
        (status = 204, description = "License has no scans left"),
        (status = 400, description = "Missing or invalid OCR license", body = ApiResponse<EmptyData>),
        (status = 401, description = "License not known", body = ApiResponse<EmptyData>),
        (status = 409, description = "Concurrent updates could not be applied", body = ApiResponse<EmptyData>)
    ),
    tag = "Licensing"
)]
pub async fn consume_scan(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let claim = purchase_claim(&headers)
        .ok_or_else(|| AppError::Invalid("missing OCR license".to_string()))?;

    match app_state.authorizer.consume_scan(&claim).await? {
        ScanUse::Consumed { remaining } => {
            info!(remaining, "scan consumed");
            Ok(Json(ApiResponse::ok(ScanUseData {
                scans_left: remaining,
            }))
            .into_response())
        }
        ScanUse::Exhausted => {
            info!("scan quota exhausted");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}
