//! Per-user meals, person lists and venue lists.
//!
//! Every kind shares the same handlers; [`item_router`] binds them to a
//! [`StorageConfig`] and a pair of paths.

use axum::extract::{Form, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;

use crate::error::AppError;
use crate::item_store::StorageConfig;
use crate::routes::headers::{authorize_request, token_headers};
use crate::types::{ApiResponse, EmptyData, EnumerateQuery, EnumeratedItem, PutItemForm};
use crate::AppState;

/// Routes for one kind of item: `item_path` takes a `{name}` segment,
/// `list_path` enumerates.
pub fn item_router(
    item_path: &str,
    list_path: &str,
    config: StorageConfig,
) -> Router<AppState> {
    Router::new()
        .route(
            item_path,
            get(
                move |State(state): State<AppState>, headers: HeaderMap, Path(name): Path<String>| {
                    get_item(state, config, headers, name)
                },
            )
            .put(
                move |State(state): State<AppState>,
                      headers: HeaderMap,
                      Path(name): Path<String>,
                      Form(form): Form<PutItemForm>| {
                    put_item(state, config, headers, name, form)
                },
            )
            .delete(
                move |State(state): State<AppState>, headers: HeaderMap, Path(name): Path<String>| {
                    delete_item(state, config, headers, name)
                },
            ),
        )
        .route(
            list_path,
            get(
                move |State(state): State<AppState>,
                      headers: HeaderMap,
                      Query(query): Query<EnumerateQuery>| {
                    enumerate_items(state, config, headers, query)
                },
            ),
        )
}

pub async fn get_item(
    state: AppState,
    config: StorageConfig,
    headers: HeaderMap,
    name: String,
) -> Result<impl IntoResponse, AppError> {
    let (user_key, token) = authorize_request(&state, &headers).await?;
    let data = state
        .item_store(config)
        .get(&user_key, &name)?
        .ok_or(AppError::NotFound)?;

    info!(table = config.table_name, name = %name, length = data.len(), "item retrieved");
    Ok((token_headers(token)?, data))
}

pub async fn put_item(
    state: AppState,
    config: StorageConfig,
    headers: HeaderMap,
    name: String,
    form: PutItemForm,
) -> Result<impl IntoResponse, AppError> {
    let (user_key, token) = authorize_request(&state, &headers).await?;
    state
        .item_store(config)
        .put(&user_key, &name, form.data, form.summary)?;

    Ok((
        token_headers(token)?,
        Json(ApiResponse::<EmptyData>::ok_with_msg("Item stored")),
    ))
}

pub async fn delete_item(
    state: AppState,
    config: StorageConfig,
    headers: HeaderMap,
    name: String,
) -> Result<impl IntoResponse, AppError> {
    let (user_key, token) = authorize_request(&state, &headers).await?;
    if !state.item_store(config).delete(&user_key, &name)? {
        return Err(AppError::NotFound);
    }

    info!(table = config.table_name, name = %name, "item deleted");
    Ok((
        token_headers(token)?,
        Json(ApiResponse::<EmptyData>::ok_with_msg("Item deleted")),
    ))
}

pub async fn enumerate_items(
    state: AppState,
    config: StorageConfig,
    headers: HeaderMap,
    query: EnumerateQuery,
) -> Result<impl IntoResponse, AppError> {
    let (user_key, token) = authorize_request(&state, &headers).await?;

    let top: i64 = query
        .top
        .as_deref()
        .map(str::trim)
        .filter(|top| !top.is_empty())
        .ok_or_else(|| AppError::Invalid("top is required".to_string()))?
        .parse()
        .map_err(|_| AppError::Invalid("top must be a number".to_string()))?;
    let before = query.before.as_deref().filter(|before| !before.is_empty());

    let items: Vec<EnumeratedItem> = state
        .item_store(config)
        .enumerate(&user_key, before, top)?;

    info!(table = config.table_name, count = items.len(), ?before, "items enumerated");
    Ok((token_headers(token)?, Json(items)))
}
