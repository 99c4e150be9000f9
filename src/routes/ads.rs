use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::ads::{AdList, CreateAdRequest, UpdateAdRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Advertisement,
    response::ApiResponse,
    routes::params::Pagination,
    services::ad_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_ads))
        .route("/", post(create_ad))
        .route("/{id}", put(update_ad))
        .route("/{id}", delete(delete_ad))
}

#[utoipa::path(
    get,
    path = "/api/ads",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
    ),
    responses(
        (status = 200, description = "List advertisements", body = ApiResponse<AdList>)
    ),
    tag = "Ads"
)]
pub async fn list_ads(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<AdList>>> {
    let resp = ad_service::list_ads(&state, pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/ads",
    request_body = CreateAdRequest,
    responses(
        (status = 201, description = "Create advertisement", body = ApiResponse<Advertisement>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Ads"
)]
pub async fn create_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateAdRequest>,
) -> AppResult<Json<ApiResponse<Advertisement>>> {
    let resp = ad_service::create_ad(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/ads/{id}",
    params(
        ("id" = Uuid, Path, description = "Advertisement ID")
    ),
    request_body = UpdateAdRequest,
    responses(
        (status = 200, description = "Updated advertisement", body = ApiResponse<Advertisement>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Ads"
)]
pub async fn update_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAdRequest>,
) -> AppResult<Json<ApiResponse<Advertisement>>> {
    let resp = ad_service::update_ad(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/ads/{id}",
    params(
        ("id" = Uuid, Path, description = "Advertisement ID")
    ),
    responses(
        (status = 200, description = "Deleted advertisement"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Ads"
)]
pub async fn delete_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = ad_service::delete_ad(&state, &user, id).await?;
    Ok(Json(resp))
}
