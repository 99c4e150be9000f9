use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, QueryOrder, QuerySelect, Set};
use uuid::Uuid;

use crate::dto::ads::{AdList, CreateAdRequest, UpdateAdRequest};
use crate::{
    audit,
    entity::advertisements::{ActiveModel, Column, Entity as Advertisements, Model as AdModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Advertisement,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn list_ads(state: &AppState, pagination: Pagination) -> AppResult<ApiResponse<AdList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Advertisements::find().order_by_desc(Column::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(ad_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ads", AdList { items }, Some(meta)))
}

pub async fn create_ad(
    state: &AppState,
    user: &AuthUser,
    payload: CreateAdRequest,
) -> AppResult<ApiResponse<Advertisement>> {
    ensure_admin(user)?;
    let ad = ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(payload.title),
        image_url: Set(payload.image_url),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "ad_create",
        Some("advertisements"),
        Some(serde_json::json!({ "ad_id": ad.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Ad created",
        ad_from_entity(ad),
        Some(Meta::empty()),
    ))
}

pub async fn update_ad(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateAdRequest,
) -> AppResult<ApiResponse<Advertisement>> {
    ensure_admin(user)?;
    let existing = Advertisements::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(a) => a,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    if let Some(title) = payload.title {
        active.title = Set(title);
    }
    if let Some(image_url) = payload.image_url {
        active.image_url = Set(Some(image_url));
    }
    let ad = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Updated",
        ad_from_entity(ad),
        Some(Meta::empty()),
    ))
}

pub async fn delete_ad(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Advertisements::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn ad_from_entity(model: AdModel) -> Advertisement {
    Advertisement {
        id: model.id,
        title: model.title,
        image_url: model.image_url,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
