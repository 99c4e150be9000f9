use std::sync::Arc;

use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{error, warn};

use crate::dto::orders::{DeletedOrders, OrderList, OrderWithItems, UpdateOrderStatusRequest};
use crate::{
    audit,
    blobstore::BlobStore,
    catalog::CatalogResolver,
    entity::orders::{Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, can_access_resource, ensure_admin},
    models::{Order, OrderItem, order_status},
    order_store::{OrderStore, order_from_entity},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    list_orders_where(
        state,
        query,
        Condition::all().add(OrderCol::UserId.eq(user.user_id.to_string())),
    )
    .await
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    list_orders_where(state, query, Condition::all()).await
}

async fn list_orders_where(
    state: &AppState,
    query: OrderListQuery,
    mut condition: Condition,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(order_status::normalize(status)));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::SequenceId),
        SortOrder::Desc => finder.order_by_desc(OrderCol::SequenceId),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    sequence_id: i64,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let found = state.orders.find_by_sequence_id(sequence_id).await?;
    let (order, items) = match found {
        Some(pair) => pair,
        None => return Err(AppError::NotFound),
    };

    if !can_access_resource(user, &order.user_id) {
        return Err(AppError::NotFound);
    }

    Ok(ApiResponse::success(
        "Order",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    sequence_id: i64,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    if payload.status.trim().is_empty() {
        return Err(AppError::BadRequest("status must not be empty".into()));
    }
    let new_status = order_status::normalize(&payload.status);

    let (order, items) =
        transition_status(&state.orders, &state.catalog, sequence_id, &new_status).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "sequence_id": sequence_id, "status": order.status })),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Apply a status change. Stock and sold counters move only on the edge into
/// the delivered state, so repeating a delivered update never double-counts.
pub async fn transition_status(
    store: &Arc<dyn OrderStore>,
    catalog: &Arc<dyn CatalogResolver>,
    sequence_id: i64,
    new_status: &str,
) -> AppResult<(Order, Vec<OrderItem>)> {
    let updated = store.update_status(sequence_id, new_status).await?;
    let (order, items, previous_status) = match updated {
        Some(parts) => parts,
        None => return Err(AppError::NotFound),
    };

    if order_status::is_delivered(new_status) && !order_status::is_delivered(&previous_status) {
        for item in &items {
            if let Err(err) = catalog
                .apply_delivery_adjustment(item.product_id, item.quantity)
                .await
            {
                // The status is already persisted; retrying here could apply
                // the adjustment twice. Leave the discrepancy to operators.
                error!(
                    sequence_id,
                    product_id = %item.product_id,
                    error = %err,
                    "delivery inventory adjustment failed"
                );
            }
        }
    }

    Ok((order, items))
}

pub async fn delete_order(
    state: &AppState,
    user: &AuthUser,
    sequence_id: i64,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let removed = state.orders.delete_by_sequence_id(sequence_id).await?;
    let (order, items) = match removed {
        Some(pair) => pair,
        None => return Err(AppError::NotFound),
    };

    scrub_order_blobs(state.blob.as_ref(), &order, &items).await;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_delete",
        Some("orders"),
        Some(serde_json::json!({ "sequence_id": sequence_id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn delete_all_orders(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<DeletedOrders>> {
    ensure_admin(user)?;
    let removed = state.orders.delete_all().await?;
    let deleted = removed.len() as u64;

    for (order, items) in &removed {
        scrub_order_blobs(state.blob.as_ref(), order, items).await;
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_delete_all",
        Some("orders"),
        Some(serde_json::json!({ "deleted": deleted })),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        DeletedOrders { deleted },
        Some(Meta::empty()),
    ))
}

/// Remove a deleted order's uploaded images so nothing lingers in the object
/// store without a record pointing at it. Best-effort. Only keys in the
/// submission namespaces are touched; a line item whose image fell back to
/// the catalog's asset must not lose that shared file.
async fn scrub_order_blobs(blob: &dyn BlobStore, order: &Order, items: &[OrderItem]) {
    let mut urls: Vec<&str> = vec![order.payment_proof_url.as_str()];
    urls.extend(items.iter().filter_map(|item| item.image_url.as_deref()));

    for url in urls {
        let Some(key) = blob.key_for_url(url) else {
            continue;
        };
        if !key.starts_with("payments/") && !key.starts_with("products/") {
            continue;
        }
        if let Err(err) = blob.delete(&key).await {
            warn!(key = %key, error = %err, "failed to delete blob for removed order");
        }
    }
}
