use std::str::FromStr;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use rust_decimal::Decimal;
use tracing::error;

use crate::{
    dto::orders::{OrderCreated, OrderList, OrderWithItems},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::{
        order_intake::{ImagePart, MAX_PRODUCT_IMAGES, OrderSubmission},
        order_service,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_orders))
        .route("/{sequence_id}", get(get_order))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderCreated>),
        (status = 400, description = "Missing fields or payment proof"),
        (status = 422, description = "Line items malformed or unresolvable"),
        (status = 502, description = "Image upload failed"),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<OrderCreated>>)> {
    let submission = read_submission(multipart).await?;

    let outcome = state.intake.submit(submission).await.map_err(|err| {
        error!(error = %err, "order intake failed");
        AppError::from(err)
    })?;

    let body = OrderCreated {
        order: outcome.order,
        items: outcome.items,
        failed_uploads: outcome.failed_uploads,
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Order created",
            body,
            Some(Meta::empty()),
        )),
    ))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "List own orders", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_my_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{sequence_id}",
    params(
        ("sequence_id" = i64, Path, description = "Order number")
    ),
    responses(
        (status = 200, description = "Get order with items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(sequence_id): Path<i64>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = order_service::get_order(&state, &user, sequence_id).await?;
    Ok(Json(resp))
}

/// Pull the submission out of the multipart body. Unknown fields are ignored
/// so clients can send extras without breaking.
async fn read_submission(mut multipart: Multipart) -> AppResult<OrderSubmission> {
    let mut submission = OrderSubmission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        match name.as_str() {
            "user_id" => submission.user_id = Some(text_field(field, &name).await?),
            "customer_name" => submission.customer_name = Some(text_field(field, &name).await?),
            "phone_number" => submission.phone_number = Some(text_field(field, &name).await?),
            "delivery_address" => {
                submission.delivery_address = Some(text_field(field, &name).await?)
            }
            "line_items" => submission.raw_line_items = Some(text_field(field, &name).await?),
            "status" => submission.requested_status = Some(text_field(field, &name).await?),
            "amount" => {
                let raw = text_field(field, &name).await?;
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                let amount = Decimal::from_str(raw).map_err(|_| {
                    AppError::BadRequest(format!("field '{name}' is not a valid amount"))
                })?;
                submission.declared_amount = Some(amount);
            }
            "payment_image" => submission.payment_proof = Some(image_field(field, &name).await?),
            "product_images" => {
                if submission.product_images.len() >= MAX_PRODUCT_IMAGES {
                    return Err(AppError::BadRequest(format!(
                        "at most {MAX_PRODUCT_IMAGES} product images are accepted"
                    )));
                }
                let image = image_field(field, &name).await?;
                submission.product_images.push(image);
            }
            _ => {}
        }
    }

    Ok(submission)
}

async fn text_field(field: axum::extract::multipart::Field<'_>, name: &str) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|_| AppError::BadRequest(format!("field '{name}' could not be read")))
}

async fn image_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> AppResult<ImagePart> {
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let file_name = field.file_name().map(|f| f.to_string());
    let bytes = field
        .bytes()
        .await
        .map_err(|_| AppError::BadRequest(format!("field '{name}' could not be read")))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest(format!("field '{name}' is empty")));
    }
    Ok(ImagePart {
        bytes,
        content_type,
        file_name,
    })
}
