use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderItem};
use crate::services::order_intake::UploadFailure;

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

/// Body of a successful intake. Product images that failed to upload are
/// reported here instead of failing the request.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderCreated {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub failed_uploads: Vec<UploadFailure>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeletedOrders {
    pub deleted: u64,
}
