use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub sold: i32,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Advertisement {
    pub id: Uuid,
    pub title: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    /// Human-facing order number, strictly increasing, never reused.
    pub sequence_id: i64,
    pub user_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub delivery_address: String,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_proof_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
    pub position: i32,
}

/// Order status is stored as free text so operators can introduce their own
/// values; only these three carry behavior in the workflow.
pub mod order_status {
    pub const PENDING: &str = "pending";
    pub const DELIVERED: &str = "delivered";
    pub const CANCELLED: &str = "cancelled";

    pub fn normalize(raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            PENDING.to_string()
        } else {
            trimmed.to_lowercase()
        }
    }

    pub fn is_delivered(status: &str) -> bool {
        status.eq_ignore_ascii_case(DELIVERED)
    }
}

#[cfg(test)]
mod tests {
    use super::order_status;

    #[test]
    fn status_normalization_defaults_to_pending() {
        assert_eq!(order_status::normalize(""), "pending");
        assert_eq!(order_status::normalize("  "), "pending");
        assert_eq!(order_status::normalize("Delivered"), "delivered");
        assert_eq!(order_status::normalize("On Hold"), "on hold");
    }

    #[test]
    fn delivered_check_is_case_insensitive() {
        assert!(order_status::is_delivered("Delivered"));
        assert!(order_status::is_delivered("delivered"));
        assert!(!order_status::is_delivered("pending"));
    }
}
