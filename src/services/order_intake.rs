use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    blobstore::{self, BlobError, BlobStore},
    catalog::{CatalogError, CatalogResolver, ProductSummary},
    error::AppError,
    models::{Order, OrderItem, order_status},
    order_store::{LineItemDraft, OrderDraft, OrderStore, OrderStoreError},
};

pub const MAX_PRODUCT_IMAGES: usize = 10;

/// One attached image, as pulled out of the multipart body.
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub bytes: Bytes,
    pub content_type: String,
    pub file_name: Option<String>,
}

/// Raw order submission, one per request. Scalar fields stay optional here so
/// validation can name everything that is missing in a single pass.
#[derive(Debug, Default)]
pub struct OrderSubmission {
    pub user_id: Option<String>,
    pub customer_name: Option<String>,
    pub phone_number: Option<String>,
    pub delivery_address: Option<String>,
    pub declared_amount: Option<Decimal>,
    pub requested_status: Option<String>,
    pub raw_line_items: Option<String>,
    pub payment_proof: Option<ImagePart>,
    /// Positionally associated with line items by index.
    pub product_images: Vec<ImagePart>,
}

/// Line-item entry as clients encode it in the `line_items` form field.
/// Aliases keep older camelCase clients working.
#[derive(Debug, Deserialize)]
pub struct RawLineItem {
    /// Catalog id as text; anything that does not parse falls back to name
    /// resolution instead of failing the submission.
    #[serde(default, alias = "productId", alias = "id")]
    pub product_id: Option<String>,
    #[serde(default, alias = "productName")]
    pub name: Option<String>,
    #[serde(default, alias = "qty")]
    pub quantity: Option<i64>,
    #[serde(default, alias = "unitPrice", alias = "unit_price")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Error)]
pub enum OrderIntakeError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("payment proof image is required")]
    PaymentProofMissing,

    #[error("image upload failed")]
    Upload {
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("line items are not a valid JSON array: {0}")]
    MalformedLineItems(String),

    #[error("no line item matched the catalog")]
    NoValidLineItems,

    #[error("could not allocate an order number")]
    AllocationConflict,

    #[error("order could not be persisted: {0}")]
    Persistence(String),
}

impl From<OrderIntakeError> for AppError {
    fn from(err: OrderIntakeError) -> Self {
        match err {
            OrderIntakeError::MissingFields(_) | OrderIntakeError::PaymentProofMissing => {
                AppError::BadRequest(err.to_string())
            }
            OrderIntakeError::MalformedLineItems(_) | OrderIntakeError::NoValidLineItems => {
                AppError::Unprocessable(err.to_string())
            }
            OrderIntakeError::Upload { .. } => AppError::Upstream("image upload failed".into()),
            OrderIntakeError::AllocationConflict => {
                AppError::Internal(anyhow::anyhow!("order number allocation kept conflicting"))
            }
            OrderIntakeError::Persistence(detail) => AppError::Internal(anyhow::anyhow!(detail)),
        }
    }
}

/// A product image that could not be stored. Reported inside the successful
/// response rather than failing the order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadFailure {
    /// Zero-based position of the image within the submission.
    pub position: usize,
    pub reason: String,
}

#[derive(Debug)]
pub struct IntakeOutcome {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub failed_uploads: Vec<UploadFailure>,
}

#[derive(Debug, Clone)]
pub struct IntakeLimits {
    pub upload_timeout: Duration,
    pub resolve_timeout: Duration,
    pub max_allocation_attempts: u32,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(5),
            max_allocation_attempts: 3,
        }
    }
}

#[derive(Debug)]
struct RequiredFields<'a> {
    user_id: &'a str,
    customer_name: &'a str,
    phone_number: &'a str,
    delivery_address: &'a str,
    raw_line_items: &'a str,
}

/// Drives a single order submission end to end: validation, image uploads,
/// line-item resolution, order-number allocation and persistence. Failure
/// policy is asymmetric on purpose: the payment proof is mandatory and its
/// upload aborts the order, while product images degrade to a null image plus
/// an entry in the failure ledger. Any error after the first upload deletes
/// everything uploaded so far.
pub struct OrderIntake {
    blob: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogResolver>,
    store: Arc<dyn OrderStore>,
    limits: IntakeLimits,
}

impl OrderIntake {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogResolver>,
        store: Arc<dyn OrderStore>,
        limits: IntakeLimits,
    ) -> Self {
        Self {
            blob,
            catalog,
            store,
            limits,
        }
    }

    pub async fn submit(
        &self,
        submission: OrderSubmission,
    ) -> Result<IntakeOutcome, OrderIntakeError> {
        // Everything required must be present before any remote write
        // happens.
        let fields = require_fields(&submission)?;
        let payment = submission
            .payment_proof
            .as_ref()
            .ok_or(OrderIntakeError::PaymentProofMissing)?;

        let stamp = Utc::now().timestamp_millis();
        let token = Uuid::new_v4();

        // Payment proof goes first; its failure aborts before anything
        // else has been written.
        let payment_key = blobstore::payment_key(stamp, token);
        let payment_proof_url = match self.put_with_timeout(&payment_key, payment.clone()).await {
            Ok(url) => url,
            Err(source) => {
                warn!(key = %payment_key, error = %source, "payment proof upload failed");
                return Err(OrderIntakeError::Upload {
                    key: payment_key,
                    source,
                });
            }
        };
        let mut uploaded_keys = vec![payment_key];

        // Product images fan out concurrently; individual failures leave
        // a hole at that position instead of failing the order.
        let image_count = submission.product_images.len();
        let uploads = submission
            .product_images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let key = blobstore::product_image_key(stamp, token, index);
                let image = image.clone();
                async move {
                    let outcome = self.put_with_timeout(&key, image).await;
                    (index, key, outcome)
                }
            });
        let mut product_urls: Vec<Option<String>> = vec![None; image_count];
        let mut product_keys: Vec<Option<String>> = vec![None; image_count];
        let mut failed_uploads = Vec::new();
        for (index, key, outcome) in join_all(uploads).await {
            match outcome {
                Ok(url) => {
                    uploaded_keys.push(key.clone());
                    product_urls[index] = Some(url);
                    product_keys[index] = Some(key);
                }
                Err(err) => {
                    warn!(position = index, key = %key, error = %err,
                        "product image upload failed, order continues without it");
                    failed_uploads.push(UploadFailure {
                        position: index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // Parsing happens after the uploads, so a bad payload has to
        // clean up after itself.
        let raw_entries: Vec<RawLineItem> = match serde_json::from_str(fields.raw_line_items) {
            Ok(entries) => entries,
            Err(err) => {
                self.compensate(&uploaded_keys).await;
                return Err(OrderIntakeError::MalformedLineItems(err.to_string()));
            }
        };
        if raw_entries.is_empty() {
            self.compensate(&uploaded_keys).await;
            return Err(OrderIntakeError::NoValidLineItems);
        }

        // Image association is fixed by original input position, before
        // unresolved entries are dropped.
        let mut drafts: Vec<LineItemDraft> = Vec::new();
        let mut referenced_images: Vec<usize> = Vec::new();
        for (index, entry) in raw_entries.iter().enumerate() {
            let uploaded_image = product_urls.get(index).cloned().flatten();
            let summary = match self.resolve_entry(entry).await {
                Some(summary) => summary,
                None => {
                    warn!(position = index, "line item did not resolve against the catalog, dropped");
                    continue;
                }
            };
            if uploaded_image.is_some() {
                referenced_images.push(index);
            }
            let quantity = entry
                .quantity
                .filter(|q| *q > 0)
                .map(|q| q.min(i64::from(i32::MAX)) as i32)
                .unwrap_or(1);
            let unit_price = entry
                .price
                .filter(|p| p.is_sign_positive() && !p.is_zero())
                .unwrap_or(summary.price);
            let name = entry
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| summary.name.clone());
            drafts.push(LineItemDraft {
                product_id: summary.id,
                name,
                quantity,
                unit_price,
                image_url: uploaded_image.or(summary.image_url),
            });
        }
        if drafts.is_empty() {
            self.compensate(&uploaded_keys).await;
            return Err(OrderIntakeError::NoValidLineItems);
        }

        let computed_total: Decimal = drafts
            .iter()
            .map(|d| d.unit_price * Decimal::from(d.quantity))
            .sum();
        let total_amount = submission
            .declared_amount
            .filter(|amount| *amount > Decimal::ZERO)
            .unwrap_or(computed_total);
        let status = submission
            .requested_status
            .as_deref()
            .map(order_status::normalize)
            .unwrap_or_else(|| order_status::PENDING.to_string());

        // Allocate and insert, retrying when a concurrent submission wins
        // the same sequence id.
        let mut attempt = 0;
        loop {
            attempt += 1;
            let sequence_id = match self.store.next_sequence_id().await {
                Ok(id) => id,
                Err(err) => {
                    self.compensate(&uploaded_keys).await;
                    return Err(OrderIntakeError::Persistence(err.to_string()));
                }
            };
            let draft = OrderDraft {
                sequence_id,
                user_id: fields.user_id.to_string(),
                customer_name: fields.customer_name.to_string(),
                phone_number: fields.phone_number.to_string(),
                delivery_address: fields.delivery_address.to_string(),
                total_amount,
                status: status.clone(),
                payment_proof_url: payment_proof_url.clone(),
                items: drafts.clone(),
            };
            match self.store.insert(draft).await {
                Ok((order, items)) => {
                    self.drop_unreferenced_images(&product_keys, &referenced_images)
                        .await;
                    info!(
                        sequence_id,
                        items = items.len(),
                        failed_uploads = failed_uploads.len(),
                        "order created"
                    );
                    return Ok(IntakeOutcome {
                        order,
                        items,
                        failed_uploads,
                    });
                }
                Err(OrderStoreError::SequenceConflict)
                    if attempt < self.limits.max_allocation_attempts =>
                {
                    warn!(sequence_id, attempt, "sequence id conflict, reallocating");
                }
                Err(OrderStoreError::SequenceConflict) => {
                    self.compensate(&uploaded_keys).await;
                    return Err(OrderIntakeError::AllocationConflict);
                }
                Err(err) => {
                    self.compensate(&uploaded_keys).await;
                    return Err(OrderIntakeError::Persistence(err.to_string()));
                }
            }
        }
    }

    async fn put_with_timeout(&self, key: &str, image: ImagePart) -> Result<String, BlobError> {
        match timeout(
            self.limits.upload_timeout,
            self.blob.put(key, image.bytes, &image.content_type),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BlobError::Timeout),
        }
    }

    async fn bounded<F>(&self, fut: F) -> Result<Option<ProductSummary>, CatalogError>
    where
        F: Future<Output = Result<Option<ProductSummary>, CatalogError>>,
    {
        match timeout(self.limits.resolve_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::Timeout),
        }
    }

    /// Resolve by catalog id first, falling back to the display name. A miss
    /// or a lookup failure both count as unresolved.
    async fn resolve_entry(&self, entry: &RawLineItem) -> Option<ProductSummary> {
        if let Some(id) = entry
            .product_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        {
            match self.bounded(self.catalog.find_by_id(id)).await {
                Ok(Some(summary)) => return Some(summary),
                Ok(None) => {}
                Err(err) => warn!(product_id = %id, error = %err, "catalog lookup by id failed"),
            }
        }
        // A product_id that is not a catalog id doubles as a name key.
        let fallback_name = entry
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| entry.product_id.as_deref().filter(|n| !n.trim().is_empty()));
        if let Some(name) = fallback_name {
            match self.bounded(self.catalog.find_by_name(name.trim())).await {
                Ok(Some(summary)) => return Some(summary),
                Ok(None) => {}
                Err(err) => warn!(name = %name, error = %err, "catalog lookup by name failed"),
            }
        }
        None
    }

    /// Best-effort rollback of uploaded blobs; the primary error is what the
    /// caller sees regardless of how these deletes fare.
    async fn compensate(&self, keys: &[String]) {
        for key in keys {
            if let Err(err) = self.blob.delete(key).await {
                warn!(key = %key, error = %err, "failed to delete uploaded blob during rollback");
            }
        }
    }

    /// Product images whose line item was dropped (or that had no line item
    /// at all) would otherwise linger with no record pointing at them.
    async fn drop_unreferenced_images(&self, product_keys: &[Option<String>], referenced: &[usize]) {
        for (index, key) in product_keys.iter().enumerate() {
            let Some(key) = key else { continue };
            if referenced.contains(&index) {
                continue;
            }
            warn!(position = index, key = %key, "removing product image with no surviving line item");
            if let Err(err) = self.blob.delete(key).await {
                warn!(key = %key, error = %err, "failed to delete unreferenced product image");
            }
        }
    }
}

fn require_fields(submission: &OrderSubmission) -> Result<RequiredFields<'_>, OrderIntakeError> {
    fn present(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    let user_id = present(&submission.user_id);
    let customer_name = present(&submission.customer_name);
    let phone_number = present(&submission.phone_number);
    let delivery_address = present(&submission.delivery_address);
    let raw_line_items = present(&submission.raw_line_items);

    let mut missing = Vec::new();
    for (value, field) in [
        (user_id, "user_id"),
        (customer_name, "customer_name"),
        (phone_number, "phone_number"),
        (delivery_address, "delivery_address"),
        (raw_line_items, "line_items"),
    ] {
        if value.is_none() {
            missing.push(field.to_string());
        }
    }

    match (
        user_id,
        customer_name,
        phone_number,
        delivery_address,
        raw_line_items,
    ) {
        (
            Some(user_id),
            Some(customer_name),
            Some(phone_number),
            Some(delivery_address),
            Some(raw_line_items),
        ) => Ok(RequiredFields {
            user_id,
            customer_name,
            phone_number,
            delivery_address,
            raw_line_items,
        }),
        _ => Err(OrderIntakeError::MissingFields(missing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_line_items_accept_camel_case_aliases() {
        let json = r#"[{"productId":"6f9619ff-8b86-d011-b42d-00c04fc964ff","qty":2,"price":"12.50"}]"#;
        let entries: Vec<RawLineItem> = serde_json::from_str(json).expect("parse");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].product_id.is_some());
        assert_eq!(entries[0].quantity, Some(2));
    }

    #[test]
    fn raw_line_items_tolerate_missing_fields() {
        let json = r#"[{"name":"Ferris Mug"}]"#;
        let entries: Vec<RawLineItem> = serde_json::from_str(json).expect("parse");
        assert_eq!(entries[0].name.as_deref(), Some("Ferris Mug"));
        assert!(entries[0].quantity.is_none());
        assert!(entries[0].price.is_none());
    }

    #[test]
    fn missing_fields_are_all_reported_at_once() {
        let submission = OrderSubmission {
            customer_name: Some("Jo".into()),
            ..Default::default()
        };
        let err = require_fields(&submission).expect_err("should be missing fields");
        match err {
            OrderIntakeError::MissingFields(fields) => {
                assert_eq!(
                    fields,
                    vec!["user_id", "phone_number", "delivery_address", "line_items"]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let submission = OrderSubmission {
            user_id: Some("   ".into()),
            ..Default::default()
        };
        let err = require_fields(&submission).expect_err("blank user_id");
        match err {
            OrderIntakeError::MissingFields(fields) => {
                assert!(fields.contains(&"user_id".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
