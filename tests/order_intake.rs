use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use axum_storefront_api::{
    blobstore::{BlobError, BlobStore},
    catalog::{CatalogError, CatalogResolver, ProductSummary},
    models::{Order, OrderItem},
    order_store::{OrderDraft, OrderStore, OrderStoreError},
    services::order_intake::{
        ImagePart, IntakeLimits, OrderIntake, OrderIntakeError, OrderSubmission,
    },
    services::order_service,
};

// ---------------------------------------------------------------------------
// Fakes recording every collaborator call.

const PUBLIC_BASE: &str = "http://blobs.test";

#[derive(Default)]
struct FakeBlobStore {
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    /// Fail any put whose key ends with this suffix.
    fail_suffix: Mutex<Option<String>>,
    /// Fail any put whose key contains this fragment.
    fail_fragment: Mutex<Option<String>>,
}

impl FakeBlobStore {
    fn put_keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    fn delete_keys(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    fn fail_when_key_ends_with(&self, suffix: &str) {
        *self.fail_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    fn fail_when_key_contains(&self, fragment: &str) {
        *self.fail_fragment.lock().unwrap() = Some(fragment.to_string());
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn put(&self, key: &str, _bytes: Bytes, _content_type: &str) -> Result<String, BlobError> {
        let fails_suffix = self
            .fail_suffix
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| key.ends_with(s.as_str()));
        let fails_fragment = self
            .fail_fragment
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|f| key.contains(f.as_str()));
        if fails_suffix || fails_fragment {
            return Err(BlobError::Status(500));
        }
        self.puts.lock().unwrap().push(key.to_string());
        Ok(format!("{PUBLIC_BASE}/{key}"))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.deletes.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(PUBLIC_BASE)
            .map(|rest| rest.trim_start_matches('/').to_string())
    }
}

#[derive(Default)]
struct FakeCatalog {
    products: Vec<ProductSummary>,
    adjustments: Mutex<Vec<(Uuid, i32)>>,
}

impl FakeCatalog {
    fn with_products(products: Vec<ProductSummary>) -> Self {
        Self {
            products,
            adjustments: Mutex::new(Vec::new()),
        }
    }

    fn recorded_adjustments(&self) -> Vec<(Uuid, i32)> {
        self.adjustments.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogResolver for FakeCatalog {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ProductSummary>, CatalogError> {
        Ok(self.products.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ProductSummary>, CatalogError> {
        Ok(self.products.iter().find(|p| p.name == name).cloned())
    }

    async fn apply_delivery_adjustment(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), CatalogError> {
        self.adjustments.lock().unwrap().push((product_id, quantity));
        Ok(())
    }
}

/// In-memory order store with the same contract as the real one: reading the
/// next sequence id is not atomic with insert, and a unique check on insert
/// arbitrates between concurrent writers.
#[derive(Default)]
struct FakeOrderStore {
    orders: Mutex<Vec<(Order, Vec<OrderItem>)>>,
}

impl FakeOrderStore {
    fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn sequence_ids(&self) -> Vec<i64> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .map(|(o, _)| o.sequence_id)
            .collect()
    }
}

fn order_from_draft(draft: &OrderDraft) -> (Order, Vec<OrderItem>) {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let order = Order {
        id: order_id,
        sequence_id: draft.sequence_id,
        user_id: draft.user_id.clone(),
        customer_name: draft.customer_name.clone(),
        phone_number: draft.phone_number.clone(),
        delivery_address: draft.delivery_address.clone(),
        total_amount: draft.total_amount,
        status: draft.status.clone(),
        payment_proof_url: draft.payment_proof_url.clone(),
        created_at: now,
        updated_at: now,
    };
    let items = draft
        .items
        .iter()
        .enumerate()
        .map(|(position, item)| OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: item.product_id,
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            image_url: item.image_url.clone(),
            position: position as i32,
        })
        .collect();
    (order, items)
}

#[async_trait]
impl OrderStore for FakeOrderStore {
    async fn next_sequence_id(&self) -> Result<i64, OrderStoreError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.iter().map(|(o, _)| o.sequence_id).max().unwrap_or(0) + 1)
    }

    async fn insert(&self, draft: OrderDraft) -> Result<(Order, Vec<OrderItem>), OrderStoreError> {
        let mut orders = self.orders.lock().unwrap();
        if orders.iter().any(|(o, _)| o.sequence_id == draft.sequence_id) {
            return Err(OrderStoreError::SequenceConflict);
        }
        let pair = order_from_draft(&draft);
        orders.push(pair.clone());
        Ok(pair)
    }

    async fn find_by_sequence_id(
        &self,
        sequence_id: i64,
    ) -> Result<Option<(Order, Vec<OrderItem>)>, OrderStoreError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|(o, _)| o.sequence_id == sequence_id)
            .cloned())
    }

    async fn update_status(
        &self,
        sequence_id: i64,
        new_status: &str,
    ) -> Result<Option<(Order, Vec<OrderItem>, String)>, OrderStoreError> {
        let mut orders = self.orders.lock().unwrap();
        let Some((order, items)) = orders
            .iter_mut()
            .find(|(o, _)| o.sequence_id == sequence_id)
        else {
            return Ok(None);
        };
        let previous = order.status.clone();
        order.status = new_status.to_string();
        order.updated_at = Utc::now();
        Ok(Some((order.clone(), items.clone(), previous)))
    }

    async fn delete_by_sequence_id(
        &self,
        sequence_id: i64,
    ) -> Result<Option<(Order, Vec<OrderItem>)>, OrderStoreError> {
        let mut orders = self.orders.lock().unwrap();
        let index = orders.iter().position(|(o, _)| o.sequence_id == sequence_id);
        Ok(index.map(|i| orders.remove(i)))
    }

    async fn delete_all(&self) -> Result<Vec<(Order, Vec<OrderItem>)>, OrderStoreError> {
        let mut orders = self.orders.lock().unwrap();
        Ok(orders.drain(..).collect())
    }
}

// ---------------------------------------------------------------------------
// Builders.

fn jpeg(name: &str) -> ImagePart {
    ImagePart {
        bytes: Bytes::from_static(b"\xff\xd8\xff\xe0 not a real jpeg"),
        content_type: "image/jpeg".to_string(),
        file_name: Some(name.to_string()),
    }
}

fn submission(line_items: &str, product_images: usize) -> OrderSubmission {
    OrderSubmission {
        user_id: Some(Uuid::new_v4().to_string()),
        customer_name: Some("Ada Lovelace".to_string()),
        phone_number: Some("+4912345678".to_string()),
        delivery_address: Some("12 Analytical Engine Way".to_string()),
        declared_amount: None,
        requested_status: None,
        raw_line_items: Some(line_items.to_string()),
        payment_proof: Some(jpeg("proof.jpg")),
        product_images: (0..product_images)
            .map(|i| jpeg(&format!("item-{i}.jpg")))
            .collect(),
    }
}

fn product(name: &str, price: Decimal) -> ProductSummary {
    ProductSummary {
        id: Uuid::new_v4(),
        name: name.to_string(),
        price,
        image_url: None,
        stock: 100,
        sold: 0,
    }
}

struct Harness {
    blob: Arc<FakeBlobStore>,
    catalog: Arc<FakeCatalog>,
    store: Arc<FakeOrderStore>,
    intake: OrderIntake,
}

fn harness(products: Vec<ProductSummary>) -> Harness {
    harness_with_limits(products, IntakeLimits::default())
}

fn harness_with_limits(products: Vec<ProductSummary>, limits: IntakeLimits) -> Harness {
    let blob = Arc::new(FakeBlobStore::default());
    let catalog = Arc::new(FakeCatalog::with_products(products));
    let store = Arc::new(FakeOrderStore::default());
    let intake = OrderIntake::new(blob.clone(), catalog.clone(), store.clone(), limits);
    Harness {
        blob,
        catalog,
        store,
        intake,
    }
}

// ---------------------------------------------------------------------------
// The workflow's contract.

#[tokio::test]
async fn missing_payment_proof_fails_before_any_upload() {
    let h = harness(vec![product("Ferris Mug", dec!(12.00))]);
    let mut sub = submission(r#"[{"name":"Ferris Mug"}]"#, 2);
    sub.payment_proof = None;

    let err = h.intake.submit(sub).await.expect_err("must fail");
    assert!(matches!(err, OrderIntakeError::PaymentProofMissing));
    assert_eq!(h.blob.put_keys().len(), 0, "no upload may start");
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn missing_scalar_fields_are_reported_together_without_side_effects() {
    let h = harness(vec![]);
    let sub = OrderSubmission {
        payment_proof: Some(jpeg("proof.jpg")),
        ..Default::default()
    };

    let err = h.intake.submit(sub).await.expect_err("must fail");
    match err {
        OrderIntakeError::MissingFields(fields) => {
            assert_eq!(
                fields,
                vec![
                    "user_id",
                    "customer_name",
                    "phone_number",
                    "delivery_address",
                    "line_items"
                ]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.blob.put_keys().len(), 0);
}

#[tokio::test]
async fn malformed_line_items_compensate_every_upload() {
    let h = harness(vec![product("Ferris Mug", dec!(12.00))]);
    let sub = submission("definitely-not-json", 2);

    let err = h.intake.submit(sub).await.expect_err("must fail");
    assert!(matches!(err, OrderIntakeError::MalformedLineItems(_)));

    let puts = h.blob.put_keys();
    let deletes = h.blob.delete_keys();
    assert_eq!(puts.len(), 3, "payment proof plus two product images");
    assert_eq!(deletes.len(), 3, "every upload must be compensated");
    assert_eq!(
        puts.iter().collect::<HashSet<_>>(),
        deletes.iter().collect::<HashSet<_>>()
    );
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn empty_line_item_array_is_rejected_with_compensation() {
    let h = harness(vec![]);
    let sub = submission("[]", 1);

    let err = h.intake.submit(sub).await.expect_err("must fail");
    assert!(matches!(err, OrderIntakeError::NoValidLineItems));
    assert_eq!(h.blob.put_keys().len(), h.blob.delete_keys().len());
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn all_unresolvable_line_items_reject_the_order() {
    let h = harness(vec![]);
    let sub = submission(
        r#"[{"name":"Ghost Product"},{"product_id":"6f9619ff-8b86-d011-b42d-00c04fc964ff"}]"#,
        0,
    );

    let err = h.intake.submit(sub).await.expect_err("must fail");
    assert!(matches!(err, OrderIntakeError::NoValidLineItems));
    // The payment proof went up before resolution, so it must come down.
    assert_eq!(h.blob.put_keys().len(), 1);
    assert_eq!(h.blob.delete_keys().len(), 1);
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn image_association_follows_input_position_not_surviving_position() {
    let first = product("First", dec!(10.00));
    let third = product("Third", dec!(30.00));
    let h = harness(vec![first.clone(), third.clone()]);

    let line_items = format!(
        r#"[{{"product_id":"{}"}},{{"name":"Missing"}},{{"product_id":"{}"}}]"#,
        first.id, third.id
    );
    let outcome = h
        .intake
        .submit(submission(&line_items, 3))
        .await
        .expect("order should be created");

    assert_eq!(outcome.items.len(), 2, "unresolved middle item is dropped");
    let image_of = |i: usize| outcome.items[i].image_url.as_deref().expect("image url");
    assert!(image_of(0).ends_with("-0"), "first item keeps image #1");
    assert!(
        image_of(1).ends_with("-2"),
        "third item keeps image #3, not image #2"
    );

    // The middle image lost its line item and must not linger in storage.
    let deletes = h.blob.delete_keys();
    assert_eq!(deletes.len(), 1);
    assert!(deletes[0].ends_with("-1"));
}

#[tokio::test]
async fn client_price_wins_catalog_fills_gaps() {
    let mug = product("Ferris Mug", dec!(300.00));
    let h = harness(vec![mug.clone()]);

    let line_items = format!(
        r#"[{{"product_id":"{id}","price":"500.00"}},{{"product_id":"{id}"}}]"#,
        id = mug.id
    );
    let outcome = h
        .intake
        .submit(submission(&line_items, 0))
        .await
        .expect("order should be created");

    assert_eq!(outcome.items[0].unit_price, dec!(500.00));
    assert_eq!(outcome.items[1].unit_price, dec!(300.00));
    assert_eq!(outcome.order.total_amount, dec!(800.00));
}

#[tokio::test]
async fn zero_and_missing_quantity_default_to_one() {
    let mug = product("Ferris Mug", dec!(10.00));
    let h = harness(vec![mug.clone()]);

    let line_items = format!(
        r#"[{{"product_id":"{id}","quantity":0}},{{"product_id":"{id}","quantity":3}}]"#,
        id = mug.id
    );
    let outcome = h
        .intake
        .submit(submission(&line_items, 0))
        .await
        .expect("order should be created");

    assert_eq!(outcome.items[0].quantity, 1);
    assert_eq!(outcome.items[1].quantity, 3);
    assert_eq!(outcome.order.total_amount, dec!(40.00));
}

#[tokio::test]
async fn failed_product_image_degrades_instead_of_failing() {
    let mug = product("Ferris Mug", dec!(10.00));
    let h = harness(vec![mug.clone()]);
    h.blob.fail_when_key_ends_with("-0");

    let line_items = format!(r#"[{{"product_id":"{}"}}]"#, mug.id);
    let outcome = h
        .intake
        .submit(submission(&line_items, 1))
        .await
        .expect("order still goes through");

    assert_eq!(outcome.failed_uploads.len(), 1);
    assert_eq!(outcome.failed_uploads[0].position, 0);
    assert!(outcome.items[0].image_url.is_none());
}

#[tokio::test]
async fn failed_payment_proof_upload_aborts_the_order() {
    let mug = product("Ferris Mug", dec!(10.00));
    let h = harness(vec![mug.clone()]);
    h.blob.fail_when_key_contains("payments/");

    let line_items = format!(r#"[{{"product_id":"{}"}}]"#, mug.id);
    let err = h
        .intake
        .submit(submission(&line_items, 2))
        .await
        .expect_err("must fail");

    assert!(matches!(err, OrderIntakeError::Upload { .. }));
    assert_eq!(h.blob.put_keys().len(), 0, "product images never start");
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn declared_amount_overrides_computed_total() {
    let mug = product("Ferris Mug", dec!(10.00));
    let h = harness(vec![mug.clone()]);

    let line_items = format!(r#"[{{"product_id":"{}","quantity":2}}]"#, mug.id);
    let mut sub = submission(&line_items, 0);
    sub.declared_amount = Some(dec!(99.99));

    let outcome = h.intake.submit(sub).await.expect("order created");
    assert_eq!(outcome.order.total_amount, dec!(99.99));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_get_distinct_contiguous_sequence_ids() {
    const N: usize = 6;
    let mug = product("Ferris Mug", dec!(10.00));
    let h = harness_with_limits(
        vec![mug.clone()],
        IntakeLimits {
            // Worst case every loser retries once per round.
            max_allocation_attempts: N as u32 + 2,
            ..IntakeLimits::default()
        },
    );
    let intake = Arc::new(h.intake);

    let mut tasks = Vec::new();
    for _ in 0..N {
        let intake = intake.clone();
        let line_items = format!(r#"[{{"product_id":"{}"}}]"#, mug.id);
        tasks.push(tokio::spawn(async move {
            intake.submit(submission(&line_items, 0)).await
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let outcome = task
            .await
            .expect("task panicked")
            .expect("submission should succeed");
        ids.push(outcome.order.sequence_id);
    }

    ids.sort_unstable();
    assert_eq!(ids, (1..=N as i64).collect::<Vec<_>>());
    assert_eq!(h.store.sequence_ids().len(), N);
}

#[tokio::test]
async fn delivery_adjustment_applies_exactly_once() {
    let mug = product("Ferris Mug", dec!(10.00));
    let h = harness(vec![mug.clone()]);

    let line_items = format!(r#"[{{"product_id":"{}","quantity":2}}]"#, mug.id);
    let outcome = h
        .intake
        .submit(submission(&line_items, 0))
        .await
        .expect("order created");
    let sequence_id = outcome.order.sequence_id;

    let store: Arc<dyn OrderStore> = h.store.clone();
    let catalog: Arc<dyn CatalogResolver> = h.catalog.clone();

    let (order, _) = order_service::transition_status(&store, &catalog, sequence_id, "delivered")
        .await
        .expect("first transition");
    assert_eq!(order.status, "delivered");
    assert_eq!(h.catalog.recorded_adjustments(), vec![(mug.id, 2)]);

    // Re-submitting the same status is an inventory no-op.
    order_service::transition_status(&store, &catalog, sequence_id, "delivered")
        .await
        .expect("second transition");
    assert_eq!(h.catalog.recorded_adjustments(), vec![(mug.id, 2)]);
}

#[tokio::test]
async fn upload_timeout_counts_as_failed_upload() {
    struct StallingBlobStore(FakeBlobStore);

    #[async_trait]
    impl BlobStore for StallingBlobStore {
        async fn put(
            &self,
            key: &str,
            bytes: Bytes,
            content_type: &str,
        ) -> Result<String, BlobError> {
            if key.starts_with("products/") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.0.put(key, bytes, content_type).await
        }

        async fn delete(&self, key: &str) -> Result<(), BlobError> {
            self.0.delete(key).await
        }

        fn key_for_url(&self, url: &str) -> Option<String> {
            self.0.key_for_url(url)
        }
    }

    let mug = product("Ferris Mug", dec!(10.00));
    let blob = Arc::new(StallingBlobStore(FakeBlobStore::default()));
    let catalog = Arc::new(FakeCatalog::with_products(vec![mug.clone()]));
    let store = Arc::new(FakeOrderStore::default());
    let intake = OrderIntake::new(
        blob.clone(),
        catalog,
        store.clone(),
        IntakeLimits {
            upload_timeout: Duration::from_millis(50),
            ..IntakeLimits::default()
        },
    );

    let line_items = format!(r#"[{{"product_id":"{}"}}]"#, mug.id);
    let outcome = intake
        .submit(submission(&line_items, 1))
        .await
        .expect("order still goes through");

    assert_eq!(outcome.failed_uploads.len(), 1);
    assert!(outcome.items[0].image_url.is_none());
    assert_eq!(store.order_count(), 1);
}
