use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, Statement};
use uuid::Uuid;

use axum_storefront_api::{
    blobstore::{BlobError, BlobStore},
    catalog::SeaOrmCatalog,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::orders::UpdateOrderStatusRequest,
    entity::products::{ActiveModel as ProductActive, Entity as Products},
    entity::users::ActiveModel as UserActive,
    mailer::LogMailer,
    middleware::auth::AuthUser,
    order_store::SeaOrmOrderStore,
    services::order_intake::{ImagePart, IntakeLimits, OrderIntake, OrderSubmission},
    services::order_service,
    state::AppState,
};

/// Blob store stand-in for DB-backed tests; uploads only exist as recorded
/// keys.
#[derive(Default)]
struct MemoryBlobStore {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, _bytes: Bytes, _content_type: &str) -> Result<String, BlobError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(format!("http://blobs.test/{key}"))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.keys.lock().unwrap().retain(|k| k != key);
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix("http://blobs.test/").map(|k| k.to_string())
    }
}

// Integration flow: submit an order, deliver it, check the inventory moved
// exactly once, then delete and confirm the uploaded blobs are gone too.
#[tokio::test]
async fn intake_delivery_and_cleanup_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    let (state, blob) = setup_state(&database_url).await?;

    // Seed users and a product with stock.
    let user_id = create_user(&state, "user", "user@example.com").await?;
    let admin_id = create_user(&state, "admin", "admin@example.com").await?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set("Test Widget".into()),
        description: Set(Some("A product for testing".into())),
        price: Set(dec!(10.00)),
        stock: Set(10),
        sold: Set(0),
        image_url: Set(None),
        category_id: Set(None),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    // Submit an order for two widgets with a payment proof and one image.
    let outcome = state
        .intake
        .submit(OrderSubmission {
            user_id: Some(user_id.to_string()),
            customer_name: Some("Test User".into()),
            phone_number: Some("+10000000".into()),
            delivery_address: Some("Test Street 1".into()),
            declared_amount: None,
            requested_status: None,
            raw_line_items: Some(format!(
                r#"[{{"product_id":"{}","quantity":2}}]"#,
                product.id
            )),
            payment_proof: Some(jpeg()),
            product_images: vec![jpeg()],
        })
        .await?;

    assert_eq!(outcome.order.sequence_id, 1);
    assert_eq!(outcome.order.status, "pending");
    assert_eq!(outcome.order.total_amount, dec!(20.00));
    assert_eq!(outcome.items.len(), 1);
    assert!(outcome.items[0].image_url.is_some());
    assert!(outcome.failed_uploads.is_empty());
    assert_eq!(blob.keys.lock().unwrap().len(), 2);

    // A second order gets the next number.
    let second = state
        .intake
        .submit(OrderSubmission {
            user_id: Some(user_id.to_string()),
            customer_name: Some("Test User".into()),
            phone_number: Some("+10000000".into()),
            delivery_address: Some("Test Street 1".into()),
            declared_amount: None,
            requested_status: None,
            raw_line_items: Some(format!(r#"[{{"product_id":"{}"}}]"#, product.id)),
            payment_proof: Some(jpeg()),
            product_images: vec![],
        })
        .await?;
    assert_eq!(second.order.sequence_id, 2);

    // Deliver the first order; stock moves once, a repeat is a no-op.
    order_service::update_order_status(
        &state,
        &auth_admin,
        1,
        UpdateOrderStatusRequest {
            status: "Delivered".into(),
        },
    )
    .await?;
    let after_first = Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .expect("product");
    assert_eq!(after_first.stock, 8);
    assert_eq!(after_first.sold, 2);

    order_service::update_order_status(
        &state,
        &auth_admin,
        1,
        UpdateOrderStatusRequest {
            status: "delivered".into(),
        },
    )
    .await?;
    let after_second = Products::find_by_id(product.id)
        .one(&state.orm)
        .await?
        .expect("product");
    assert_eq!(after_second.stock, 8, "repeated delivery must not re-apply");
    assert_eq!(after_second.sold, 2);

    // Deleting the order removes its uploads as well.
    order_service::delete_order(&state, &auth_admin, 1).await?;
    assert_eq!(
        blob.keys.lock().unwrap().len(),
        1,
        "only the second order's payment proof remains"
    );

    // Order numbers are never reused, even once every order is gone.
    order_service::delete_all_orders(&state, &auth_admin).await?;
    assert!(blob.keys.lock().unwrap().is_empty());

    let third = state
        .intake
        .submit(OrderSubmission {
            user_id: Some(user_id.to_string()),
            customer_name: Some("Test User".into()),
            phone_number: Some("+10000000".into()),
            delivery_address: Some("Test Street 1".into()),
            declared_amount: None,
            requested_status: None,
            raw_line_items: Some(format!(r#"[{{"product_id":"{}"}}]"#, product.id)),
            payment_proof: Some(jpeg()),
            product_images: vec![],
        })
        .await?;
    assert_eq!(third.order.sequence_id, 3);

    Ok(())
}

fn jpeg() -> ImagePart {
    ImagePart {
        bytes: Bytes::from_static(b"\xff\xd8\xff\xe0 not a real jpeg"),
        content_type: "image/jpeg".to_string(),
        file_name: Some("upload.jpg".to_string()),
    }
}

async fn setup_state(database_url: &str) -> anyhow::Result<(AppState, Arc<MemoryBlobStore>)> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, otp_codes, audit_logs, products, categories, advertisements, users RESTART IDENTITY CASCADE",
    ))
    .await?;
    orm.execute(Statement::from_string(
        backend,
        "UPDATE order_sequence SET current = 0 WHERE id = 1",
    ))
    .await?;

    let blob = Arc::new(MemoryBlobStore::default());
    let catalog = Arc::new(SeaOrmCatalog::new(orm.clone()));
    let orders = Arc::new(SeaOrmOrderStore::new(orm.clone()));
    let intake = Arc::new(OrderIntake::new(
        blob.clone(),
        catalog.clone(),
        orders.clone(),
        IntakeLimits::default(),
    ));

    let state = AppState {
        pool,
        orm,
        blob: blob.clone(),
        catalog,
        orders,
        intake,
        mailer: Arc::new(LogMailer),
    };
    Ok((state, blob))
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}
