use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, SqlErr, Statement, TransactionTrait,
};
use thiserror::Error;
use uuid::Uuid;

use crate::db::OrmConn;
use crate::entity::{
    order_items::{
        ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
        Model as OrderItemModel,
    },
    orders::{
        ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
    },
};
use crate::models::{Order, OrderItem};

/// Order aggregate about to be persisted; the sequence id has already been
/// allocated by the caller.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub sequence_id: i64,
    pub user_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub delivery_address: String,
    pub total_amount: Decimal,
    pub status: String,
    pub payment_proof_url: String,
    pub items: Vec<LineItemDraft>,
}

#[derive(Debug, Clone)]
pub struct LineItemDraft {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub image_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// Another submission claimed the same sequence id first.
    #[error("sequence id already taken")]
    SequenceConflict,

    #[error("order rejected by storage: {0}")]
    Validation(String),

    #[error("order storage failed")]
    Db(#[from] sea_orm::DbErr),
}

impl From<OrderStoreError> for crate::error::AppError {
    fn from(err: OrderStoreError) -> Self {
        match err {
            OrderStoreError::Db(e) => crate::error::AppError::OrmError(e),
            other => crate::error::AppError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Allocate the next candidate sequence id. Implementations may hand the
    /// same value to concurrent callers; the unique index on the stored
    /// sequence id arbitrates at insert time and callers retry on conflict.
    async fn next_sequence_id(&self) -> Result<i64, OrderStoreError>;

    async fn insert(&self, draft: OrderDraft) -> Result<(Order, Vec<OrderItem>), OrderStoreError>;

    async fn find_by_sequence_id(
        &self,
        sequence_id: i64,
    ) -> Result<Option<(Order, Vec<OrderItem>)>, OrderStoreError>;

    /// Replace the status, returning the updated record together with the
    /// status it had before.
    async fn update_status(
        &self,
        sequence_id: i64,
        new_status: &str,
    ) -> Result<Option<(Order, Vec<OrderItem>, String)>, OrderStoreError>;

    /// Remove one order, returning what was removed so callers can clean up
    /// its uploaded images.
    async fn delete_by_sequence_id(
        &self,
        sequence_id: i64,
    ) -> Result<Option<(Order, Vec<OrderItem>)>, OrderStoreError>;

    async fn delete_all(&self) -> Result<Vec<(Order, Vec<OrderItem>)>, OrderStoreError>;
}

pub struct SeaOrmOrderStore {
    orm: OrmConn,
}

impl SeaOrmOrderStore {
    pub fn new(orm: OrmConn) -> Self {
        Self { orm }
    }

    async fn items_of(&self, order_id: Uuid) -> Result<Vec<OrderItem>, OrderStoreError> {
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order_id))
            .order_by_asc(OrderItemCol::Position)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(order_item_from_entity)
            .collect();
        Ok(items)
    }
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    /// Draws from a dedicated counter row so numbers stay strictly
    /// increasing and are never reused, even after orders are deleted.
    async fn next_sequence_id(&self) -> Result<i64, OrderStoreError> {
        let backend = self.orm.get_database_backend();
        let row = self
            .orm
            .query_one(Statement::from_string(
                backend,
                "UPDATE order_sequence SET current = current + 1 WHERE id = 1 RETURNING current",
            ))
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<i64>("", "current")?),
            None => Err(OrderStoreError::Validation(
                "order sequence counter is missing".into(),
            )),
        }
    }

    async fn insert(&self, draft: OrderDraft) -> Result<(Order, Vec<OrderItem>), OrderStoreError> {
        let txn = self.orm.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order = OrderActive {
            id: Set(order_id),
            sequence_id: Set(draft.sequence_id),
            user_id: Set(draft.user_id),
            customer_name: Set(draft.customer_name),
            phone_number: Set(draft.phone_number),
            delivery_address: Set(draft.delivery_address),
            total_amount: Set(draft.total_amount),
            status: Set(draft.status),
            payment_proof_url: Set(draft.payment_proof_url),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await
        .map_err(classify_insert_error)?;

        let mut items = Vec::with_capacity(draft.items.len());
        for (position, item) in draft.items.into_iter().enumerate() {
            let inserted = OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                name: Set(item.name),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                image_url: Set(item.image_url),
                position: Set(position as i32),
                created_at: Set(now.into()),
            }
            .insert(&txn)
            .await
            .map_err(classify_insert_error)?;
            items.push(order_item_from_entity(inserted));
        }

        txn.commit().await.map_err(classify_insert_error)?;

        Ok((order_from_entity(order), items))
    }

    async fn find_by_sequence_id(
        &self,
        sequence_id: i64,
    ) -> Result<Option<(Order, Vec<OrderItem>)>, OrderStoreError> {
        let order = Orders::find()
            .filter(OrderCol::SequenceId.eq(sequence_id))
            .one(&self.orm)
            .await?;
        let order = match order {
            Some(o) => o,
            None => return Ok(None),
        };
        let items = self.items_of(order.id).await?;
        Ok(Some((order_from_entity(order), items)))
    }

    async fn update_status(
        &self,
        sequence_id: i64,
        new_status: &str,
    ) -> Result<Option<(Order, Vec<OrderItem>, String)>, OrderStoreError> {
        let txn = self.orm.begin().await?;

        let order = Orders::find()
            .filter(OrderCol::SequenceId.eq(sequence_id))
            .lock(LockType::Update)
            .one(&txn)
            .await?;
        let order = match order {
            Some(o) => o,
            None => return Ok(None),
        };

        let previous_status = order.status.clone();
        let order_id = order.id;

        let mut active: OrderActive = order.into();
        active.status = Set(new_status.to_string());
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await?;

        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order_id))
            .order_by_asc(OrderItemCol::Position)
            .all(&txn)
            .await?
            .into_iter()
            .map(order_item_from_entity)
            .collect();

        txn.commit().await?;

        Ok(Some((order_from_entity(updated), items, previous_status)))
    }

    async fn delete_by_sequence_id(
        &self,
        sequence_id: i64,
    ) -> Result<Option<(Order, Vec<OrderItem>)>, OrderStoreError> {
        let removed = self.find_by_sequence_id(sequence_id).await?;
        if let Some((order, _)) = &removed {
            Orders::delete_by_id(order.id).exec(&self.orm).await?;
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<Vec<(Order, Vec<OrderItem>)>, OrderStoreError> {
        let orders = Orders::find().all(&self.orm).await?;
        let mut removed = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.items_of(order.id).await?;
            removed.push((order_from_entity(order), items));
        }
        Orders::delete_many().exec(&self.orm).await?;
        Ok(removed)
    }
}

fn classify_insert_error(err: sea_orm::DbErr) -> OrderStoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => OrderStoreError::SequenceConflict,
        Some(SqlErr::ForeignKeyConstraintViolation(detail)) => OrderStoreError::Validation(detail),
        _ => OrderStoreError::Db(err),
    }
}

pub(crate) fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        sequence_id: model.sequence_id,
        user_id: model.user_id,
        customer_name: model.customer_name,
        phone_number: model.phone_number,
        delivery_address: model.delivery_address,
        total_amount: model.total_amount,
        status: model.status,
        payment_proof_url: model.payment_proof_url,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        name: model.name,
        quantity: model.quantity,
        unit_price: model.unit_price,
        image_url: model.image_url,
        position: model.position,
    }
}
