use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use thiserror::Error;
use uuid::Uuid;

use crate::db::OrmConn;
use crate::entity::products::{Column as ProdCol, Entity as Products, Model as ProductModel};

/// The product attributes the order workflow needs to fill in a line item.
#[derive(Debug, Clone)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub stock: i32,
    pub sold: i32,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog lookup failed")]
    Db(#[from] sea_orm::DbErr),

    #[error("catalog lookup timed out")]
    Timeout,
}

#[async_trait]
pub trait CatalogResolver: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ProductSummary>, CatalogError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<ProductSummary>, CatalogError>;

    /// Inventory effect of a delivered order: stock down, sold up.
    async fn apply_delivery_adjustment(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), CatalogError>;
}

pub struct SeaOrmCatalog {
    orm: OrmConn,
}

impl SeaOrmCatalog {
    pub fn new(orm: OrmConn) -> Self {
        Self { orm }
    }
}

#[async_trait]
impl CatalogResolver for SeaOrmCatalog {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ProductSummary>, CatalogError> {
        let product = Products::find_by_id(id).one(&self.orm).await?;
        Ok(product.map(summary_from_entity))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ProductSummary>, CatalogError> {
        let product = Products::find()
            .filter(ProdCol::Name.eq(name))
            .one(&self.orm)
            .await?;
        Ok(product.map(summary_from_entity))
    }

    async fn apply_delivery_adjustment(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), CatalogError> {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
            .col_expr(ProdCol::Sold, Expr::col(ProdCol::Sold).add(quantity))
            .filter(ProdCol::Id.eq(product_id))
            .exec(&self.orm)
            .await?;
        Ok(())
    }
}

fn summary_from_entity(model: ProductModel) -> ProductSummary {
    ProductSummary {
        id: model.id,
        name: model.name,
        price: model.price,
        image_url: model.image_url,
        stock: model.stock,
        sold: model.sold,
    }
}
