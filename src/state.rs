use std::sync::Arc;

use crate::{
    blobstore::BlobStore,
    catalog::CatalogResolver,
    db::{DbPool, OrmConn},
    mailer::OtpMailer,
    order_store::OrderStore,
    services::order_intake::OrderIntake,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub blob: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn CatalogResolver>,
    pub orders: Arc<dyn OrderStore>,
    pub intake: Arc<OrderIntake>,
    pub mailer: Arc<dyn OtpMailer>,
}
