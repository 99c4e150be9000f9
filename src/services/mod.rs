pub mod ad_service;
pub mod auth_service;
pub mod category_service;
pub mod order_intake;
pub mod order_service;
pub mod product_service;
