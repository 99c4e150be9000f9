use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        ads::AdList,
        categories::CategoryList,
        orders::{DeletedOrders, OrderCreated, OrderList, OrderWithItems},
        products::ProductList,
    },
    models::{Advertisement, Category, Order, OrderItem, Product, User},
    response::{ApiResponse, Meta},
    routes::{admin, ads, auth, categories, health, orders, params, products},
    services::order_intake::UploadFailure,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::request_otp,
        auth::verify_otp,
        products::list_products,
        products::create_product,
        products::get_product,
        products::update_product,
        products::delete_product,
        categories::list_categories,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        ads::list_ads,
        ads::create_ad,
        ads::update_ad,
        ads::delete_ad,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        admin::list_all_orders,
        admin::update_order_status,
        admin::delete_order,
        admin::delete_all_orders
    ),
    components(
        schemas(
            User,
            Product,
            Category,
            Advertisement,
            Order,
            OrderItem,
            UploadFailure,
            ProductList,
            CategoryList,
            AdList,
            OrderList,
            OrderWithItems,
            OrderCreated,
            DeletedOrders,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderCreated>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Ads", description = "Advertisement endpoints"),
        (name = "Orders", description = "Order intake and lookup"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
