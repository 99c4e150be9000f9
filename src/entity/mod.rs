pub mod advertisements;
pub mod categories;
pub mod order_items;
pub mod orders;
pub mod otp_codes;
pub mod products;
pub mod users;

pub use advertisements::Entity as Advertisements;
pub use categories::Entity as Categories;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use otp_codes::Entity as OtpCodes;
pub use products::Entity as Products;
pub use users::Entity as Users;
