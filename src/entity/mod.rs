pub mod addresses;
pub mod audit_logs;
pub mod cart_items;
pub mod categories;
pub mod coupon_usages;
pub mod coupons;
pub mod enums;
pub mod order_items;
pub mod orders;
pub mod payments;
pub mod product_images;
pub mod product_variants;
pub mod products;
pub mod reviews;
pub mod users;

pub use addresses::Entity as Addresses;
pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use categories::Entity as Categories;
pub use coupon_usages::Entity as CouponUsages;
pub use coupons::Entity as Coupons;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use payments::Entity as Payments;
pub use product_images::Entity as ProductImages;
pub use product_variants::Entity as ProductVariants;
pub use products::Entity as Products;
pub use reviews::Entity as Reviews;
pub use users::Entity as Users;
