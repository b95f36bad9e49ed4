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
        addresses::{AddressList, CreateAddressRequest, UpdateAddressRequest},
        admin::{
            AuditLogList, InventoryAdjustRequest, ProductList as AdminProductList,
            UpdateOrderStatusRequest, UpdateRoleRequest, UserList,
        },
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
        categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
        coupons::{
            CouponList, CouponValidation, CreateCouponRequest, UpdateCouponRequest,
            ValidateCouponRequest,
        },
        dashboard::{
            DashboardOverview, DashboardTotals, SalesPoint, SalesSeries, StatusCount, TopProduct,
        },
        orders::{CheckoutRequest, OrderList, OrderWithItems},
        payments::{PayOrderRequest, PaymentList},
        products::{
            AttachImageRequest, CreateProductRequest, CreateVariantRequest, ProductDetail,
            ProductList, ProductSummary, UpdateProductRequest, UpdateVariantRequest,
        },
        reviews::{CreateReviewRequest, ReviewList},
        uploads::UploadResponse,
    },
    models::{
        Address, AuditLog, Category, Coupon, DiscountType, Order, OrderItem, OrderStatus, Payment,
        PaymentMethod, PaymentRecordStatus, PaymentStatus, Product, ProductImage, ProductVariant,
        Review, Role, ShippingAddress, User,
    },
    response::{ApiResponse, Meta},
    routes::{
        addresses, admin, auth, cart, categories, coupons, health, orders, params, products,
        reviews, uploads,
    },
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
    info(title = "Print-on-demand shop API"),
    paths(
        health::health_check,
        health::readiness,
        auth::register,
        auth::login,
        auth::me,
        addresses::list_addresses,
        addresses::create_address,
        addresses::update_address,
        addresses::delete_address,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        categories::update_category,
        categories::delete_category,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        products::create_variant,
        products::update_variant,
        products::delete_variant,
        products::attach_image,
        products::delete_image,
        products::list_reviews,
        products::create_review,
        reviews::delete_review,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        coupons::validate_coupon,
        coupons::list_coupons,
        coupons::get_coupon,
        coupons::create_coupon,
        coupons::update_coupon,
        coupons::delete_coupon,
        orders::list_order,
        orders::checkout,
        orders::get_order,
        orders::cancel_order,
        orders::pay_order,
        orders::list_payments,
        uploads::upload_image,
        uploads::upload_order_file,
        uploads::delete_order_file,
        uploads::download_file,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::refund_payment,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::list_users,
        admin::update_user_role,
        admin::list_audit_logs,
        admin::dashboard_overview,
        admin::dashboard_sales
    ),
    components(
        schemas(
            User,
            Role,
            Address,
            Category,
            Product,
            ProductVariant,
            ProductImage,
            Coupon,
            DiscountType,
            Order,
            OrderItem,
            OrderStatus,
            ShippingAddress,
            Payment,
            PaymentMethod,
            PaymentStatus,
            PaymentRecordStatus,
            Review,
            AuditLog,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateAddressRequest,
            UpdateAddressRequest,
            AddressList,
            CreateCategoryRequest,
            UpdateCategoryRequest,
            CategoryList,
            CreateProductRequest,
            UpdateProductRequest,
            CreateVariantRequest,
            UpdateVariantRequest,
            AttachImageRequest,
            ProductSummary,
            ProductList,
            ProductDetail,
            CreateReviewRequest,
            ReviewList,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartItemDto,
            CartView,
            ValidateCouponRequest,
            CouponValidation,
            CreateCouponRequest,
            UpdateCouponRequest,
            CouponList,
            CheckoutRequest,
            OrderList,
            OrderWithItems,
            PayOrderRequest,
            PaymentList,
            UploadResponse,
            UpdateOrderStatusRequest,
            InventoryAdjustRequest,
            AdminProductList,
            UserList,
            UpdateRoleRequest,
            AuditLogList,
            DashboardOverview,
            DashboardTotals,
            StatusCount,
            TopProduct,
            SalesPoint,
            SalesSeries,
            params::Pagination,
            params::SortOrder,
            params::ProductSortBy,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CartView>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Auth", description = "Registration, login and current user"),
        (name = "Addresses", description = "Customer shipping addresses"),
        (name = "Categories", description = "Catalog categories"),
        (name = "Products", description = "Products, variants and images"),
        (name = "Reviews", description = "Product reviews"),
        (name = "Cart", description = "Shopping cart"),
        (name = "Coupons", description = "Coupon validation and management"),
        (name = "Orders", description = "Checkout and order tracking"),
        (name = "Payments", description = "Payment capture"),
        (name = "Uploads", description = "Catalog images, print files and presigned downloads"),
        (name = "Admin", description = "Back office endpoints"),
        (name = "Dashboard", description = "Back office analytics"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
