#![allow(dead_code)]

use pod_shop_api::{
    config::AppConfig,
    db::{OrmConn, create_orm_conn, run_migrations},
    entity::{
        addresses::ActiveModel as AddressActive, coupons::ActiveModel as CouponActive,
        product_variants::ActiveModel as VariantActive, products::ActiveModel as ProductActive,
        products::Entity as Products, users::ActiveModel as UserActive,
    },
    middleware::auth::{AuthUser, issue_token},
    models::{DiscountType, Role},
    state::AppState,
};
use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, EntityTrait, Set};
use uuid::Uuid;

pub const SECRET: &str = "integration-secret";

pub fn test_config(database_url: &str) -> AppConfig {
    let storage_root = std::env::temp_dir().join(format!("pod-shop-it-{}", Uuid::new_v4()));
    AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 3000,
        jwt_secret: SECRET.into(),
        jwt_ttl_hours: 1,
        storage_root: storage_root.to_string_lossy().into_owned(),
        public_base_url: "http://localhost:3000".into(),
        presign_ttl_secs: 300,
        max_upload_bytes: 64 * 1024,
        cors_origins: vec!["http://localhost:5173".into()],
        low_stock_threshold: 5,
        shipping_fee: 1_500,
        free_shipping_threshold: Some(500_000),
    }
}

/// State whose database is unreachable; enough for requests that are
/// answered before any query runs.
pub fn offline_state() -> AppState {
    AppState::new(OrmConn::Disconnected, test_config(""))
}

pub fn bearer(user_id: Uuid, role: Role) -> String {
    let (token, _) = issue_token(SECRET, user_id, role, 1).expect("token");
    format!("Bearer {token}")
}

/// State over a migrated database, or `None` when no database is configured.
pub async fn db_state() -> anyhow::Result<Option<AppState>> {
    let Ok(database_url) =
        std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL"))
    else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run database tests.");
        return Ok(None);
    };

    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;
    let mut config = test_config(&database_url);
    config.max_upload_bytes = 1024 * 1024;
    Ok(Some(AppState::new(orm, config)))
}

fn suffix() -> String {
    Uuid::new_v4().simple().to_string()
}

pub async fn create_user(state: &AppState, role: Role) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@flow.test", suffix())),
        password_hash: Set("not-a-real-hash".into()),
        name: Set("Flow Tester".into()),
        role: Set(role),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(AuthUser {
        user_id: user.id,
        role,
    })
}

pub struct Catalog {
    pub product_id: Uuid,
    pub variant_id: Uuid,
}

/// Product priced 10_000 with one `XL` variant at +2_000.
pub async fn create_catalog(
    state: &AppState,
    stock: i32,
    category_id: Option<Uuid>,
) -> anyhow::Result<Catalog> {
    let suffix = suffix();
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        category_id: Set(category_id),
        name: Set(format!("Flow Tee {suffix}")),
        slug: Set(format!("flow-tee-{suffix}")),
        description: Set(Some("Cotton tee".into())),
        base_price: Set(10_000),
        stock: Set(stock),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    let variant = VariantActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product.id),
        name: Set("XL".into()),
        price_modifier: Set(2_000),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(Catalog {
        product_id: product.id,
        variant_id: variant.id,
    })
}

pub async fn create_address(state: &AppState, user: &AuthUser) -> anyhow::Result<Uuid> {
    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        recipient: Set("Flow Tester".into()),
        phone: Set("+62 800 000".into()),
        line1: Set("1 Press Lane".into()),
        line2: Set(None),
        city: Set("Bandung".into()),
        postal_code: Set("40111".into()),
        country: Set("ID".into()),
        is_default: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(address.id)
}

/// Active 10% coupon, once per user; returns its id and code.
pub async fn create_coupon(state: &AppState) -> anyhow::Result<(Uuid, String)> {
    let code = format!("FLOW{}", &suffix()[..8]).to_uppercase();
    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code.clone()),
        description: Set(None),
        discount_type: Set(DiscountType::Percentage),
        discount_value: Set(10),
        max_discount: Set(None),
        min_purchase: Set(None),
        usage_limit: Set(Some(10)),
        per_user_limit: Set(Some(1)),
        used_count: Set(0),
        starts_at: Set(None),
        expires_at: Set(None),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok((coupon.id, code))
}

pub async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product vanished"))?;
    Ok(product.stock)
}
