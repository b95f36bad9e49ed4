use pod_shop_api::{
    config::AppConfig,
    db::{DbPool, create_orm_conn, raw_pool, run_migrations},
    services::auth_service::hash_password,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    // Ensure migrations are applied.
    run_migrations(&orm).await?;
    let pool = raw_pool(&orm);

    let admin_id = ensure_user(pool, "admin@example.com", "admin12345", "Shop Admin", "admin").await?;
    let user_id = ensure_user(pool, "user@example.com", "user12345", "Sample Customer", "customer").await?;
    seed_catalog(pool).await?;
    seed_coupons(pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &DbPool,
    email: &str,
    password: &str,
    name: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password)?;

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, name, role)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn ensure_category(pool: &DbPool, name: &str, slug: &str) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO categories (id, name, slug)
        VALUES ($1, $2, $3)
        ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(slug)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn seed_catalog(pool: &DbPool) -> anyhow::Result<()> {
    let apparel = ensure_category(pool, "Apparel", "apparel").await?;
    let prints = ensure_category(pool, "Wall Prints", "wall-prints").await?;
    let stickers = ensure_category(pool, "Stickers", "stickers").await?;

    // (category, name, slug, description, base price, stock, [(variant, modifier)])
    let products: Vec<(Uuid, &str, &str, &str, i64, i32, Vec<(&str, i64)>)> = vec![
        (
            apparel,
            "Custom T-Shirt",
            "custom-t-shirt",
            "Cotton tee printed with your design",
            85_000,
            120,
            vec![("S", 0), ("M", 0), ("L", 5_000), ("XL", 10_000)],
        ),
        (
            apparel,
            "Custom Hoodie",
            "custom-hoodie",
            "Fleece hoodie with front print",
            250_000,
            40,
            vec![("M", 0), ("L", 15_000), ("XL", 25_000)],
        ),
        (
            prints,
            "Poster",
            "poster",
            "Matte poster print",
            60_000,
            200,
            vec![("A3", 0), ("A2", 30_000), ("A1", 70_000)],
        ),
        (
            stickers,
            "Die-cut Sticker Pack",
            "die-cut-sticker-pack",
            "Ten vinyl stickers cut to shape",
            35_000,
            3,
            vec![],
        ),
    ];

    for (category_id, name, slug, description, base_price, stock, variants) in products {
        let (product_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO products (id, category_id, name, slug, description, base_price, stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(category_id)
        .bind(name)
        .bind(slug)
        .bind(description)
        .bind(base_price)
        .bind(stock)
        .fetch_one(pool)
        .await?;

        for (variant, modifier) in variants {
            sqlx::query(
                r#"
                INSERT INTO product_variants (id, product_id, name, price_modifier)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (product_id, name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(product_id)
            .bind(variant)
            .bind(modifier)
            .execute(pool)
            .await?;
        }
    }

    println!("Seeded catalog");
    Ok(())
}

async fn seed_coupons(pool: &DbPool) -> anyhow::Result<()> {
    let coupons = vec![
        ("WELCOME10", "PERCENTAGE", 10_i64, Some(50_000_i64), None::<i64>, Some(1_i32)),
        ("FLAT25K", "FIXED", 25_000, None, Some(150_000), None),
    ];

    for (code, discount_type, value, max_discount, min_purchase, per_user_limit) in coupons {
        sqlx::query(
            r#"
            INSERT INTO coupons
                (id, code, discount_type, discount_value, max_discount, min_purchase, per_user_limit)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(discount_type)
        .bind(value)
        .bind(max_discount)
        .bind(min_purchase)
        .bind(per_user_limit)
        .execute(pool)
        .await?;
    }

    println!("Seeded coupons");
    Ok(())
}
