use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, extension::postgres::PgExpr},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{
        AttachImageRequest, CreateProductRequest, CreateVariantRequest, ProductDetail,
        ProductList, ProductSummary, UpdateProductRequest, UpdateVariantRequest,
    },
    entity::{
        categories::{Column as CategoryCol, Entity as Categories},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        product_images::{
            ActiveModel as ImageActive, Column as ImageCol, Entity as ProductImages,
            Model as ImageModel,
        },
        product_variants::{
            ActiveModel as VariantActive, Column as VariantCol, Entity as ProductVariants,
        },
        products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
        reviews::{Column as ReviewCol, Entity as Reviews},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Product, ProductImage, ProductVariant},
    response::{ApiResponse, Meta},
    routes::params::{Paginated, ProductQuery, ProductSortBy, SortOrder},
    services::{non_blank, slugify},
    state::AppState,
    storage::{FileStorage, IMAGES_PREFIX},
};

/// Price of one unit of a product configuration.
pub fn unit_price(base_price: i64, price_modifier: i64) -> AppResult<i64> {
    let price = base_price
        .checked_add(price_modifier)
        .ok_or_else(|| AppError::Validation("price is out of range".into()))?;
    if price < 0 {
        return Err(AppError::Validation(
            "variant price modifier makes the price negative".into(),
        ));
    }
    Ok(price)
}

/// `unit_price * quantity`, rejecting totals that do not fit.
pub fn line_total(unit_price: i64, quantity: i32) -> AppResult<i64> {
    unit_price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| AppError::BadRequest("order total is out of range".into()))
}

/// Every variant of a product must stay priced at or above zero.
pub fn check_variant_prices(base_price: i64, modifiers: &[i64]) -> AppResult<()> {
    for modifier in modifiers {
        unit_price(base_price, *modifier)?;
    }
    Ok(())
}

#[derive(Debug, FromQueryResult)]
struct RatingRow {
    product_id: Uuid,
    average: Option<f64>,
    count: i64,
}

pub(crate) async fn rating_stats<C: ConnectionTrait>(
    conn: &C,
    product_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, (Option<f64>, i64)>> {
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = Reviews::find()
        .select_only()
        .column(ReviewCol::ProductId)
        .column_as(Expr::cust("AVG(rating)::float8"), "average")
        .column_as(Expr::cust("COUNT(*)"), "count")
        .filter(ReviewCol::ProductId.is_in(product_ids.to_vec()))
        .group_by(ReviewCol::ProductId)
        .into_model::<RatingRow>()
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.product_id, (row.average, row.count)))
        .collect())
}

fn image_with_url(storage: &FileStorage, model: ImageModel) -> ProductImage {
    let url = storage.presign_url_or_none(&model.storage_key);
    ProductImage {
        url,
        ..ProductImage::from(model)
    }
}

async fn find_product_model(state: &AppState, id_or_slug: &str) -> AppResult<ProductModel> {
    let finder = match Uuid::parse_str(id_or_slug) {
        Ok(id) => Products::find_by_id(id),
        Err(_) => Products::find().filter(Column::Slug.eq(id_or_slug)),
    };
    finder.one(&state.orm).await?.ok_or(AppError::NotFound)
}

pub async fn list_products(
    state: &AppState,
    viewer: Option<&AuthUser>,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.normalize();
    let mut condition = Condition::all();

    let show_inactive =
        query.include_inactive.unwrap_or(false) && viewer.is_some_and(AuthUser::is_admin);
    if !show_inactive {
        condition = condition.add(Column::IsActive.eq(true));
    }

    if let Some(search) = query.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(slug) = query.category.as_ref().filter(|s| !s.is_empty()) {
        let category = Categories::find()
            .filter(CategoryCol::Slug.eq(slug.as_str()))
            .one(&state.orm)
            .await?;
        match category {
            Some(category) => condition = condition.add(Column::CategoryId.eq(category.id)),
            None => {
                return Ok(ApiResponse::success(
                    "Products",
                    ProductList { items: Vec::new() },
                    Some(Meta::new(page, limit, 0)),
                ));
            }
        }
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::BasePrice.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::BasePrice.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::BasePrice,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let models = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = models.iter().map(|p| p.id).collect();
    let ratings = rating_stats(&state.orm, &ids).await?;

    let mut thumbnails: HashMap<Uuid, String> = HashMap::new();
    if !ids.is_empty() {
        let images = ProductImages::find()
            .filter(ImageCol::ProductId.is_in(ids.clone()))
            .order_by_asc(ImageCol::Position)
            .order_by_asc(ImageCol::CreatedAt)
            .all(&state.orm)
            .await?;
        for image in images {
            thumbnails.entry(image.product_id).or_insert(image.storage_key);
        }
    }

    let items = models
        .into_iter()
        .map(|model| {
            let (average_rating, review_count) =
                ratings.get(&model.id).copied().unwrap_or((None, 0));
            let thumbnail_url = thumbnails
                .get(&model.id)
                .and_then(|key| state.storage.presign_url_or_none(key));
            ProductSummary {
                product: model.into(),
                thumbnail_url,
                average_rating,
                review_count,
            }
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(
    state: &AppState,
    viewer: Option<&AuthUser>,
    id_or_slug: &str,
) -> AppResult<ApiResponse<ProductDetail>> {
    let model = find_product_model(state, id_or_slug).await?;
    let is_admin = viewer.is_some_and(AuthUser::is_admin);
    if !model.is_active && !is_admin {
        return Err(AppError::NotFound);
    }

    let category = match model.category_id {
        Some(category_id) => Categories::find_by_id(category_id)
            .one(&state.orm)
            .await?
            .map(Into::into),
        None => None,
    };

    let mut variants = ProductVariants::find().filter(VariantCol::ProductId.eq(model.id));
    if !is_admin {
        variants = variants.filter(VariantCol::IsActive.eq(true));
    }
    let variants = variants
        .order_by_asc(VariantCol::PriceModifier)
        .order_by_asc(VariantCol::Name)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(ProductVariant::from)
        .collect();

    let images = ProductImages::find()
        .filter(ImageCol::ProductId.eq(model.id))
        .order_by_asc(ImageCol::Position)
        .order_by_asc(ImageCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|image| image_with_url(&state.storage, image))
        .collect();

    let (average_rating, review_count) = rating_stats(&state.orm, &[model.id])
        .await?
        .remove(&model.id)
        .unwrap_or((None, 0));

    Ok(ApiResponse::success(
        "Product",
        ProductDetail {
            product: model.into(),
            category,
            variants,
            images,
            average_rating,
            review_count,
        },
        None,
    ))
}

async fn ensure_unique(
    state: &AppState,
    name: &str,
    slug: &str,
    except: Option<Uuid>,
) -> AppResult<()> {
    let mut finder = Products::find().filter(
        Condition::any()
            .add(Column::Name.eq(name))
            .add(Column::Slug.eq(slug)),
    );
    if let Some(id) = except {
        finder = finder.filter(Column::Id.ne(id));
    }
    if finder.one(&state.orm).await?.is_some() {
        return Err(AppError::Conflict(
            "a product with this name or slug already exists".into(),
        ));
    }
    Ok(())
}

async fn ensure_category_exists(state: &AppState, category_id: Option<Uuid>) -> AppResult<()> {
    if let Some(id) = category_id {
        if Categories::find_by_id(id).one(&state.orm).await?.is_none() {
            return Err(AppError::Validation("category does not exist".into()));
        }
    }
    Ok(())
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".into()));
    }
    if payload.base_price < 0 {
        return Err(AppError::Validation("base_price must not be negative".into()));
    }
    if payload.stock < 0 {
        return Err(AppError::Validation("stock must not be negative".into()));
    }
    let slug = slugify(payload.slug.as_deref().unwrap_or(&name));
    if slug.is_empty() {
        return Err(AppError::Validation("slug must contain letters or digits".into()));
    }
    ensure_unique(state, &name, &slug, None).await?;
    ensure_category_exists(state, payload.category_id).await?;

    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        category_id: Set(payload.category_id),
        name: Set(name),
        slug: Set(slug),
        description: Set(non_blank(payload.description)),
        base_price: Set(payload.base_price),
        stock: Set(payload.stock),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        state,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        product.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let name = match payload.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::Validation("name is required".into()));
        }
        Some(name) => name.trim().to_string(),
        None => existing.name.clone(),
    };
    let slug = match payload.slug {
        Some(slug) => slugify(&slug),
        None => existing.slug.clone(),
    };
    if slug.is_empty() {
        return Err(AppError::Validation("slug must contain letters or digits".into()));
    }
    if name != existing.name || slug != existing.slug {
        ensure_unique(state, &name, &slug, Some(id)).await?;
    }

    let existing_price = existing.base_price;
    let mut active: ActiveModel = existing.into();
    active.name = Set(name);
    active.slug = Set(slug);
    if payload.description.is_some() {
        active.description = Set(non_blank(payload.description));
    }
    if let Some(price) = payload.base_price {
        if price < 0 {
            return Err(AppError::Validation("base_price must not be negative".into()));
        }
        if price != existing_price {
            let modifiers: Vec<i64> = ProductVariants::find()
                .filter(VariantCol::ProductId.eq(id))
                .all(&state.orm)
                .await?
                .into_iter()
                .map(|v| v.price_modifier)
                .collect();
            check_variant_prices(price, &modifiers)?;
        }
        active.base_price = Set(price);
    }
    if let Some(stock) = payload.stock {
        if stock < 0 {
            return Err(AppError::Validation("stock must not be negative".into()));
        }
        active.stock = Set(stock);
    }
    if payload.category_id.is_some() {
        ensure_category_exists(state, payload.category_id).await?;
        active.category_id = Set(payload.category_id);
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        product.into(),
        Some(Meta::empty()),
    ))
}

/// Products that appear on orders are deactivated instead of removed.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let ordered = OrderItems::find()
        .filter(OrderItemCol::ProductId.eq(id))
        .count(&state.orm)
        .await?;

    let archived = ordered > 0;
    if archived {
        let mut active: ActiveModel = product.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().into());
        active.update(&state.orm).await?;
    } else {
        let images = ProductImages::find()
            .filter(ImageCol::ProductId.eq(id))
            .all(&state.orm)
            .await?;
        Products::delete_by_id(id).exec(&state.orm).await?;
        for image in images {
            if let Err(err) = state.storage.delete(&image.storage_key).await {
                tracing::warn!(error = %err, key = %image.storage_key, "image cleanup failed");
            }
        }
    }

    audit::record(
        state,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id, "archived": archived }),
    )
    .await;

    Ok(ApiResponse::success(
        if archived { "Archived" } else { "Deleted" },
        serde_json::json!({ "archived": archived }),
        Some(Meta::empty()),
    ))
}

pub async fn create_variant(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: CreateVariantRequest,
) -> AppResult<ApiResponse<ProductVariant>> {
    ensure_admin(user)?;
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("variant name is required".into()));
    }
    unit_price(product.base_price, payload.price_modifier)?;

    let duplicate = ProductVariants::find()
        .filter(VariantCol::ProductId.eq(product_id))
        .filter(VariantCol::Name.eq(name.as_str()))
        .one(&state.orm)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(format!("variant '{name}' already exists")));
    }

    let variant = VariantActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        name: Set(name),
        price_modifier: Set(payload.price_modifier),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        state,
        Some(user.user_id),
        "variant_create",
        "product_variants",
        serde_json::json!({ "product_id": product_id, "variant_id": variant.id }),
    )
    .await;

    Ok(ApiResponse::success("Variant created", variant.into(), None))
}

pub async fn update_variant(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    variant_id: Uuid,
    payload: UpdateVariantRequest,
) -> AppResult<ApiResponse<ProductVariant>> {
    ensure_admin(user)?;
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let existing = ProductVariants::find_by_id(variant_id)
        .filter(VariantCol::ProductId.eq(product_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: VariantActive = existing.into();
    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("variant name is required".into()));
        }
        active.name = Set(name);
    }
    if let Some(modifier) = payload.price_modifier {
        unit_price(product.base_price, modifier)?;
        active.price_modifier = Set(modifier);
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    let variant = active.update(&state.orm).await?;

    Ok(ApiResponse::success("Variant updated", variant.into(), None))
}

pub async fn delete_variant(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    variant_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = ProductVariants::delete_many()
        .filter(VariantCol::Id.eq(variant_id))
        .filter(VariantCol::ProductId.eq(product_id))
        .exec(&state.orm)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        state,
        Some(user.user_id),
        "variant_delete",
        "product_variants",
        serde_json::json!({ "product_id": product_id, "variant_id": variant_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn attach_image(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: AttachImageRequest,
) -> AppResult<ApiResponse<ProductImage>> {
    ensure_admin(user)?;
    if Products::find_by_id(product_id).one(&state.orm).await?.is_none() {
        return Err(AppError::NotFound);
    }
    if !payload.storage_key.starts_with(IMAGES_PREFIX) {
        return Err(AppError::Validation(format!(
            "image keys must start with '{IMAGES_PREFIX}'"
        )));
    }
    if !state.storage.exists(&payload.storage_key).await? {
        return Err(AppError::Validation("uploaded image not found".into()));
    }

    let position = match payload.position {
        Some(position) => position,
        None => ProductImages::find()
            .filter(ImageCol::ProductId.eq(product_id))
            .count(&state.orm)
            .await? as i32,
    };

    let image = ImageActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        storage_key: Set(payload.storage_key),
        position: Set(position),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success(
        "Image attached",
        image_with_url(&state.storage, image),
        None,
    ))
}

pub async fn delete_image(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    image_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let image = ProductImages::find_by_id(image_id)
        .filter(ImageCol::ProductId.eq(product_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    ProductImages::delete_by_id(image.id).exec(&state.orm).await?;
    state.storage.delete(&image.storage_key).await?;

    audit::record(
        state,
        Some(user.user_id),
        "image_delete",
        "product_images",
        serde_json::json!({ "product_id": product_id, "key": image.storage_key }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_overflow_is_rejected() {
        assert_eq!(line_total(12_000, 3).unwrap(), 36_000);
        assert!(matches!(line_total(i64::MAX, 2), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn base_price_cannot_undercut_a_variant_discount() {
        assert!(check_variant_prices(10_000, &[0, 2_000, -8_000]).is_ok());
        assert!(matches!(
            check_variant_prices(5_000, &[2_000, -8_000]),
            Err(AppError::Validation(_))
        ));
        assert!(check_variant_prices(0, &[]).is_ok());
    }

    #[test]
    fn variant_modifier_applies_to_base_price() {
        assert_eq!(unit_price(25_000, 5_000).unwrap(), 30_000);
        assert_eq!(unit_price(25_000, -5_000).unwrap(), 20_000);
        assert_eq!(unit_price(25_000, -25_000).unwrap(), 0);
    }

    #[test]
    fn negative_unit_price_is_rejected() {
        assert!(matches!(
            unit_price(1_000, -1_001),
            Err(AppError::Validation(_))
        ));
        assert!(unit_price(i64::MAX, 1).is_err());
    }
}
