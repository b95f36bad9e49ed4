use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
    entity::{
        cart_items::{
            ActiveModel as CartActive, Column as CartCol, Entity as CartItems, Model as CartModel,
        },
        product_variants::{Column as VariantCol, Entity as ProductVariants},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    services::{
        non_blank,
        product_service::{line_total, unit_price},
    },
    state::AppState,
    storage::is_pending_key_of,
};

pub const MAX_LINE_QUANTITY: i32 = 1000;

fn check_quantity(quantity: i32) -> AppResult<()> {
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "quantity must not exceed {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}

async fn check_print_file(state: &AppState, user: &AuthUser, key: &str) -> AppResult<()> {
    if !is_pending_key_of(key, user.user_id) {
        return Err(AppError::Validation(
            "print_file_key must reference one of your uploads".into(),
        ));
    }
    if !state.storage.exists(key).await? {
        return Err(AppError::Validation("uploaded print file not found".into()));
    }
    Ok(())
}

async fn build_view(state: &AppState, rows: Vec<CartModel>) -> AppResult<CartView> {
    let product_ids: Vec<Uuid> = rows.iter().map(|row| row.product_id).collect();
    let variant_ids: Vec<Uuid> = rows.iter().filter_map(|row| row.variant_id).collect();

    let products: HashMap<Uuid, _> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        Products::find()
            .filter(ProdCol::Id.is_in(product_ids))
            .all(&state.orm)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };
    let variants: HashMap<Uuid, _> = if variant_ids.is_empty() {
        HashMap::new()
    } else {
        ProductVariants::find()
            .filter(VariantCol::Id.is_in(variant_ids))
            .all(&state.orm)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
    };

    let mut items = Vec::with_capacity(rows.len());
    let mut subtotal = 0_i64;
    let mut item_count = 0_i64;
    for row in rows {
        let Some(product) = products.get(&row.product_id) else {
            continue;
        };
        let variant = row.variant_id.and_then(|id| variants.get(&id));
        let modifier = variant.map(|v| v.price_modifier).unwrap_or(0);
        let unit_price = unit_price(product.base_price, modifier)?;
        let line_total = line_total(unit_price, row.quantity)?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or_else(|| AppError::BadRequest("cart total is out of range".into()))?;
        item_count += i64::from(row.quantity);

        let print_file_url = row
            .print_file_key
            .as_deref()
            .and_then(|key| state.storage.presign_url_or_none(key));

        items.push(CartItemDto {
            id: row.id,
            product: product.clone().into(),
            variant: variant.cloned().map(Into::into),
            quantity: row.quantity,
            unit_price,
            line_total,
            print_file_key: row.print_file_key,
            print_file_url,
            notes: row.notes,
        });
    }

    Ok(CartView {
        items,
        item_count,
        subtotal,
    })
}

async fn load_rows(state: &AppState, user_id: Uuid) -> AppResult<Vec<CartModel>> {
    Ok(CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .order_by_desc(CartCol::CreatedAt)
        .all(&state.orm)
        .await?)
}

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let rows = load_rows(state, user.user_id).await?;
    let view = build_view(state, rows).await?;
    let total = view.items.len() as i64;
    Ok(ApiResponse::success(
        "OK",
        view,
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn cart_subtotal(state: &AppState, user: &AuthUser) -> AppResult<i64> {
    let rows = load_rows(state, user.user_id).await?;
    Ok(build_view(state, rows).await?.subtotal)
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItemDto>> {
    check_quantity(payload.quantity)?;

    let product = Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?;
    let product = match product {
        Some(p) if p.is_active => p,
        _ => return Err(AppError::BadRequest("product not found".to_string())),
    };

    if let Some(variant_id) = payload.variant_id {
        let variant = ProductVariants::find_by_id(variant_id)
            .filter(VariantCol::ProductId.eq(product.id))
            .one(&state.orm)
            .await?;
        match variant {
            Some(v) if v.is_active => {}
            _ => return Err(AppError::BadRequest("variant not found".to_string())),
        }
    }

    let print_file_key = non_blank(payload.print_file_key);
    if let Some(key) = print_file_key.as_deref() {
        check_print_file(state, user, key).await?;
    }

    let mut finder = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(product.id));
    finder = match payload.variant_id {
        Some(id) => finder.filter(CartCol::VariantId.eq(id)),
        None => finder.filter(CartCol::VariantId.is_null()),
    };
    finder = match print_file_key.as_deref() {
        Some(key) => finder.filter(CartCol::PrintFileKey.eq(key)),
        None => finder.filter(CartCol::PrintFileKey.is_null()),
    };
    let exist = finder.one(&state.orm).await?;

    let notes = non_blank(payload.notes);
    let cart_item = if let Some(item) = exist {
        let mut active: CartActive = item.into();
        active.quantity = Set(payload.quantity);
        if notes.is_some() {
            active.notes = Set(notes);
        }
        active.updated_at = Set(Utc::now().into());
        active.update(&state.orm).await?
    } else {
        CartActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            product_id: Set(product.id),
            variant_id: Set(payload.variant_id),
            quantity: Set(payload.quantity),
            print_file_key: Set(print_file_key),
            notes: Set(notes),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&state.orm)
        .await?
    };

    audit::record(
        state,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    let mut view = build_view(state, vec![cart_item]).await?;
    let item = view.items.pop().ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("OK", item, None))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItemDto>> {
    let existing = CartItems::find_by_id(id)
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: CartActive = existing.into();
    if let Some(quantity) = payload.quantity {
        check_quantity(quantity)?;
        active.quantity = Set(quantity);
    }
    if payload.notes.is_some() {
        active.notes = Set(non_blank(payload.notes));
    }
    if let Some(key) = payload.print_file_key {
        let key = non_blank(Some(key));
        if let Some(key) = key.as_deref() {
            check_print_file(state, user, key).await?;
        }
        active.print_file_key = Set(key);
    }
    active.updated_at = Set(Utc::now().into());
    let item = active.update(&state.orm).await?;

    let mut view = build_view(state, vec![item]).await?;
    let item = view.items.pop().ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("OK", item, None))
}

pub async fn remove_cart_item(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = CartItems::delete_many()
        .filter(CartCol::Id.eq(id))
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        state,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "cart_item_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&state.orm)
        .await?;

    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({ "removed": result.rows_affected }),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds() {
        assert!(check_quantity(0).is_err());
        assert!(check_quantity(-3).is_err());
        assert!(check_quantity(1).is_ok());
        assert!(check_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(check_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }
}
