use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::addresses::{AddressList, CreateAddressRequest, UpdateAddressRequest},
    entity::addresses::{
        ActiveModel as AddressActive, Column as AddressCol, Entity as Addresses,
        Model as AddressModel,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Address,
    response::{ApiResponse, Meta},
    services::non_blank,
    state::AppState,
};

fn required(field: &str, value: String) -> AppResult<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(value)
}

pub async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    id: Uuid,
) -> AppResult<AddressModel> {
    Addresses::find_by_id(id)
        .filter(AddressCol::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

async fn clear_default<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<()> {
    Addresses::update_many()
        .col_expr(AddressCol::IsDefault, Expr::value(false))
        .filter(AddressCol::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(())
}

pub async fn list_addresses(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AddressList>> {
    let items: Vec<Address> = Addresses::find()
        .filter(AddressCol::UserId.eq(user.user_id))
        .order_by_desc(AddressCol::IsDefault)
        .order_by_desc(AddressCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Address::from)
        .collect();

    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "Addresses",
        AddressList { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn create_address(
    state: &AppState,
    user: &AuthUser,
    payload: CreateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let txn = state.orm.begin().await?;

    let existing = Addresses::find()
        .filter(AddressCol::UserId.eq(user.user_id))
        .count(&txn)
        .await?;
    let is_default = payload.is_default || existing == 0;
    if is_default {
        clear_default(&txn, user.user_id).await?;
    }

    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        recipient: Set(required("recipient", payload.recipient)?),
        phone: Set(required("phone", payload.phone)?),
        line1: Set(required("line1", payload.line1)?),
        line2: Set(non_blank(payload.line2)),
        city: Set(required("city", payload.city)?),
        postal_code: Set(required("postal_code", payload.postal_code)?),
        country: Set(required("country", payload.country)?),
        is_default: Set(is_default),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    audit::record(
        state,
        Some(user.user_id),
        "address_create",
        "addresses",
        serde_json::json!({ "address_id": address.id }),
    )
    .await;

    Ok(ApiResponse::success("Address created", address.into(), None))
}

pub async fn update_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let txn = state.orm.begin().await?;
    let existing = find_owned(&txn, user.user_id, id).await?;

    let mut active: AddressActive = existing.into();
    if let Some(recipient) = payload.recipient {
        active.recipient = Set(required("recipient", recipient)?);
    }
    if let Some(phone) = payload.phone {
        active.phone = Set(required("phone", phone)?);
    }
    if let Some(line1) = payload.line1 {
        active.line1 = Set(required("line1", line1)?);
    }
    if payload.line2.is_some() {
        active.line2 = Set(non_blank(payload.line2));
    }
    if let Some(city) = payload.city {
        active.city = Set(required("city", city)?);
    }
    if let Some(postal_code) = payload.postal_code {
        active.postal_code = Set(required("postal_code", postal_code)?);
    }
    if let Some(country) = payload.country {
        active.country = Set(required("country", country)?);
    }
    if payload.is_default == Some(true) {
        clear_default(&txn, user.user_id).await?;
        active.is_default = Set(true);
    }

    let address = active.update(&txn).await?;
    txn.commit().await?;

    Ok(ApiResponse::success("Address updated", address.into(), None))
}

pub async fn delete_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;
    let existing = find_owned(&txn, user.user_id, id).await?;
    Addresses::delete_by_id(existing.id).exec(&txn).await?;

    // Promote the newest remaining address so the user keeps a default.
    if existing.is_default {
        let next = Addresses::find()
            .filter(AddressCol::UserId.eq(user.user_id))
            .order_by_desc(AddressCol::CreatedAt)
            .one(&txn)
            .await?;
        if let Some(next) = next {
            let mut active: AddressActive = next.into();
            active.is_default = Set(true);
            active.update(&txn).await?;
        }
    }
    txn.commit().await?;

    audit::record(
        state,
        Some(user.user_id),
        "address_delete",
        "addresses",
        serde_json::json!({ "address_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
