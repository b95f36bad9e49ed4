use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, LockType},
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments},
        product_variants::{Column as VariantCol, Entity as ProductVariants},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Paginated, SortOrder},
    services::{
        address_service, coupon_service, non_blank,
        product_service::{line_total, unit_price},
    },
    state::AppState,
    storage::{is_pending_key_of, order_file_key},
};

/// `ORD-YYYYMMDD-XXXXXXXX`, the suffix taken from the order id.
pub fn order_number(order_id: Uuid, now: DateTime<Utc>) -> String {
    let simple = order_id.simple().to_string().to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), &simple[..8])
}

/// Checks a status change against the order lifecycle.
pub fn check_transition(
    current: OrderStatus,
    payment_status: PaymentStatus,
    next: OrderStatus,
) -> AppResult<()> {
    if current.is_terminal() {
        return Err(AppError::Conflict(format!(
            "order is {} and can no longer change",
            current.as_str()
        )));
    }
    if !current.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "cannot move order from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }
    if next == OrderStatus::Processing && payment_status != PaymentStatus::Paid {
        return Err(AppError::Conflict(
            "order must be paid before processing".into(),
        ));
    }
    Ok(())
}

/// Put reserved stock back and give the coupon usage back.
pub(crate) async fn restore_reservations<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    let mut per_product: HashMap<Uuid, i32> = HashMap::new();
    for item in &items {
        *per_product.entry(item.product_id).or_default() += item.quantity;
    }
    for (product_id, quantity) in per_product {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(quantity))
            .col_expr(ProdCol::UpdatedAt, Expr::current_timestamp().into())
            .filter(ProdCol::Id.eq(product_id))
            .exec(conn)
            .await?;
    }

    coupon_service::release_usage(conn, order_id).await
}

/// Move `order` to `next`, releasing reservations when the order leaves the
/// fulfilment path.
pub(crate) async fn transition<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
    next: OrderStatus,
    admin_note: Option<String>,
) -> AppResult<OrderModel> {
    check_transition(order.status, order.payment_status, next)?;

    let order_id = order.id;
    let mut active: OrderActive = order.into();
    active.status = Set(next);
    if admin_note.is_some() {
        active.admin_note = Set(admin_note);
    }
    active.updated_at = Set(Utc::now().into());
    let order = active.update(conn).await?;

    if next.releases_reservations() {
        restore_reservations(conn, order_id).await?;
    }
    Ok(order)
}

pub(crate) fn item_with_url(state: &AppState, model: OrderItemModel) -> OrderItem {
    let mut item = OrderItem::from(model);
    item.print_file_url = item
        .print_file_key
        .as_deref()
        .and_then(|key| state.storage.presign_url_or_none(key));
    item
}

/// Order plus items and payments, as returned by the detail endpoints.
pub(crate) async fn load_details(state: &AppState, order: OrderModel) -> AppResult<OrderWithItems> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|item| item_with_url(state, item))
        .collect();

    let payments = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .order_by_asc(PaymentCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(OrderWithItems {
        order: order.into(),
        items,
        payments,
    })
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders: Vec<Order> = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

struct PricedLine {
    product_id: Uuid,
    variant_id: Option<Uuid>,
    product_name: String,
    variant_name: Option<String>,
    unit_price: i64,
    quantity: i32,
    line_total: i64,
    print_file_key: Option<String>,
    notes: Option<String>,
}

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let address = address_service::find_owned(&txn, user.user_id, payload.address_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound => AppError::BadRequest("shipping address not found".into()),
            other => other,
        })?;

    let cart = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_asc(CartCol::CreatedAt)
        .lock(LockType::Update)
        .all(&txn)
        .await?;

    if cart.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let product_ids: Vec<Uuid> = cart.iter().map(|row| row.product_id).collect();
    let products: HashMap<Uuid, _> = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .order_by_asc(ProdCol::Id)
        .lock(LockType::Update)
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let variant_ids: Vec<Uuid> = cart.iter().filter_map(|row| row.variant_id).collect();
    let variants: HashMap<Uuid, _> = if variant_ids.is_empty() {
        HashMap::new()
    } else {
        ProductVariants::find()
            .filter(VariantCol::Id.is_in(variant_ids))
            .all(&txn)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
    };

    let mut demand: HashMap<Uuid, i32> = HashMap::new();
    let mut lines = Vec::with_capacity(cart.len());
    let mut subtotal: i64 = 0;
    for row in cart {
        if row.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        let product = match products.get(&row.product_id) {
            Some(p) if p.is_active => p,
            _ => {
                return Err(AppError::BadRequest(format!(
                    "product {} is no longer available",
                    row.product_id
                )));
            }
        };
        let variant = match row.variant_id {
            Some(id) => match variants.get(&id) {
                Some(v) if v.is_active && v.product_id == product.id => Some(v),
                _ => {
                    return Err(AppError::BadRequest(format!(
                        "variant of {} is no longer available",
                        product.name
                    )));
                }
            },
            None => None,
        };

        let wanted = demand.entry(product.id).or_default();
        *wanted += row.quantity;
        if product.stock < *wanted {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {}",
                product.name
            )));
        }

        let unit_price = unit_price(product.base_price, variant.map_or(0, |v| v.price_modifier))?;
        let line_total = line_total(unit_price, row.quantity)?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or_else(|| AppError::BadRequest("order total is out of range".into()))?;

        lines.push(PricedLine {
            product_id: product.id,
            variant_id: variant.map(|v| v.id),
            product_name: product.name.clone(),
            variant_name: variant.map(|v| v.name.clone()),
            unit_price,
            quantity: row.quantity,
            line_total,
            print_file_key: row.print_file_key,
            notes: row.notes,
        });
    }

    let coupon = match non_blank(payload.coupon_code) {
        Some(code) => Some(coupon_service::reserve(&txn, &code, user.user_id, subtotal).await?),
        None => None,
    };
    let discount_amount = coupon.as_ref().map_or(0, |(_, discount)| *discount);
    let shipping_fee = state.config.shipping_fee_for(subtotal);
    let total_amount = (subtotal - discount_amount)
        .checked_add(shipping_fee)
        .ok_or_else(|| AppError::BadRequest("order total is out of range".into()))?;

    let order_id = Uuid::new_v4();
    let order = OrderActive {
        id: Set(order_id),
        user_id: Set(user.user_id),
        order_number: Set(order_number(order_id, Utc::now())),
        status: Set(OrderStatus::PendingReview),
        payment_status: Set(PaymentStatus::Unpaid),
        subtotal: Set(subtotal),
        discount_amount: Set(discount_amount),
        shipping_fee: Set(shipping_fee),
        total_amount: Set(total_amount),
        coupon_id: Set(coupon.as_ref().map(|(c, _)| c.id)),
        ship_recipient: Set(address.recipient),
        ship_phone: Set(address.phone),
        ship_line1: Set(address.line1),
        ship_line2: Set(address.line2),
        ship_city: Set(address.city),
        ship_postal_code: Set(address.postal_code),
        ship_country: Set(address.country),
        notes: Set(non_blank(payload.notes)),
        admin_note: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            variant_id: Set(line.variant_id),
            product_name: Set(line.product_name),
            variant_name: Set(line.variant_name),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            line_total: Set(line.line_total),
            print_file_key: Set(line.print_file_key),
            notes: Set(line.notes),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(item);
    }

    for (product_id, quantity) in demand {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
            .col_expr(ProdCol::UpdatedAt, Expr::current_timestamp().into())
            .filter(ProdCol::Id.eq(product_id))
            .exec(&txn)
            .await?;
    }

    if let Some((coupon, discount)) = &coupon {
        coupon_service::record_usage(&txn, coupon.id, user.user_id, order.id, *discount).await?;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    let moved = move_print_files(state, user, &order, items).await;

    audit::record(
        state,
        Some(user.user_id),
        "checkout",
        "orders",
        serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "total_amount": order.total_amount,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: order.into(),
            items: moved.into_iter().map(|item| item_with_url(state, item)).collect(),
            payments: Vec::new(),
        },
        Some(Meta::empty()),
    ))
}

/// Distinct pending print-file keys of the uploader, in item order.
pub fn pending_print_keys(items: &[OrderItemModel], user_id: Uuid) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in items.iter().filter_map(|item| item.print_file_key.as_deref()) {
        if is_pending_key_of(key, user_id) && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Copy each pending print file once under the order prefix and repoint
/// every item that uses it. Pending objects are deleted only after their
/// items were updated; any failure leaves those items on the pending key.
async fn move_print_files(
    state: &AppState,
    user: &AuthUser,
    order: &OrderModel,
    mut items: Vec<OrderItemModel>,
) -> Vec<OrderItemModel> {
    let mut moved = Vec::new();
    for pending in pending_print_keys(&items, user.user_id) {
        let target = order_file_key(&order.order_number, &pending);
        if let Err(err) = state.storage.copy(&pending, &target).await {
            tracing::warn!(error = %err, key = %pending, "print file copy failed");
            continue;
        }

        let updated = OrderItems::update_many()
            .col_expr(OrderItemCol::PrintFileKey, Expr::value(target.clone()))
            .filter(OrderItemCol::OrderId.eq(order.id))
            .filter(OrderItemCol::PrintFileKey.eq(pending.as_str()))
            .exec(&state.orm)
            .await;
        if let Err(err) = updated {
            tracing::warn!(error = %err, key = %target, "print file key update failed");
            continue;
        }

        for item in items
            .iter_mut()
            .filter(|item| item.print_file_key.as_deref() == Some(pending.as_str()))
        {
            item.print_file_key = Some(target.clone());
        }
        moved.push(pending);
    }

    for pending in moved {
        if let Err(err) = state.storage.delete(&pending).await {
            tracing::warn!(error = %err, key = %pending, "pending print file cleanup failed");
        }
    }
    items
}

async fn find_own(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_own(state, user, id).await?;
    let details = load_details(state, order).await?;
    Ok(ApiResponse::success("OK", details, Some(Meta::empty())))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if !matches!(
        order.status,
        OrderStatus::PendingReview | OrderStatus::Accepted
    ) {
        return Err(AppError::Conflict(format!(
            "order in status {} can no longer be cancelled",
            order.status.as_str()
        )));
    }
    if order.payment_status != PaymentStatus::Unpaid {
        return Err(AppError::Conflict(
            "paid orders must be cancelled by the shop".into(),
        ));
    }

    let order = transition(&txn, order, OrderStatus::Cancelled, None).await?;
    txn.commit().await?;

    audit::record(
        state,
        Some(user.user_id),
        "order_cancelled",
        "orders",
        serde_json::json!({ "order_id": order.id }),
    )
    .await;

    let details = load_details(state, order).await?;
    Ok(ApiResponse::success("Order cancelled", details, Some(Meta::empty())))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn item(print_file_key: Option<String>) -> OrderItemModel {
        OrderItemModel {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            product_name: "Tee".into(),
            variant_name: None,
            unit_price: 1_000,
            quantity: 1,
            line_total: 1_000,
            print_file_key,
            notes: None,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn shared_print_file_is_moved_once() {
        let user_id = Uuid::new_v4();
        let shared = format!("orders-file/pending/{user_id}/abc-art.pdf");
        let other = format!("orders-file/pending/{user_id}/def-back.png");
        let foreign = format!("orders-file/pending/{}/x-art.pdf", Uuid::new_v4());
        let items = vec![
            item(Some(shared.clone())),
            item(None),
            item(Some(shared.clone())),
            item(Some(foreign)),
            item(Some(other.clone())),
            item(Some("orders-file/ORD-20240101-AAAAAAAA/done.pdf".into())),
        ];
        assert_eq!(pending_print_keys(&items, user_id), vec![shared, other]);
    }

    #[test]
    fn order_number_uses_date_and_id_prefix() {
        let id = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(order_number(id, now), "ORD-20240309-A1B2C3D4");
    }

    #[test]
    fn processing_requires_payment() {
        let err = check_transition(
            OrderStatus::Accepted,
            PaymentStatus::Unpaid,
            OrderStatus::Processing,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        assert!(
            check_transition(
                OrderStatus::Accepted,
                PaymentStatus::Paid,
                OrderStatus::Processing
            )
            .is_ok()
        );
    }

    #[test]
    fn closed_orders_do_not_move() {
        for status in [
            OrderStatus::Rejected,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            let err =
                check_transition(status, PaymentStatus::Paid, OrderStatus::Accepted).unwrap_err();
            assert!(matches!(err, AppError::Conflict(msg) if msg.contains("can no longer change")));
        }
    }

    #[test]
    fn rejects_skipping_review() {
        let err = check_transition(
            OrderStatus::PendingReview,
            PaymentStatus::Paid,
            OrderStatus::Shipped,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn cancellation_allowed_until_shipped() {
        for from in [
            OrderStatus::PendingReview,
            OrderStatus::Accepted,
            OrderStatus::Processing,
        ] {
            assert!(check_transition(from, PaymentStatus::Paid, OrderStatus::Cancelled).is_ok());
        }
        assert!(
            check_transition(
                OrderStatus::Shipped,
                PaymentStatus::Paid,
                OrderStatus::Cancelled
            )
            .is_err()
        );
    }
}
