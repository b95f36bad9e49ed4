use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait, sea_query::LockType,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::{
        orders::OrderWithItems,
        payments::{PayOrderRequest, PaymentList},
    },
    entity::{
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{OrderStatus, Payment, PaymentRecordStatus, PaymentStatus},
    response::{ApiResponse, Meta},
    services::order_service::load_details,
    state::AppState,
};

/// `PAY-YYYYMMDD-xxxxxxxx`, the suffix taken from the payment id.
pub fn payment_reference(payment_id: Uuid, now: DateTime<Utc>) -> String {
    let simple = payment_id.simple().to_string();
    format!("PAY-{}-{}", now.format("%Y%m%d"), &simple[..8])
}

/// Whether an order in this state may be paid for `amount`.
pub fn check_payable(order: &OrderModel, amount: i64) -> AppResult<()> {
    if order.payment_status != PaymentStatus::Unpaid {
        return Err(AppError::Conflict("Order already paid".into()));
    }
    if !matches!(
        order.status,
        OrderStatus::PendingReview | OrderStatus::Accepted
    ) {
        return Err(AppError::Conflict(format!(
            "order in status {} cannot be paid",
            order.status.as_str()
        )));
    }
    if amount != order.total_amount {
        return Err(AppError::BadRequest(format!(
            "amount must equal the order total of {}",
            order.total_amount
        )));
    }
    Ok(())
}

pub async fn pay_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: PayOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(OrderCol::UserId.eq(user.user_id))
        .filter(OrderCol::Id.eq(id))
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    check_payable(&order, payload.amount)?;

    let now = Utc::now();
    let payment_id = Uuid::new_v4();
    let payment = PaymentActive {
        id: Set(payment_id),
        order_id: Set(order.id),
        user_id: Set(user.user_id),
        amount: Set(payload.amount),
        method: Set(payload.method),
        status: Set(PaymentRecordStatus::Captured),
        reference: Set(payment_reference(payment_id, now)),
        captured_at: Set(Some(now.into())),
        refunded_at: Set(None),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut active: OrderActive = order.into();
    active.payment_status = Set(PaymentStatus::Paid);
    active.updated_at = Set(now.into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        state,
        Some(user.user_id),
        "order_paid",
        "payments",
        serde_json::json!({
            "order_id": order.id,
            "payment_id": payment.id,
            "reference": payment.reference,
            "amount": payment.amount,
        }),
    )
    .await;

    let details = load_details(state, order).await?;
    Ok(ApiResponse::success(
        "Payment recorded",
        details,
        Some(Meta::empty()),
    ))
}

pub async fn list_payments(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<PaymentList>> {
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    // Other customers' orders are indistinguishable from missing ones.
    if order.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::NotFound);
    }

    let items: Vec<Payment> = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .order_by_desc(PaymentCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "OK",
        PaymentList { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn refund_payment(
    state: &AppState,
    user: &AuthUser,
    payment_id: Uuid,
) -> AppResult<ApiResponse<Payment>> {
    ensure_admin(user)?;
    let txn = state.orm.begin().await?;

    let payment = Payments::find_by_id(payment_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if payment.status != PaymentRecordStatus::Captured {
        return Err(AppError::Conflict("payment is already refunded".into()));
    }

    let order = Orders::find_by_id(payment.order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if !order.status.releases_reservations() {
        return Err(AppError::Conflict(
            "only rejected or cancelled orders can be refunded".into(),
        ));
    }

    let now = Utc::now();
    let mut active: PaymentActive = payment.into();
    active.status = Set(PaymentRecordStatus::Refunded);
    active.refunded_at = Set(Some(now.into()));
    let payment = active.update(&txn).await?;

    let mut order_active: OrderActive = order.into();
    order_active.payment_status = Set(PaymentStatus::Refunded);
    order_active.updated_at = Set(now.into());
    order_active.update(&txn).await?;

    txn.commit().await?;

    audit::record(
        state,
        Some(user.user_id),
        "payment_refunded",
        "payments",
        serde_json::json!({ "payment_id": payment.id, "order_id": payment.order_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment refunded",
        payment.into(),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn order(status: OrderStatus, payment_status: PaymentStatus) -> OrderModel {
        let now = Utc::now().into();
        OrderModel {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_number: "ORD-20240101-ABCDEF12".into(),
            status,
            payment_status,
            subtotal: 10_000,
            discount_amount: 1_000,
            shipping_fee: 500,
            total_amount: 9_500,
            coupon_id: None,
            ship_recipient: "Rin".into(),
            ship_phone: "0800".into(),
            ship_line1: "1 Press Lane".into(),
            ship_line2: None,
            ship_city: "Bandung".into(),
            ship_postal_code: "40111".into(),
            ship_country: "ID".into(),
            notes: None,
            admin_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reference_format() {
        let id = Uuid::parse_str("0f1e2d3c-0000-4000-8000-000000000000").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(payment_reference(id, now), "PAY-20251231-0f1e2d3c");
    }

    #[test]
    fn payable_before_and_after_review() {
        for status in [OrderStatus::PendingReview, OrderStatus::Accepted] {
            assert!(check_payable(&order(status, PaymentStatus::Unpaid), 9_500).is_ok());
        }
    }

    #[test]
    fn amount_must_match_total() {
        let err = check_payable(
            &order(OrderStatus::PendingReview, PaymentStatus::Unpaid),
            9_000,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn paid_or_closed_orders_are_rejected() {
        let paid = order(OrderStatus::Accepted, PaymentStatus::Paid);
        assert!(matches!(
            check_payable(&paid, 9_500),
            Err(AppError::Conflict(_))
        ));

        let cancelled = order(OrderStatus::Cancelled, PaymentStatus::Unpaid);
        assert!(matches!(
            check_payable(&cancelled, 9_500),
            Err(AppError::Conflict(_))
        ));
    }
}
