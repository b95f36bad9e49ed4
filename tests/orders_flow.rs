mod common;

use pod_shop_api::{
    dto::{
        admin::{LowStockQuery, UpdateOrderStatusRequest},
        cart::AddToCartRequest,
        orders::CheckoutRequest,
        payments::PayOrderRequest,
    },
    error::AppError,
    models::{OrderStatus, PaymentMethod, PaymentStatus, Role},
    services::{admin_service, cart_service, order_service, payment_service},
};

use common::{create_address, create_catalog, create_coupon, create_user, db_state, stock_of};

fn status_request(status: OrderStatus) -> UpdateOrderStatusRequest {
    UpdateOrderStatusRequest {
        status,
        admin_note: None,
    }
}

// Customer checks out with a coupon and pays; admin reviews and moves the order forward.
#[tokio::test]
async fn checkout_pay_and_fulfil() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let customer = create_user(&state, Role::Customer).await?;
    let admin = create_user(&state, Role::Admin).await?;
    let catalog = create_catalog(&state, 3, None).await?;
    let address_id = create_address(&state, &customer).await?;
    let (_, coupon_code) = create_coupon(&state).await?;

    cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id: catalog.product_id,
            variant_id: Some(catalog.variant_id),
            quantity: 2,
            print_file_key: None,
            notes: None,
        },
    )
    .await?;
    assert_eq!(cart_service::cart_subtotal(&state, &customer).await?, 24_000);

    let placed = order_service::checkout(
        &state,
        &customer,
        CheckoutRequest {
            address_id,
            coupon_code: Some(coupon_code.to_lowercase()),
            notes: Some("front print only".into()),
        },
    )
    .await?
    .data
    .expect("checkout data");

    let order = placed.order;
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.status, OrderStatus::PendingReview);
    assert_eq!(order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(order.subtotal, 24_000);
    assert_eq!(order.discount_amount, 2_400);
    assert_eq!(order.shipping_fee, 1_500);
    assert_eq!(order.total_amount, 23_100);
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].unit_price, 12_000);
    assert_eq!(stock_of(&state, catalog.product_id).await?, 1);
    assert_eq!(cart_service::cart_subtotal(&state, &customer).await?, 0);

    // Production cannot start before payment.
    let early = admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        status_request(OrderStatus::Processing),
    )
    .await;
    assert!(matches!(early, Err(AppError::Conflict(_))));

    admin_service::update_order_status(
        &state,
        &admin,
        order.id,
        status_request(OrderStatus::Accepted),
    )
    .await?;

    let wrong_amount = payment_service::pay_order(
        &state,
        &customer,
        order.id,
        PayOrderRequest {
            method: PaymentMethod::Card,
            amount: 1,
        },
    )
    .await;
    assert!(matches!(wrong_amount, Err(AppError::BadRequest(_))));

    let paid = payment_service::pay_order(
        &state,
        &customer,
        order.id,
        PayOrderRequest {
            method: PaymentMethod::Card,
            amount: order.total_amount,
        },
    )
    .await?
    .data
    .expect("payment data");
    assert_eq!(paid.order.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.payments.len(), 1);
    assert!(paid.payments[0].reference.starts_with("PAY-"));

    let cancel = order_service::cancel_order(&state, &customer, order.id).await;
    assert!(matches!(cancel, Err(AppError::Conflict(_))));

    for next in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        let updated = admin_service::update_order_status(&state, &admin, order.id, status_request(next))
            .await?
            .data
            .expect("order data");
        assert_eq!(updated.status, next);
    }

    // Someone else's order looks missing.
    let stranger = create_user(&state, Role::Customer).await?;
    let hidden = order_service::get_order(&state, &stranger, order.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound)));

    Ok(())
}

// Cancelling an unpaid order puts the stock back.
#[tokio::test]
async fn cancel_restocks_and_low_stock_reporting() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let customer = create_user(&state, Role::Customer).await?;
    let admin = create_user(&state, Role::Admin).await?;
    let catalog = create_catalog(&state, 2, None).await?;
    let address_id = create_address(&state, &customer).await?;

    let too_many = cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id: catalog.product_id,
            variant_id: None,
            quantity: 5,
            print_file_key: None,
            notes: None,
        },
    )
    .await;
    // Stock is enforced at checkout, so the cart accepts the line.
    assert!(too_many.is_ok());

    let oversold = order_service::checkout(
        &state,
        &customer,
        CheckoutRequest {
            address_id,
            coupon_code: None,
            notes: None,
        },
    )
    .await;
    assert!(oversold.is_err());
    assert_eq!(stock_of(&state, catalog.product_id).await?, 2);

    cart_service::clear_cart(&state, &customer).await?;
    cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id: catalog.product_id,
            variant_id: None,
            quantity: 2,
            print_file_key: None,
            notes: None,
        },
    )
    .await?;

    let order = order_service::checkout(
        &state,
        &customer,
        CheckoutRequest {
            address_id,
            coupon_code: None,
            notes: None,
        },
    )
    .await?
    .data
    .expect("checkout data")
    .order;
    assert_eq!(stock_of(&state, catalog.product_id).await?, 0);

    let low = admin_service::list_low_stock(
        &state,
        &admin,
        LowStockQuery {
            page: Some(1),
            per_page: Some(100),
            threshold: Some(0),
        },
    )
    .await?
    .data
    .expect("low stock data");
    assert!(low.items.iter().any(|p| p.id == catalog.product_id));

    let cancelled = order_service::cancel_order(&state, &customer, order.id)
        .await?
        .data
        .expect("cancel data");
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&state, catalog.product_id).await?, 2);

    let again = order_service::cancel_order(&state, &customer, order.id).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    Ok(())
}
