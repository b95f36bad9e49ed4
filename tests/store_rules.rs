mod common;

use pod_shop_api::{
    dto::{
        addresses::{CreateAddressRequest, UpdateAddressRequest},
        admin::UpdateOrderStatusRequest,
        cart::AddToCartRequest,
        categories::CreateCategoryRequest,
        orders::{CheckoutRequest, OrderWithItems},
        payments::PayOrderRequest,
        products::{CreateVariantRequest, UpdateProductRequest},
        reviews::CreateReviewRequest,
    },
    entity::{
        coupon_usages::{Column as UsageCol, Entity as CouponUsages},
        coupons::Entity as Coupons,
        products::Entity as Products,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentMethod, PaymentRecordStatus, PaymentStatus, Role},
    services::{
        address_service, admin_service, cart_service, category_service, order_service,
        payment_service, product_service, review_service,
    },
    state::AppState,
    storage::{ORDER_FILES_PREFIX, pending_order_file_key},
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use common::{create_address, create_catalog, create_coupon, create_user, db_state, stock_of};

fn cart_line(product_id: Uuid, variant_id: Option<Uuid>, quantity: i32) -> AddToCartRequest {
    AddToCartRequest {
        product_id,
        variant_id,
        quantity,
        print_file_key: None,
        notes: None,
    }
}

async fn place_order(
    state: &AppState,
    user: &AuthUser,
    address_id: Uuid,
    coupon_code: Option<String>,
) -> anyhow::Result<OrderWithItems> {
    let placed = order_service::checkout(
        state,
        user,
        CheckoutRequest {
            address_id,
            coupon_code,
            notes: None,
        },
    )
    .await?
    .data
    .ok_or_else(|| anyhow::anyhow!("checkout returned no data"))?;
    Ok(placed)
}

async fn move_to(
    state: &AppState,
    admin: &AuthUser,
    order_id: Uuid,
    status: OrderStatus,
) -> anyhow::Result<()> {
    admin_service::update_order_status(
        state,
        admin,
        order_id,
        UpdateOrderStatusRequest {
            status,
            admin_note: None,
        },
    )
    .await?;
    Ok(())
}

async fn pay(state: &AppState, user: &AuthUser, order: &OrderWithItems) -> anyhow::Result<Uuid> {
    let paid = payment_service::pay_order(
        state,
        user,
        order.order.id,
        PayOrderRequest {
            method: PaymentMethod::BankTransfer,
            amount: order.order.total_amount,
        },
    )
    .await?
    .data
    .ok_or_else(|| anyhow::anyhow!("payment returned no data"))?;
    paid.payments
        .first()
        .map(|payment| payment.id)
        .ok_or_else(|| anyhow::anyhow!("no payment recorded"))
}

// Rejecting a paid order hands back the coupon and stock, after which the payment can be refunded.
#[tokio::test]
async fn reject_releases_coupon_and_allows_refund() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let customer = create_user(&state, Role::Customer).await?;
    let admin = create_user(&state, Role::Admin).await?;
    let catalog = create_catalog(&state, 5, None).await?;
    let address_id = create_address(&state, &customer).await?;
    let (coupon_id, code) = create_coupon(&state).await?;

    cart_service::add_to_cart(&state, &customer, cart_line(catalog.product_id, None, 2)).await?;
    let order = place_order(&state, &customer, address_id, Some(code.clone())).await?;
    let order_id = order.order.id;
    assert_eq!(order.order.discount_amount, 2_000);
    assert_eq!(stock_of(&state, catalog.product_id).await?, 3);

    let coupon = Coupons::find_by_id(coupon_id).one(&state.orm).await?.unwrap();
    assert_eq!(coupon.used_count, 1);

    // The per-user limit is already spent on this order.
    cart_service::add_to_cart(&state, &customer, cart_line(catalog.product_id, None, 1)).await?;
    let reused = place_order(&state, &customer, address_id, Some(code.clone())).await;
    assert!(reused.is_err());
    cart_service::clear_cart(&state, &customer).await?;

    let payment_id = pay(&state, &customer, &order).await?;

    let too_early = payment_service::refund_payment(&state, &admin, payment_id).await;
    assert!(matches!(too_early, Err(AppError::Conflict(_))));

    move_to(&state, &admin, order_id, OrderStatus::Rejected).await?;

    let coupon = Coupons::find_by_id(coupon_id).one(&state.orm).await?.unwrap();
    assert_eq!(coupon.used_count, 0);
    let usages = CouponUsages::find()
        .filter(UsageCol::OrderId.eq(order_id))
        .count(&state.orm)
        .await?;
    assert_eq!(usages, 0);
    assert_eq!(stock_of(&state, catalog.product_id).await?, 5);

    let customer_refund = payment_service::refund_payment(&state, &customer, payment_id).await;
    assert!(matches!(customer_refund, Err(AppError::Forbidden)));

    let refunded = payment_service::refund_payment(&state, &admin, payment_id)
        .await?
        .data
        .expect("refund data");
    assert_eq!(refunded.status, PaymentRecordStatus::Refunded);

    let details = order_service::get_order(&state, &customer, order_id)
        .await?
        .data
        .expect("order data");
    assert_eq!(details.order.payment_status, PaymentStatus::Refunded);

    let twice = payment_service::refund_payment(&state, &admin, payment_id).await;
    assert!(matches!(twice, Err(AppError::Conflict(_))));

    // The released coupon can be used again.
    cart_service::add_to_cart(&state, &customer, cart_line(catalog.product_id, None, 1)).await?;
    let again = place_order(&state, &customer, address_id, Some(code)).await?;
    assert_eq!(again.order.coupon_id, Some(coupon_id));

    Ok(())
}

// Only customers with a delivered order may review, and only once.
#[tokio::test]
async fn reviews_need_a_delivered_order() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let customer = create_user(&state, Role::Customer).await?;
    let admin = create_user(&state, Role::Admin).await?;
    let catalog = create_catalog(&state, 5, None).await?;
    let address_id = create_address(&state, &customer).await?;

    let review = || CreateReviewRequest {
        rating: 5,
        comment: Some("Crisp print".into()),
    };

    let before = review_service::create_review(&state, &customer, catalog.product_id, review()).await;
    assert!(matches!(before, Err(AppError::Forbidden)));

    cart_service::add_to_cart(&state, &customer, cart_line(catalog.product_id, None, 1)).await?;
    let order = place_order(&state, &customer, address_id, None).await?;
    move_to(&state, &admin, order.order.id, OrderStatus::Accepted).await?;
    pay(&state, &customer, &order).await?;

    let undelivered =
        review_service::create_review(&state, &customer, catalog.product_id, review()).await;
    assert!(matches!(undelivered, Err(AppError::Forbidden)));

    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        move_to(&state, &admin, order.order.id, status).await?;
    }

    let created = review_service::create_review(&state, &customer, catalog.product_id, review())
        .await?
        .data
        .expect("review data");
    assert_eq!(created.rating, 5);

    let duplicate =
        review_service::create_review(&state, &customer, catalog.product_id, review()).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    let stranger = create_user(&state, Role::Customer).await?;
    let foreign_delete = review_service::delete_review(&state, &stranger, created.id).await;
    assert!(matches!(foreign_delete, Err(AppError::Forbidden)));
    review_service::delete_review(&state, &admin, created.id).await?;

    Ok(())
}

// At most one address per user carries the default flag.
#[tokio::test]
async fn one_default_address_per_user() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let customer = create_user(&state, Role::Customer).await?;
    let address = |city: &str, is_default: bool| CreateAddressRequest {
        recipient: "Flow Tester".into(),
        phone: "+62 800 000".into(),
        line1: "1 Press Lane".into(),
        line2: None,
        city: city.into(),
        postal_code: "40111".into(),
        country: "ID".into(),
        is_default,
    };

    let first = address_service::create_address(&state, &customer, address("Bandung", false))
        .await?
        .data
        .expect("address data");
    assert!(first.is_default);

    let second = address_service::create_address(&state, &customer, address("Jakarta", true))
        .await?
        .data
        .expect("address data");
    assert!(second.is_default);

    let defaults = |items: &[pod_shop_api::models::Address]| {
        items
            .iter()
            .filter(|a| a.is_default)
            .map(|a| a.id)
            .collect::<Vec<_>>()
    };

    let listed = address_service::list_addresses(&state, &customer)
        .await?
        .data
        .expect("address list");
    assert_eq!(defaults(&listed.items), vec![second.id]);

    address_service::update_address(
        &state,
        &customer,
        first.id,
        UpdateAddressRequest {
            is_default: Some(true),
            ..Default::default()
        },
    )
    .await?;

    let listed = address_service::list_addresses(&state, &customer)
        .await?
        .data
        .expect("address list");
    assert_eq!(defaults(&listed.items), vec![first.id]);

    let stranger = create_user(&state, Role::Customer).await?;
    let hidden = address_service::delete_address(&state, &stranger, first.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound)));

    Ok(())
}

// A category cannot be deleted while products point at it.
#[tokio::test]
async fn category_in_use_cannot_be_deleted() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let admin = create_user(&state, Role::Admin).await?;
    let suffix = Uuid::new_v4().simple().to_string();
    let category = category_service::create_category(
        &state,
        &admin,
        CreateCategoryRequest {
            name: "Posters".into(),
            slug: Some(format!("posters-{suffix}")),
            description: None,
        },
    )
    .await?
    .data
    .expect("category data");

    let catalog = create_catalog(&state, 1, Some(category.id)).await?;

    let in_use = category_service::delete_category(&state, &admin, category.id).await;
    assert!(matches!(in_use, Err(AppError::Conflict(_))));

    Products::delete_by_id(catalog.product_id)
        .exec(&state.orm)
        .await?;
    category_service::delete_category(&state, &admin, category.id).await?;

    let gone = category_service::delete_category(&state, &admin, category.id).await;
    assert!(matches!(gone, Err(AppError::NotFound)));

    Ok(())
}

// A print file shared by two cart lines ends up under the order prefix for both items.
#[tokio::test]
async fn shared_print_file_moves_with_the_order() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let customer = create_user(&state, Role::Customer).await?;
    let catalog = create_catalog(&state, 5, None).await?;
    let address_id = create_address(&state, &customer).await?;

    let pending = pending_order_file_key(customer.user_id, "art.pdf");
    state.storage.put(&pending, b"%PDF-1.7 artwork").await?;

    for variant_id in [None, Some(catalog.variant_id)] {
        cart_service::add_to_cart(
            &state,
            &customer,
            AddToCartRequest {
                print_file_key: Some(pending.clone()),
                ..cart_line(catalog.product_id, variant_id, 1)
            },
        )
        .await?;
    }

    let order = place_order(&state, &customer, address_id, None).await?;
    assert_eq!(order.items.len(), 2);

    let prefix = format!("{ORDER_FILES_PREFIX}{}/", order.order.order_number);
    for item in &order.items {
        let key = item.print_file_key.as_deref().expect("print file key");
        assert!(key.starts_with(&prefix), "{key}");
        assert!(key.ends_with("art.pdf"));
        assert!(state.storage.exists(key).await?);
        assert!(item.print_file_url.is_some());
    }
    assert!(!state.storage.exists(&pending).await?);

    let stored = order_service::get_order(&state, &customer, order.order.id)
        .await?
        .data
        .expect("order data");
    assert!(
        stored
            .items
            .iter()
            .all(|item| item.print_file_key.as_deref().is_some_and(|k| k.starts_with(&prefix)))
    );

    Ok(())
}

// Lowering the base price may not push a discounted variant below zero.
#[tokio::test]
async fn base_price_respects_variant_discounts() -> anyhow::Result<()> {
    let Some(state) = db_state().await? else {
        return Ok(());
    };

    let admin = create_user(&state, Role::Admin).await?;
    let customer = create_user(&state, Role::Customer).await?;
    let catalog = create_catalog(&state, 5, None).await?;

    let discounted = product_service::create_variant(
        &state,
        &admin,
        catalog.product_id,
        CreateVariantRequest {
            name: "Sample".into(),
            price_modifier: -8_000,
            is_active: Some(true),
        },
    )
    .await?
    .data
    .expect("variant data");

    cart_service::add_to_cart(
        &state,
        &customer,
        cart_line(catalog.product_id, Some(discounted.id), 1),
    )
    .await?;

    let update = |base_price: i64| UpdateProductRequest {
        name: None,
        slug: None,
        description: None,
        base_price: Some(base_price),
        stock: None,
        category_id: None,
        is_active: None,
    };

    let too_low =
        product_service::update_product(&state, &admin, catalog.product_id, update(5_000)).await;
    assert!(matches!(too_low, Err(AppError::Validation(_))));
    assert_eq!(cart_service::cart_subtotal(&state, &customer).await?, 2_000);

    product_service::update_product(&state, &admin, catalog.product_id, update(8_000)).await?;
    assert_eq!(cart_service::cart_subtotal(&state, &customer).await?, 0);

    Ok(())
}
