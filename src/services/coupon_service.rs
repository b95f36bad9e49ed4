//! Coupon codes: eligibility, discount arithmetic and usage bookkeeping.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, sea_query::Expr,
    sea_query::LockType,
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    audit,
    dto::coupons::{
        CouponList, CouponListQuery, CouponValidation, CreateCouponRequest, UpdateCouponRequest,
        ValidateCouponRequest,
    },
    entity::{
        coupon_usages::{
            ActiveModel as UsageActive, Column as UsageCol, Entity as CouponUsages,
        },
        coupons::{ActiveModel as CouponActive, Column as CouponCol, Entity as Coupons, Model},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Coupon, DiscountType},
    response::{ApiResponse, Meta},
    routes::params::Paginated,
    services::{cart_service, non_blank},
    state::AppState,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon is not valid yet")]
    NotStarted,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon usage limit has been reached")]
    UsageLimitReached,
    #[error("you have already used this coupon the maximum number of times")]
    PerUserLimitReached,
    #[error("minimum purchase of {required} is required for this coupon")]
    MinimumPurchaseNotMet { required: i64 },
}

impl From<CouponRejection> for AppError {
    fn from(rejection: CouponRejection) -> Self {
        AppError::BadRequest(rejection.to_string())
    }
}

/// Raw discount for a subtotal, before any eligibility checks.
pub fn compute_discount(
    discount_type: DiscountType,
    value: i64,
    max_discount: Option<i64>,
    subtotal: i64,
) -> i64 {
    if subtotal <= 0 || value <= 0 {
        return 0;
    }
    let raw = match discount_type {
        DiscountType::Percentage => {
            let pct = value.min(100) as i128;
            (subtotal as i128 * pct / 100) as i64
        }
        DiscountType::Fixed => value,
    };
    let capped = match max_discount {
        Some(max) if max >= 0 => raw.min(max),
        _ => raw,
    };
    capped.min(subtotal)
}

/// Check every eligibility rule in order and return the discount amount.
pub fn validate_coupon(
    coupon: &Model,
    subtotal: i64,
    user_usage_count: i64,
    now: DateTime<Utc>,
) -> Result<i64, CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if coupon.starts_at.is_some_and(|starts| now < starts) {
        return Err(CouponRejection::NotStarted);
    }
    if coupon.expires_at.is_some_and(|expires| now > expires) {
        return Err(CouponRejection::Expired);
    }
    if coupon
        .usage_limit
        .is_some_and(|limit| coupon.used_count >= limit)
    {
        return Err(CouponRejection::UsageLimitReached);
    }
    if coupon
        .per_user_limit
        .is_some_and(|limit| user_usage_count >= i64::from(limit))
    {
        return Err(CouponRejection::PerUserLimitReached);
    }
    if let Some(required) = coupon.min_purchase.filter(|min| subtotal < *min) {
        return Err(CouponRejection::MinimumPurchaseNotMet { required });
    }

    Ok(compute_discount(
        coupon.discount_type,
        coupon.discount_value,
        coupon.max_discount,
        subtotal,
    ))
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn validate_code(code: &str) -> AppResult<()> {
    let len_ok = (3..=32).contains(&code.len());
    let chars_ok = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !len_ok || !chars_ok {
        return Err(AppError::Validation(
            "code must be 3-32 characters of letters, digits, '-' or '_'".into(),
        ));
    }
    Ok(())
}

/// Discount terms shared by create and update.
#[derive(Debug, Clone, Copy)]
struct CouponTerms {
    discount_type: DiscountType,
    discount_value: i64,
    max_discount: Option<i64>,
    min_purchase: Option<i64>,
    usage_limit: Option<i32>,
    per_user_limit: Option<i32>,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl CouponTerms {
    fn validate(&self) -> AppResult<()> {
        match self.discount_type {
            DiscountType::Percentage if !(1..=100).contains(&self.discount_value) => {
                return Err(AppError::Validation(
                    "percentage discount must be between 1 and 100".into(),
                ));
            }
            DiscountType::Fixed if self.discount_value <= 0 => {
                return Err(AppError::Validation(
                    "fixed discount must be greater than 0".into(),
                ));
            }
            _ => {}
        }
        if self.max_discount.is_some_and(|v| v <= 0) {
            return Err(AppError::Validation("max_discount must be greater than 0".into()));
        }
        if self.min_purchase.is_some_and(|v| v < 0) {
            return Err(AppError::Validation("min_purchase must not be negative".into()));
        }
        if self.usage_limit.is_some_and(|v| v <= 0) || self.per_user_limit.is_some_and(|v| v <= 0)
        {
            return Err(AppError::Validation("usage limits must be greater than 0".into()));
        }
        if let (Some(starts), Some(expires)) = (self.starts_at, self.expires_at) {
            if expires <= starts {
                return Err(AppError::Validation("expires_at must be after starts_at".into()));
            }
        }
        Ok(())
    }
}

pub async fn find_by_code<C: ConnectionTrait>(conn: &C, code: &str) -> AppResult<Model> {
    Coupons::find()
        .filter(CouponCol::Code.eq(normalize_code(code)))
        .one(conn)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn user_usage_count<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    user_id: Uuid,
) -> AppResult<i64> {
    let count = CouponUsages::find()
        .filter(UsageCol::CouponId.eq(coupon_id))
        .filter(UsageCol::UserId.eq(user_id))
        .count(conn)
        .await?;
    Ok(count as i64)
}

/// Lock the coupon row, re-check eligibility and compute the discount.
/// Must run inside the checkout transaction.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    user_id: Uuid,
    subtotal: i64,
) -> AppResult<(Model, i64)> {
    let coupon = Coupons::find()
        .filter(CouponCol::Code.eq(normalize_code(code)))
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::BadRequest("coupon code does not exist".into()))?;

    let usage = user_usage_count(conn, coupon.id, user_id).await?;
    let discount = validate_coupon(&coupon, subtotal, usage, Utc::now())?;
    Ok((coupon, discount))
}

/// Record that `coupon` was spent on `order_id`.
pub async fn record_usage<C: ConnectionTrait>(
    conn: &C,
    coupon_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    discount_amount: i64,
) -> AppResult<()> {
    UsageActive {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon_id),
        user_id: Set(user_id),
        order_id: Set(order_id),
        discount_amount: Set(discount_amount),
        created_at: NotSet,
    }
    .insert(conn)
    .await?;

    Coupons::update_many()
        .col_expr(CouponCol::UsedCount, Expr::col(CouponCol::UsedCount).add(1))
        .col_expr(CouponCol::UpdatedAt, Expr::current_timestamp().into())
        .filter(CouponCol::Id.eq(coupon_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Give back the usage recorded for a cancelled or rejected order.
pub async fn release_usage<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> AppResult<()> {
    let usages = CouponUsages::find()
        .filter(UsageCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for usage in usages {
        CouponUsages::delete_by_id(usage.id).exec(conn).await?;
        Coupons::update_many()
            .col_expr(
                CouponCol::UsedCount,
                Expr::cust("GREATEST(used_count - 1, 0)"),
            )
            .filter(CouponCol::Id.eq(usage.coupon_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

pub async fn validate_for_user(
    state: &AppState,
    user: &AuthUser,
    payload: ValidateCouponRequest,
) -> AppResult<ApiResponse<CouponValidation>> {
    let subtotal = match payload.subtotal {
        Some(subtotal) if subtotal < 0 => {
            return Err(AppError::Validation("subtotal must not be negative".into()));
        }
        Some(subtotal) => subtotal,
        None => cart_service::cart_subtotal(state, user).await?,
    };

    let coupon = find_by_code(&state.orm, &payload.code).await?;
    let usage = user_usage_count(&state.orm, coupon.id, user.user_id).await?;
    let discount_amount = validate_coupon(&coupon, subtotal, usage, Utc::now())?;

    Ok(ApiResponse::success(
        "Coupon is valid",
        CouponValidation {
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_amount,
            subtotal,
            total_after_discount: subtotal - discount_amount,
        },
        None,
    ))
}

pub async fn list_coupons(
    state: &AppState,
    user: &AuthUser,
    query: CouponListQuery,
) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.normalize();

    let mut finder = Coupons::find().order_by_desc(CouponCol::CreatedAt);
    if let Some(active) = query.active {
        finder = finder.filter(CouponCol::IsActive.eq(active));
    }
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Coupon::from)
        .collect();

    Ok(ApiResponse::success(
        "Coupons",
        CouponList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let coupon = Coupons::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Coupon", coupon.into(), None))
}

pub async fn create_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let code = normalize_code(&payload.code);
    validate_code(&code)?;
    CouponTerms {
        discount_type: payload.discount_type,
        discount_value: payload.discount_value,
        max_discount: payload.max_discount,
        min_purchase: payload.min_purchase,
        usage_limit: payload.usage_limit,
        per_user_limit: payload.per_user_limit,
        starts_at: payload.starts_at,
        expires_at: payload.expires_at,
    }
    .validate()?;

    let taken = Coupons::find()
        .filter(CouponCol::Code.eq(code.as_str()))
        .one(&state.orm)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!("coupon code {code} already exists")));
    }

    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        description: Set(non_blank(payload.description)),
        discount_type: Set(payload.discount_type),
        discount_value: Set(payload.discount_value),
        max_discount: Set(payload.max_discount),
        min_purchase: Set(payload.min_purchase),
        usage_limit: Set(payload.usage_limit),
        per_user_limit: Set(payload.per_user_limit),
        used_count: Set(0),
        starts_at: Set(payload.starts_at.map(Into::into)),
        expires_at: Set(payload.expires_at.map(Into::into)),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        state,
        Some(user.user_id),
        "coupon_create",
        "coupons",
        serde_json::json!({ "coupon_id": coupon.id, "code": coupon.code }),
    )
    .await;

    Ok(ApiResponse::success(
        "Coupon created",
        coupon.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(user)?;
    let existing = Coupons::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let terms = CouponTerms {
        discount_type: payload.discount_type.unwrap_or(existing.discount_type),
        discount_value: payload.discount_value.unwrap_or(existing.discount_value),
        max_discount: payload.max_discount.or(existing.max_discount),
        min_purchase: payload.min_purchase.or(existing.min_purchase),
        usage_limit: payload.usage_limit.or(existing.usage_limit),
        per_user_limit: payload.per_user_limit.or(existing.per_user_limit),
        starts_at: payload
            .starts_at
            .or(existing.starts_at.map(|dt| dt.with_timezone(&Utc))),
        expires_at: payload
            .expires_at
            .or(existing.expires_at.map(|dt| dt.with_timezone(&Utc))),
    };
    terms.validate()?;

    let mut active: CouponActive = existing.into();
    if payload.description.is_some() {
        active.description = Set(non_blank(payload.description));
    }
    active.discount_type = Set(terms.discount_type);
    active.discount_value = Set(terms.discount_value);
    active.max_discount = Set(terms.max_discount);
    active.min_purchase = Set(terms.min_purchase);
    active.usage_limit = Set(terms.usage_limit);
    active.per_user_limit = Set(terms.per_user_limit);
    active.starts_at = Set(terms.starts_at.map(Into::into));
    active.expires_at = Set(terms.expires_at.map(Into::into));
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());

    let coupon = active.update(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "coupon_update",
        "coupons",
        serde_json::json!({ "coupon_id": coupon.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        coupon.into(),
        Some(Meta::empty()),
    ))
}

/// Coupons that were already used are deactivated so order history keeps them.
pub async fn delete_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let coupon = Coupons::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let used = CouponUsages::find()
        .filter(UsageCol::CouponId.eq(id))
        .count(&state.orm)
        .await?;

    let deactivated = used > 0;
    if deactivated {
        let mut active: CouponActive = coupon.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().into());
        active.update(&state.orm).await?;
    } else {
        Coupons::delete_by_id(id).exec(&state.orm).await?;
    }

    audit::record(
        state,
        Some(user.user_id),
        "coupon_delete",
        "coupons",
        serde_json::json!({ "coupon_id": id, "deactivated": deactivated }),
    )
    .await;

    Ok(ApiResponse::success(
        if deactivated { "Deactivated" } else { "Deleted" },
        serde_json::json!({ "deactivated": deactivated }),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: i64) -> Model {
        let now = Utc::now().into();
        Model {
            id: Uuid::new_v4(),
            code: "PRINT10".into(),
            description: None,
            discount_type,
            discount_value: value,
            max_discount: None,
            min_purchase: None,
            usage_limit: None,
            per_user_limit: None,
            used_count: 0,
            starts_at: None,
            expires_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percentage_discount_rounds_down() {
        let c = coupon(DiscountType::Percentage, 15);
        assert_eq!(validate_coupon(&c, 9_999, 0, Utc::now()), Ok(1_499));
    }

    #[test]
    fn percentage_discount_is_capped_by_max() {
        let c = Model {
            max_discount: Some(5_000),
            ..coupon(DiscountType::Percentage, 50)
        };
        assert_eq!(validate_coupon(&c, 40_000, 0, Utc::now()), Ok(5_000));
        assert_eq!(validate_coupon(&c, 6_000, 0, Utc::now()), Ok(3_000));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let c = coupon(DiscountType::Fixed, 20_000);
        assert_eq!(validate_coupon(&c, 15_000, 0, Utc::now()), Ok(15_000));
        assert_eq!(validate_coupon(&c, 50_000, 0, Utc::now()), Ok(20_000));
    }

    #[test]
    fn inactive_coupon_is_rejected_first() {
        let c = Model {
            is_active: false,
            used_count: 10,
            usage_limit: Some(1),
            ..coupon(DiscountType::Fixed, 100)
        };
        assert_eq!(
            validate_coupon(&c, 1_000, 0, Utc::now()),
            Err(CouponRejection::Inactive)
        );
    }

    #[test]
    fn validity_window_is_enforced() {
        let now = Utc::now();
        let not_started = Model {
            starts_at: Some((now + Duration::hours(1)).into()),
            ..coupon(DiscountType::Fixed, 100)
        };
        assert_eq!(
            validate_coupon(&not_started, 1_000, 0, now),
            Err(CouponRejection::NotStarted)
        );

        let expired = Model {
            expires_at: Some((now - Duration::seconds(1)).into()),
            ..coupon(DiscountType::Fixed, 100)
        };
        assert_eq!(
            validate_coupon(&expired, 1_000, 0, now),
            Err(CouponRejection::Expired)
        );

        let open = Model {
            starts_at: Some((now - Duration::days(1)).into()),
            expires_at: Some((now + Duration::days(1)).into()),
            ..coupon(DiscountType::Fixed, 100)
        };
        assert_eq!(validate_coupon(&open, 1_000, 0, now), Ok(100));
    }

    #[test]
    fn usage_limits_are_enforced() {
        let global = Model {
            usage_limit: Some(3),
            used_count: 3,
            ..coupon(DiscountType::Fixed, 100)
        };
        assert_eq!(
            validate_coupon(&global, 1_000, 0, Utc::now()),
            Err(CouponRejection::UsageLimitReached)
        );

        let per_user = Model {
            per_user_limit: Some(1),
            ..coupon(DiscountType::Fixed, 100)
        };
        assert_eq!(validate_coupon(&per_user, 1_000, 0, Utc::now()), Ok(100));
        assert_eq!(
            validate_coupon(&per_user, 1_000, 1, Utc::now()),
            Err(CouponRejection::PerUserLimitReached)
        );
    }

    #[test]
    fn minimum_purchase_is_enforced() {
        let c = Model {
            min_purchase: Some(50_000),
            ..coupon(DiscountType::Percentage, 10)
        };
        assert_eq!(
            validate_coupon(&c, 49_999, 0, Utc::now()),
            Err(CouponRejection::MinimumPurchaseNotMet { required: 50_000 })
        );
        assert_eq!(validate_coupon(&c, 50_000, 0, Utc::now()), Ok(5_000));
    }

    #[test]
    fn empty_subtotal_gets_no_discount() {
        assert_eq!(compute_discount(DiscountType::Fixed, 500, None, 0), 0);
        assert_eq!(compute_discount(DiscountType::Percentage, 10, None, 0), 0);
    }

    #[test]
    fn codes_are_normalized_and_checked() {
        assert_eq!(normalize_code("  summer-10 "), "SUMMER-10");
        assert!(validate_code("SUMMER-10").is_ok());
        assert!(validate_code("AB").is_err());
        assert!(validate_code("NO SPACES").is_err());
    }

    #[test]
    fn terms_are_validated() {
        let base = CouponTerms {
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            max_discount: None,
            min_purchase: None,
            usage_limit: None,
            per_user_limit: None,
            starts_at: None,
            expires_at: None,
        };
        assert!(base.validate().is_ok());
        assert!(CouponTerms { discount_value: 0, ..base }.validate().is_err());
        assert!(CouponTerms { discount_value: 101, ..base }.validate().is_err());
        assert!(
            CouponTerms {
                discount_type: DiscountType::Fixed,
                discount_value: 0,
                ..base
            }
            .validate()
            .is_err()
        );
        assert!(CouponTerms { usage_limit: Some(0), ..base }.validate().is_err());

        let now = Utc::now();
        assert!(
            CouponTerms {
                starts_at: Some(now),
                expires_at: Some(now),
                ..base
            }
            .validate()
            .is_err()
        );
        assert!(
            CouponTerms {
                max_discount: Some(50),
                min_purchase: Some(0),
                starts_at: Some(now),
                expires_at: Some(now + Duration::days(7)),
                ..base
            }
            .validate()
            .is_ok()
        );
    }
}
