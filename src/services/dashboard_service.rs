use std::collections::HashMap;

use chrono::{Days, NaiveDate, Utc};
use sea_orm::{
    ActiveEnum, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::{
    db::raw_pool,
    dto::dashboard::{
        DashboardOverview, DashboardQuery, DashboardTotals, SalesPoint, SalesSeries, StatusCount,
        TopProduct,
    },
    entity::{
        Orders, Products, Users,
        orders::Column as OrderCol,
        products::Column as ProdCol,
    },
    error::AppResult,
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus},
    response::{ApiResponse, Meta},
    state::AppState,
};

const RECENT_ORDERS: u64 = 5;
const TOP_PRODUCTS: i64 = 5;

#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    status: String,
    count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TopProductRow {
    product_id: uuid::Uuid,
    product_name: String,
    quantity_sold: i64,
    revenue: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DailyRow {
    day: NaiveDate,
    orders: i64,
    revenue: i64,
}

/// One point per day from `end - days + 1` through `end`, zero where no
/// sales were recorded.
pub fn fill_daily_series(rows: Vec<SalesPoint>, end: NaiveDate, days: i64) -> Vec<SalesPoint> {
    let by_day: HashMap<NaiveDate, SalesPoint> =
        rows.into_iter().map(|point| (point.date, point)).collect();
    let days = days.max(1) as u64;
    let start = end.checked_sub_days(Days::new(days - 1)).unwrap_or(end);

    start
        .iter_days()
        .take(days as usize)
        .map(|date| {
            by_day.get(&date).cloned().unwrap_or(SalesPoint {
                date,
                orders: 0,
                revenue: 0,
            })
        })
        .collect()
}

async fn count_users(state: &AppState) -> AppResult<i64> {
    Ok(Users::find().count(&state.orm).await? as i64)
}

async fn count_active_products(state: &AppState) -> AppResult<i64> {
    Ok(Products::find()
        .filter(ProdCol::IsActive.eq(true))
        .count(&state.orm)
        .await? as i64)
}

async fn count_orders(state: &AppState) -> AppResult<i64> {
    Ok(Orders::find().count(&state.orm).await? as i64)
}

async fn count_pending_review(state: &AppState) -> AppResult<i64> {
    Ok(Orders::find()
        .filter(OrderCol::Status.eq(OrderStatus::PendingReview))
        .count(&state.orm)
        .await? as i64)
}

async fn count_low_stock(state: &AppState) -> AppResult<i64> {
    Ok(Products::find()
        .filter(ProdCol::IsActive.eq(true))
        .filter(ProdCol::Stock.lte(state.config.low_stock_threshold))
        .count(&state.orm)
        .await? as i64)
}

/// Captured payments that were not refunded.
async fn total_revenue(state: &AppState) -> AppResult<i64> {
    let (revenue,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM payments WHERE status = 'CAPTURED'",
    )
    .fetch_one(raw_pool(&state.orm))
    .await?;
    Ok(revenue)
}

async fn orders_by_status(state: &AppState) -> AppResult<Vec<StatusCount>> {
    let rows = sqlx::query_as::<_, StatusRow>(
        r#"
        SELECT status, COUNT(*)::BIGINT AS count
        FROM orders
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(raw_pool(&state.orm))
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match OrderStatus::try_from_value(&row.status) {
            Ok(status) => Some(StatusCount {
                status,
                count: row.count,
            }),
            Err(_) => {
                tracing::warn!(status = %row.status, "unknown order status in database");
                None
            }
        })
        .collect())
}

async fn recent_orders(state: &AppState) -> AppResult<Vec<Order>> {
    Ok(Orders::find()
        .order_by_desc(OrderCol::CreatedAt)
        .limit(RECENT_ORDERS)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

async fn top_products(state: &AppState) -> AppResult<Vec<TopProduct>> {
    let rows = sqlx::query_as::<_, TopProductRow>(
        r#"
        SELECT oi.product_id,
               MAX(oi.product_name) AS product_name,
               SUM(oi.quantity)::BIGINT AS quantity_sold,
               SUM(oi.line_total)::BIGINT AS revenue
        FROM order_items oi
        JOIN orders o ON o.id = oi.order_id
        WHERE o.status NOT IN ('CANCELLED', 'REJECTED')
        GROUP BY oi.product_id
        ORDER BY quantity_sold DESC, revenue DESC
        LIMIT $1
        "#,
    )
    .bind(TOP_PRODUCTS)
    .fetch_all(raw_pool(&state.orm))
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TopProduct {
            product_id: row.product_id,
            product_name: row.product_name,
            quantity_sold: row.quantity_sold,
            revenue: row.revenue,
        })
        .collect())
}

async fn daily_sales(state: &AppState, days: i64) -> AppResult<Vec<SalesPoint>> {
    let today = Utc::now().date_naive();
    let start = today
        .checked_sub_days(Days::new((days - 1) as u64))
        .unwrap_or(today);

    let rows = sqlx::query_as::<_, DailyRow>(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::date AS day,
               COUNT(*)::BIGINT AS orders,
               COALESCE(SUM(total_amount), 0)::BIGINT AS revenue
        FROM orders
        WHERE (created_at AT TIME ZONE 'UTC')::date >= $1
          AND status NOT IN ('CANCELLED', 'REJECTED')
        GROUP BY day
        ORDER BY day
        "#,
    )
    .bind(start)
    .fetch_all(raw_pool(&state.orm))
    .await?;

    let points = rows
        .into_iter()
        .map(|row| SalesPoint {
            date: row.day,
            orders: row.orders,
            revenue: row.revenue,
        })
        .collect();
    Ok(fill_daily_series(points, today, days))
}

pub async fn overview(
    state: &AppState,
    user: &AuthUser,
    query: DashboardQuery,
) -> AppResult<ApiResponse<DashboardOverview>> {
    ensure_admin(user)?;
    let days = query.window_days();

    let (
        users,
        active_products,
        orders,
        revenue,
        pending_review,
        low_stock,
        orders_by_status,
        recent_orders,
        top_products,
        sales,
    ) = tokio::try_join!(
        count_users(state),
        count_active_products(state),
        count_orders(state),
        total_revenue(state),
        count_pending_review(state),
        count_low_stock(state),
        orders_by_status(state),
        recent_orders(state),
        top_products(state),
        daily_sales(state, days),
    )?;

    Ok(ApiResponse::success(
        "OK",
        DashboardOverview {
            totals: DashboardTotals {
                users,
                active_products,
                orders,
                revenue,
                pending_review,
                low_stock,
            },
            orders_by_status,
            recent_orders,
            top_products,
            sales,
        },
        Some(Meta::empty()),
    ))
}

pub async fn sales(
    state: &AppState,
    user: &AuthUser,
    query: DashboardQuery,
) -> AppResult<ApiResponse<SalesSeries>> {
    ensure_admin(user)?;
    let days = query.window_days();
    let points = daily_sales(state, days).await?;
    Ok(ApiResponse::success(
        "OK",
        SalesSeries { days, points },
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn series_is_zero_filled_and_ordered() {
        let rows = vec![
            SalesPoint {
                date: day(2024, 2, 28),
                orders: 2,
                revenue: 5_000,
            },
            SalesPoint {
                date: day(2024, 3, 1),
                orders: 1,
                revenue: 1_200,
            },
        ];
        let series = fill_daily_series(rows, day(2024, 3, 1), 4);
        let dates: Vec<_> = series.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![day(2024, 2, 27), day(2024, 2, 28), day(2024, 2, 29), day(2024, 3, 1)]
        );
        assert_eq!(series[0].orders, 0);
        assert_eq!(series[1].revenue, 5_000);
        assert_eq!(series[2].revenue, 0);
        assert_eq!(series[3].orders, 1);
    }

    #[test]
    fn rows_outside_window_are_dropped() {
        let rows = vec![SalesPoint {
            date: day(2024, 1, 1),
            orders: 9,
            revenue: 9,
        }];
        let series = fill_daily_series(rows, day(2024, 1, 10), 1);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].orders, 0);
    }
}
