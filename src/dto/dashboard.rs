use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderStatus};

#[derive(Debug, Deserialize, ToSchema)]
pub struct DashboardQuery {
    /// Length of the sales window in days, default 30.
    pub days: Option<i64>,
}

impl DashboardQuery {
    pub fn window_days(&self) -> i64 {
        self.days.unwrap_or(30).clamp(1, 365)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopProduct {
    pub product_id: uuid::Uuid,
    pub product_name: String,
    pub quantity_sold: i64,
    pub revenue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SalesPoint {
    pub date: NaiveDate,
    pub orders: i64,
    pub revenue: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardTotals {
    pub users: i64,
    pub active_products: i64,
    pub orders: i64,
    pub revenue: i64,
    pub pending_review: i64,
    pub low_stock: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardOverview {
    pub totals: DashboardTotals,
    pub orders_by_status: Vec<StatusCount>,
    pub recent_orders: Vec<Order>,
    pub top_products: Vec<TopProduct>,
    pub sales: Vec<SalesPoint>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalesSeries {
    pub days: i64,
    pub points: Vec<SalesPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_clamped() {
        assert_eq!(DashboardQuery { days: None }.window_days(), 30);
        assert_eq!(DashboardQuery { days: Some(0) }.window_days(), 1);
        assert_eq!(DashboardQuery { days: Some(1000) }.window_days(), 365);
    }
}
