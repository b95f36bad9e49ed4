use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::OrderStatus;

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Query strings that carry `page` / `per_page`.
///
/// Query structs list the two fields directly instead of flattening
/// [`Pagination`], because flattened numbers do not survive url decoding.
pub trait Paginated {
    fn page(&self) -> Option<i64>;
    fn per_page(&self) -> Option<i64>;

    /// `(page, per_page, offset)` with page ≥ 1 and per_page in 1..=100.
    fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page().unwrap_or(1).max(1);
        let per_page = self.per_page().unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

#[macro_export]
macro_rules! impl_paginated {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::routes::params::Paginated for $ty {
                fn page(&self) -> Option<i64> {
                    self.page
                }

                fn per_page(&self) -> Option<i64> {
                    self.per_page
                }
            }
        )+
    };
}

crate::impl_paginated!(Pagination, ProductQuery, OrderListQuery);

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductSortBy {
    CreatedAt,
    Price,
    Name,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProductQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub q: Option<String>,
    pub category_id: Option<Uuid>,
    /// Category slug.
    pub category: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort_by: Option<ProductSortBy>,
    pub sort_order: Option<SortOrder>,
    /// Honoured for admins only.
    pub include_inactive: Option<bool>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<OrderStatus>,
    pub sort_order: Option<SortOrder>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page() {
        assert_eq!(Pagination::default().normalize(), (1, 20, 0));
    }

    #[test]
    fn clamps_out_of_range_values() {
        let p = Pagination {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(p.normalize(), (1, 100, 0));

        let p = Pagination {
            page: Some(3),
            per_page: Some(0),
        };
        assert_eq!(p.normalize(), (3, 1, 2));
    }

    #[test]
    fn offset_follows_page() {
        let q = OrderListQuery {
            page: Some(4),
            per_page: Some(25),
            ..Default::default()
        };
        assert_eq!(q.normalize(), (4, 25, 75));
    }
}
