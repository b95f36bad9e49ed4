use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::reviews::{CreateReviewRequest, ReviewList},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::Entity as Products,
        reviews::{ActiveModel as ReviewActive, Column as ReviewCol, Entity as Reviews},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{OrderStatus, Review},
    response::{ApiResponse, Meta},
    routes::params::{Paginated, Pagination},
    services::non_blank,
    state::AppState,
};

pub const MAX_COMMENT_LEN: usize = 2000;

fn check_review(payload: &CreateReviewRequest) -> AppResult<()> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::Validation("rating must be between 1 and 5".into()));
    }
    if payload
        .comment
        .as_deref()
        .is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN)
    {
        return Err(AppError::Validation(format!(
            "comment must be at most {MAX_COMMENT_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn list_reviews(
    state: &AppState,
    product_id: Uuid,
    query: Pagination,
) -> AppResult<ApiResponse<ReviewList>> {
    Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let (page, limit, offset) = query.normalize();
    let finder = Reviews::find()
        .filter(ReviewCol::ProductId.eq(product_id))
        .order_by_desc(ReviewCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items: Vec<Review> = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        ReviewList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn create_review(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    payload: CreateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    check_review(&payload)?;

    Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let delivered = OrderItems::find()
        .inner_join(Orders)
        .filter(OrderItemCol::ProductId.eq(product_id))
        .filter(OrderCol::UserId.eq(user.user_id))
        .filter(OrderCol::Status.eq(OrderStatus::Delivered))
        .count(&state.orm)
        .await?;
    if delivered == 0 {
        return Err(AppError::Forbidden);
    }

    let exist = Reviews::find()
        .filter(ReviewCol::ProductId.eq(product_id))
        .filter(ReviewCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?;
    if exist.is_some() {
        return Err(AppError::Conflict(
            "you have already reviewed this product".into(),
        ));
    }

    let review = ReviewActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        user_id: Set(user.user_id),
        rating: Set(payload.rating),
        comment: Set(non_blank(payload.comment)),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        state,
        Some(user.user_id),
        "review_created",
        "reviews",
        serde_json::json!({ "review_id": review.id, "product_id": product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Review created",
        review.into(),
        Some(Meta::empty()),
    ))
}

pub async fn delete_review(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let review = Reviews::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if review.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    Reviews::delete_by_id(review.id).exec(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "review_deleted",
        "reviews",
        serde_json::json!({ "review_id": review.id, "product_id": review.product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Review deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rating: i16, comment: Option<&str>) -> CreateReviewRequest {
        CreateReviewRequest {
            rating,
            comment: comment.map(String::from),
        }
    }

    #[test]
    fn rating_range() {
        assert!(check_review(&request(0, None)).is_err());
        assert!(check_review(&request(6, None)).is_err());
        for rating in 1..=5 {
            assert!(check_review(&request(rating, Some("great print"))).is_ok());
        }
    }

    #[test]
    fn long_comments_are_rejected() {
        let comment = "x".repeat(MAX_COMMENT_LEN + 1);
        assert!(matches!(
            check_review(&request(4, Some(&comment))),
            Err(AppError::Validation(_))
        ));
    }
}
