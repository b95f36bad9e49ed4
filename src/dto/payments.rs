use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Payment, PaymentMethod};

#[derive(Debug, Deserialize, ToSchema)]
pub struct PayOrderRequest {
    pub method: PaymentMethod,
    /// Must equal the order total.
    pub amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentList {
    pub items: Vec<Payment>,
}
