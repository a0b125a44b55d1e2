use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;

/// Append-only record of a customer showing interest in a product,
/// written when a pricing or availability lookup resolves for an
/// identified customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestEvent {
    pub id: i64,
    pub customer_id: CustomerId,
    pub product: String,
    pub quoted_price: Option<Decimal>,
    pub quoted_days: Option<u32>,
    pub created_at: DateTime<Utc>,
}
