use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use renta_core::domain::customer::CustomerId;
use renta_core::domain::interest::InterestEvent;

use super::{InterestRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInterestRepository {
    pool: DbPool,
}

impl SqlInterestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// quoted_price travels as TEXT so Decimal round-trips without loss.
#[derive(sqlx::FromRow)]
struct InterestRow {
    id: i64,
    customer_id: i64,
    product: String,
    quoted_price: Option<String>,
    quoted_days: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<InterestRow> for InterestEvent {
    type Error = RepositoryError;

    fn try_from(row: InterestRow) -> Result<Self, Self::Error> {
        let quoted_price = row
            .quoted_price
            .map(|raw| {
                Decimal::from_str(&raw).map_err(|error| {
                    RepositoryError::Decode(format!("quoted_price `{raw}`: {error}"))
                })
            })
            .transpose()?;

        Ok(Self {
            id: row.id,
            customer_id: CustomerId(row.customer_id),
            product: row.product,
            quoted_price,
            quoted_days: row.quoted_days.map(|days| days as u32),
            created_at: row.created_at,
        })
    }
}

#[async_trait::async_trait]
impl InterestRepository for SqlInterestRepository {
    async fn record(
        &self,
        customer_id: CustomerId,
        product: &str,
        quoted_price: Option<Decimal>,
        quoted_days: Option<u32>,
    ) -> Result<InterestEvent, RepositoryError> {
        let row = sqlx::query_as::<_, InterestRow>(
            "INSERT INTO interest_events (customer_id, product, quoted_price, quoted_days, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, customer_id, product, quoted_price, quoted_days, created_at",
        )
        .bind(customer_id.0)
        .bind(product)
        .bind(quoted_price.map(|price| price.to_string()))
        .bind(quoted_days.map(i64::from))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InterestEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, InterestRow>(
            "SELECT id, customer_id, product, quoted_price, quoted_days, created_at
             FROM interest_events WHERE customer_id = ?1 ORDER BY id",
        )
        .bind(customer_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InterestEvent::try_from).collect()
    }
}
