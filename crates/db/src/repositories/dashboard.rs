use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{DashboardReader, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductCount {
    pub product: String,
    pub inquiries: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecentCustomer {
    pub name: String,
    pub total_inquiries: i64,
    pub last_contact: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HotLead {
    pub name: String,
    pub total_inquiries: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_customers: i64,
    pub new_customers_24h: i64,
    pub total_interest_events: i64,
    pub top_products: Vec<ProductCount>,
    pub recent_customers: Vec<RecentCustomer>,
    pub hot_leads: Vec<HotLead>,
}

/// A lead is "hot" once it has asked this many times.
const HOT_LEAD_THRESHOLD: i64 = 3;
const TOP_LIMIT: i64 = 5;

pub struct SqlDashboardReader {
    pool: DbPool,
}

impl SqlDashboardReader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DashboardReader for SqlDashboardReader {
    async fn summary(&self) -> Result<DashboardSummary, RepositoryError> {
        let (total_customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM customers")
            .fetch_one(&self.pool)
            .await?;

        let cutoff = Utc::now() - Duration::days(1);
        let (new_customers_24h,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM customers WHERE first_contact >= ?1")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;

        let (total_interest_events,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM interest_events").fetch_one(&self.pool).await?;

        let top_products = sqlx::query_as::<_, (String, i64)>(
            "SELECT product, COUNT(*) AS inquiries
             FROM interest_events
             GROUP BY product
             ORDER BY inquiries DESC, product ASC
             LIMIT ?1",
        )
        .bind(TOP_LIMIT)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(product, inquiries)| ProductCount { product, inquiries })
        .collect();

        let recent_customers = sqlx::query_as::<_, (String, i64, DateTime<Utc>)>(
            "SELECT name, total_inquiries, last_contact
             FROM customers
             ORDER BY last_contact DESC, id DESC
             LIMIT ?1",
        )
        .bind(TOP_LIMIT)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(name, total_inquiries, last_contact)| RecentCustomer {
            name,
            total_inquiries,
            last_contact,
        })
        .collect();

        let hot_leads = sqlx::query_as::<_, (String, i64)>(
            "SELECT name, total_inquiries
             FROM customers
             WHERE total_inquiries >= ?1
             ORDER BY total_inquiries DESC, name ASC",
        )
        .bind(HOT_LEAD_THRESHOLD)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(name, total_inquiries)| HotLead { name, total_inquiries })
        .collect();

        Ok(DashboardSummary {
            total_customers,
            new_customers_24h,
            total_interest_events,
            top_products,
            recent_customers,
            hot_leads,
        })
    }
}
