use chrono::Utc;

use renta_core::domain::customer::{Customer, CustomerId};

use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: i64,
    name: String,
    first_contact: chrono::DateTime<Utc>,
    last_contact: chrono::DateTime<Utc>,
    total_inquiries: i64,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Self {
            id: CustomerId(row.id),
            name: row.name,
            first_contact: row.first_contact,
            last_contact: row.last_contact,
            total_inquiries: row.total_inquiries,
        }
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn upsert_by_name(&self, name: &str) -> Result<Customer, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::Decode("customer name must not be empty".to_string()));
        }

        let now = Utc::now();
        let row = sqlx::query_as::<_, CustomerRow>(
            "INSERT INTO customers (name, first_contact, last_contact, total_inquiries)
             VALUES (?1, ?2, ?2, 1)
             ON CONFLICT(name) DO UPDATE SET
                 last_contact = excluded.last_contact,
                 total_inquiries = customers.total_inquiries + 1
             RETURNING id, name, first_contact, last_contact, total_inquiries",
        )
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, name, first_contact, last_contact, total_inquiries
             FROM customers WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Customer::from))
    }
}
