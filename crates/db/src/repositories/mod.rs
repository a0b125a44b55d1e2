use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use renta_core::domain::customer::{Customer, CustomerId};
use renta_core::domain::interest::InterestEvent;

pub mod conversation_log;
pub mod customer;
pub mod dashboard;
pub mod interest;
pub mod memory;

pub use conversation_log::SqlConversationLogRepository;
pub use customer::SqlCustomerRepository;
pub use dashboard::{
    DashboardSummary, HotLead, ProductCount, RecentCustomer, SqlDashboardReader,
};
pub use interest::SqlInterestRepository;
pub use memory::InMemoryCrm;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Creates the customer on first contact or, when the name already
    /// exists (case-insensitive), bumps `last_contact` and the inquiry
    /// counter. Single statement, so concurrent upserts for the same name
    /// serialize in the store without lost updates.
    async fn upsert_by_name(&self, name: &str) -> Result<Customer, RepositoryError>;

    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError>;
}

#[async_trait]
pub trait InterestRepository: Send + Sync {
    async fn record(
        &self,
        customer_id: CustomerId,
        product: &str,
        quoted_price: Option<Decimal>,
        quoted_days: Option<u32>,
    ) -> Result<InterestEvent, RepositoryError>;

    async fn list_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InterestEvent>, RepositoryError>;
}

#[async_trait]
pub trait ConversationLogRepository: Send + Sync {
    async fn append(
        &self,
        customer_id: CustomerId,
        user_message: &str,
        assistant_reply: &str,
        tokens_used: i64,
        cost_usd: f64,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DashboardReader: Send + Sync {
    async fn summary(&self) -> Result<dashboard::DashboardSummary, RepositoryError>;
}
