use chrono::Utc;

use renta_core::domain::customer::CustomerId;

use super::{ConversationLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationLogRepository {
    pool: DbPool,
}

impl SqlConversationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationLogRepository for SqlConversationLogRepository {
    async fn append(
        &self,
        customer_id: CustomerId,
        user_message: &str,
        assistant_reply: &str,
        tokens_used: i64,
        cost_usd: f64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_log
                 (customer_id, user_message, assistant_reply, tokens_used, cost_usd, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(customer_id.0)
        .bind(user_message)
        .bind(assistant_reply)
        .bind(tokens_used)
        .bind(cost_usd)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
