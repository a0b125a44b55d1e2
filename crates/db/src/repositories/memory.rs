use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use renta_core::domain::customer::{Customer, CustomerId};
use renta_core::domain::interest::InterestEvent;

use super::dashboard::{DashboardSummary, HotLead, ProductCount, RecentCustomer};
use super::{
    ConversationLogRepository, CustomerRepository, DashboardReader, InterestRepository,
    RepositoryError,
};

#[derive(Clone, Debug)]
struct LoggedTurn {
    customer_id: CustomerId,
    user_message: String,
    assistant_reply: String,
}

/// Whole-CRM test double mirroring the SQL repositories' behavior,
/// including case-insensitive name upserts and the FK check on interest
/// events. `fail_writes` lets orchestrator tests exercise the
/// persistence-failure path.
#[derive(Default)]
pub struct InMemoryCrm {
    customers: RwLock<HashMap<i64, Customer>>,
    events: RwLock<Vec<InterestEvent>>,
    log: RwLock<Vec<LoggedTurn>>,
    next_customer_id: RwLock<i64>,
    fail_writes: AtomicBool,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Decode("injected write failure".to_string()));
        }
        Ok(())
    }

    pub async fn customer_count(&self) -> usize {
        self.customers.read().await.len()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn logged_turn_count(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn find_customer_by_name(&self, name: &str) -> Option<Customer> {
        let needle = name.trim().to_lowercase();
        self.customers
            .read()
            .await
            .values()
            .find(|customer| customer.name.to_lowercase() == needle)
            .cloned()
    }
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryCrm {
    async fn upsert_by_name(&self, name: &str) -> Result<Customer, RepositoryError> {
        self.check_writable()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::Decode("customer name must not be empty".to_string()));
        }

        let mut customers = self.customers.write().await;
        let needle = name.to_lowercase();
        if let Some(existing) =
            customers.values_mut().find(|customer| customer.name.to_lowercase() == needle)
        {
            existing.last_contact = Utc::now();
            existing.total_inquiries += 1;
            return Ok(existing.clone());
        }

        let mut next_id = self.next_customer_id.write().await;
        *next_id += 1;
        let now = Utc::now();
        let customer = Customer {
            id: CustomerId(*next_id),
            name: name.to_string(),
            first_contact: now,
            last_contact: now,
            total_inquiries: 1,
        };
        customers.insert(*next_id, customer.clone());
        Ok(customer)
    }

    async fn find_by_id(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.customers.read().await.get(&id.0).cloned())
    }
}

#[async_trait::async_trait]
impl InterestRepository for InMemoryCrm {
    async fn record(
        &self,
        customer_id: CustomerId,
        product: &str,
        quoted_price: Option<Decimal>,
        quoted_days: Option<u32>,
    ) -> Result<InterestEvent, RepositoryError> {
        self.check_writable()?;
        if self.customers.read().await.get(&customer_id.0).is_none() {
            return Err(RepositoryError::Decode(format!(
                "interest event references unknown customer {customer_id}"
            )));
        }

        let mut events = self.events.write().await;
        let event = InterestEvent {
            id: events.len() as i64 + 1,
            customer_id,
            product: product.to_string(),
            quoted_price,
            quoted_days,
            created_at: Utc::now(),
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn list_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<InterestEvent>, RepositoryError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|event| event.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ConversationLogRepository for InMemoryCrm {
    async fn append(
        &self,
        customer_id: CustomerId,
        user_message: &str,
        assistant_reply: &str,
        _tokens_used: i64,
        _cost_usd: f64,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        self.log.write().await.push(LoggedTurn {
            customer_id,
            user_message: user_message.to_string(),
            assistant_reply: assistant_reply.to_string(),
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl DashboardReader for InMemoryCrm {
    async fn summary(&self) -> Result<DashboardSummary, RepositoryError> {
        let customers = self.customers.read().await;
        let events = self.events.read().await;

        let cutoff = Utc::now() - Duration::days(1);
        let mut product_counts: HashMap<String, i64> = HashMap::new();
        for event in events.iter() {
            *product_counts.entry(event.product.clone()).or_default() += 1;
        }
        let mut top_products: Vec<ProductCount> = product_counts
            .into_iter()
            .map(|(product, inquiries)| ProductCount { product, inquiries })
            .collect();
        top_products
            .sort_by(|a, b| b.inquiries.cmp(&a.inquiries).then(a.product.cmp(&b.product)));
        top_products.truncate(5);

        let mut recent: Vec<&Customer> = customers.values().collect();
        recent.sort_by(|a, b| b.last_contact.cmp(&a.last_contact).then(b.id.0.cmp(&a.id.0)));

        let mut hot_leads: Vec<HotLead> = customers
            .values()
            .filter(|customer| customer.total_inquiries >= 3)
            .map(|customer| HotLead {
                name: customer.name.clone(),
                total_inquiries: customer.total_inquiries,
            })
            .collect();
        hot_leads.sort_by(|a, b| b.total_inquiries.cmp(&a.total_inquiries).then(a.name.cmp(&b.name)));

        Ok(DashboardSummary {
            total_customers: customers.len() as i64,
            new_customers_24h: customers
                .values()
                .filter(|customer| customer.first_contact >= cutoff)
                .count() as i64,
            total_interest_events: events.len() as i64,
            top_products,
            recent_customers: recent
                .into_iter()
                .take(5)
                .map(|customer| RecentCustomer {
                    name: customer.name.clone(),
                    total_inquiries: customer.total_inquiries,
                    last_contact: customer.last_contact,
                })
                .collect(),
            hot_leads,
        })
    }
}
