//! Per-session conversation state.
//!
//! The registry lock only guards the map of handles; every session sits
//! behind its own `Arc<Mutex>` so turns for one session run in arrival
//! order while different sessions proceed fully in parallel. The registry
//! lock is never held across I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use renta_core::domain::conversation::{TurnMessage, TurnRole, UsageStats};
use renta_core::domain::customer::CustomerId;
use renta_core::errors::TurnError;

/// CRM identity resolved for this session, set once the caller discloses
/// a name. Survives a history reset; cleared only by a full new-session
/// request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveCustomer {
    pub id: CustomerId,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<TurnMessage>,
    pub stats: UsageStats,
    pub customer: Option<ActiveCustomer>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            messages: Vec::new(),
            stats: UsageStats::default(),
            customer: None,
            created_at: Utc::now(),
        }
    }

    pub fn append(&mut self, role: TurnRole, content: impl Into<String>) {
        self.messages.push(TurnMessage::now(role, content));
    }

    /// Drops whole messages from the oldest end until the history fits the
    /// cap, then keeps dropping while the head is an assistant message so
    /// the surviving prefix never opens mid-exchange.
    pub fn truncate_oldest(&mut self, max_messages: usize) {
        let excess = self.messages.len().saturating_sub(max_messages);
        self.messages.drain(..excess);
        while matches!(self.messages.first(), Some(message) if message.role == TurnRole::Assistant)
        {
            self.messages.remove(0);
        }
    }

    /// Clears history and counters but keeps the resolved customer.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.stats = UsageStats::default();
    }

    /// Full reset: history, counters, and customer identity.
    pub fn reset_full(&mut self) {
        self.reset();
        self.customer = None;
    }

    pub fn customer_name(&self) -> Option<String> {
        self.customer.as_ref().map(|customer| customer.name.clone())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            total_messages: self.stats.total_messages,
            prompt_tokens: self.stats.prompt_tokens,
            completion_tokens: self.stats.completion_tokens,
            total_tokens: self.stats.total_tokens(),
            estimated_cost_usd: self.stats.estimated_cost_usd,
            tools_used: self.stats.tools_used,
            elapsed_secs: self.stats.elapsed_secs,
            customer_name: self.customer_name(),
        }
    }
}

/// Read-only usage summary handed to the stats endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub total_messages: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub tools_used: u64,
    pub elapsed_secs: f64,
    pub customer_name: Option<String>,
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory session registry, injected into the orchestrator at startup.
/// Lifecycle is tied to the session id, not the process: sessions live
/// until an explicit delete (or restart, which is documented to drop
/// in-memory state).
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    max_messages: usize,
}

impl SessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), max_messages: max_messages.max(2) }
    }

    /// History cap in messages; truncation happens at turn commit.
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Chat auto-creates sessions; the handle is the per-session lock the
    /// orchestrator holds for the duration of a turn.
    pub async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(session_id))))
            .clone()
    }

    async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Clears history and stats, keeping the customer identity. Returns
    /// the retained customer name.
    pub async fn reset(&self, session_id: &str) -> Result<Option<String>, TurnError> {
        let handle = self
            .get(session_id)
            .await
            .ok_or_else(|| TurnError::SessionNotFound(session_id.to_string()))?;
        let mut session = handle.lock().await;
        session.reset();
        Ok(session.customer_name())
    }

    /// Starts a completely fresh session under `session_id`, creating it
    /// if absent and dropping any resolved customer if present.
    pub async fn new_session(&self, session_id: &str) {
        let handle = self.get_or_create(session_id).await;
        handle.lock().await.reset_full();
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), TurnError> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| TurnError::SessionNotFound(session_id.to_string()))
    }

    /// Unknown ids are an error, never a default-zero summary.
    pub async fn stats(&self, session_id: &str) -> Result<SessionSnapshot, TurnError> {
        let handle = self
            .get(session_id)
            .await
            .ok_or_else(|| TurnError::SessionNotFound(session_id.to_string()))?;
        let session = handle.lock().await;
        Ok(session.snapshot())
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
