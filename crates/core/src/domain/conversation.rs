use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One entry in a session's conversation history. The sequence is
/// append-only and totally ordered by `created_at`; truncation removes
/// whole entries from the oldest end only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl TurnMessage {
    pub fn now(role: TurnRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), created_at: Utc::now() }
    }
}

/// Aggregated per-session usage accounting. Every field only ever grows
/// until an explicit session reset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_messages: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
    pub tools_used: u64,
    pub elapsed_secs: f64,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::{TurnRole, UsageStats};

    #[test]
    fn total_tokens_sums_prompt_and_completion() {
        let stats = UsageStats { prompt_tokens: 120, completion_tokens: 30, ..Default::default() };
        assert_eq!(stats.total_tokens(), 150);
    }

    #[test]
    fn roles_serialize_snake_case() {
        assert_eq!(TurnRole::Assistant.as_str(), "assistant");
        let json = serde_json::to_string(&TurnRole::Tool).expect("serialize role");
        assert_eq!(json, "\"tool\"");
    }
}
