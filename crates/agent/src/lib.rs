pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod tools;

pub use llm::{
    ChatMessage, ChatModel, ChatModelConfig, LlmError, ModelTurn, OpenAiChatModel, RawToolCall,
    ScriptedChatModel, TokenUsage, ToolSpec,
};
pub use orchestrator::{Dependencies, Orchestrator, OrchestratorConfig, TurnOutcome, TurnPhase};
pub use session::{ActiveCustomer, Session, SessionHandle, SessionSnapshot, SessionStore};
pub use tools::{ToolInvocation, ToolParseError};
