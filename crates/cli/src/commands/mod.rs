pub mod doctor;
pub mod migrate;
pub mod reindex;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Machine-readable envelope every subcommand prints: scripts key off
/// `status` and `error_class`, humans read `message`, and commands with
/// extra structure (reindex) attach it under `details`.
#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &'static str, message: impl Into<String>) -> Self {
        Self::render(
            CommandOutcome {
                command,
                status: "ok",
                error_class: None,
                message: message.into(),
                details: None,
            },
            0,
        )
    }

    pub fn success_with_details(
        command: &'static str,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self::render(
            CommandOutcome {
                command,
                status: "ok",
                error_class: None,
                message: message.into(),
                details: Some(details),
            },
            0,
        )
    }

    pub fn failure(
        command: &'static str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::render(
            CommandOutcome {
                command,
                status: "error",
                error_class: Some(error_class.to_string()),
                message: message.into(),
                details: None,
            },
            exit_code,
        )
    }

    fn render(payload: CommandOutcome, exit_code: u8) -> Self {
        let output = serde_json::to_string(&payload).unwrap_or_else(|error| {
            format!(
                "{{\"command\":\"{}\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
                payload.command,
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
        Self { exit_code, output }
    }
}
