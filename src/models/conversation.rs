use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let now = Utc::now();
        let id = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_millis())
            .to_string();
        Self {
            id,
            role,
            content: content.into(),
            timestamp: now,
        }
    }
}

/// Where a conversation is within a single `generate_response` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingModel,
    ExecutingFunction,
    AwaitingModelFinal,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::AwaitingModel => "awaiting_model",
            AgentState::ExecutingFunction => "executing_function",
            AgentState::AwaitingModelFinal => "awaiting_model_final",
        }
    }
}
