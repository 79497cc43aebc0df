pub mod fallback;
pub mod functions;
pub mod gemini;
pub mod guard;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ConversationTurn, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRole {
    User,
    Model,
    Function,
}

impl ContentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentRole::User => "user",
            ContentRole::Model => "model",
            ContentRole::Function => "function",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Base64 payload tagged with its media type.
    InlineData { mime_type: String, data: String },
    FunctionCall(FunctionCall),
    FunctionResponse { name: String, response: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: ContentRole::User,
            parts,
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            role: ContentRole::Model,
            parts: vec![Part::FunctionCall(call)],
        }
    }

    /// The `functionResponse{name, response:{name, content}}` turn that answers a call.
    pub fn function_response(name: &str, content: Value) -> Self {
        Self {
            role: ContentRole::Function,
            parts: vec![Part::FunctionResponse {
                name: name.to_string(),
                response: serde_json::json!({ "name": name, "content": content }),
            }],
        }
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

impl From<&ConversationTurn> for Content {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: match turn.role {
                Role::User => ContentRole::User,
                Role::Model => ContentRole::Model,
            },
            parts: vec![Part::Text(turn.content.clone())],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// One `generateContent` round trip. The whole conversation is sent every time.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system_instruction: &'a str,
    pub contents: &'a [Content],
    pub functions: &'a [FunctionDeclaration],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub function_call: Option<FunctionCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_call: None,
        }
    }

    pub fn call(name: &str, args: Value) -> Self {
        Self {
            text: String::new(),
            function_call: Some(FunctionCall {
                name: name.to_string(),
                args,
            }),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: ChatRequest<'_>) -> anyhow::Result<ModelReply>;
}
