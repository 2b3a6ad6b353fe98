//! Language model abstraction.
//!
//! Defines the [`ChatModel`] trait used by the extractor so the OpenRouter
//! backend can be swapped (or faked in tests).

pub mod openrouter;

use serde::{Deserialize, Serialize};

/// A named JSON schema the model response must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Async trait implemented by each chat completion backend.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// Run a chat completion constrained to `schema` and return the raw message
    /// content. `None` means the model produced no output.
    async fn complete_json(
        &self,
        messages: Vec<Message>,
        schema: &ResponseSchema,
    ) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
