pub mod factory;
pub mod openai;

use async_trait::async_trait;
use serde_json::Value;
use tabrelay_core::types::{ChatMessage, LLMResponse};
use tabrelay_core::Result;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use factory::{create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;
