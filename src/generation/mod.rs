//! The text-generation collaborator.
//!
//! The reducer only sees [`Generator`]: a system prompt and a user prompt in,
//! free-form text out. [`openai::OpenAiGenerator`] talks to an OpenAI-compatible
//! endpoint and [`throttle::ThrottledGenerator`] paces any generator.

pub mod error;
pub mod openai;
pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::GenerationError;
pub use openai::OpenAiGenerator;
pub use throttle::{LeakyBucket, ThrottleConfig, ThrottledGenerator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(rename = "systemPrompt")]
    pub system: String,
    #[serde(rename = "userPrompt")]
    pub user: String,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens,
        }
    }

    /// Payload size in bytes; the unit for budgets and throttling.
    pub fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GenerationError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GenerationError> {
        (**self).generate(req).await
    }
}
