//! The provider-agnostic text-generation trait.

use crate::error::Result;
use async_trait::async_trait;

/// One generation request: a user prompt, an optional system instruction,
/// and whether the response must be JSON.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub json_output: bool,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            json_output: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Ask the provider for a JSON response body.
    pub fn expect_json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Minimal interface a provider must implement. Implementations must be
/// `Send + Sync`; the service shares them as `Arc<dyn TextModel>`.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Model identifier used in logs and counter file names.
    fn model_name(&self) -> &str;
}
