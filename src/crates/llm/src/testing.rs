//! Deterministic models for tests.
//!
//! The pipeline must behave identically under a stubbed model, so tests
//! never exercise a real provider.

use crate::error::{LlmError, Result};
use crate::model::{GenerateRequest, TextModel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A model that replays scripted responses.
///
/// [`StaticModel::always`] returns the same text forever;
/// [`StaticModel::sequence`] pops queued responses and fails once the
/// script runs out.
pub struct StaticModel {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
}

impl StaticModel {
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(text.into()),
        }
    }

    pub fn sequence<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(items.into_iter().map(Into::into).collect()),
            fallback: None,
        }
    }
}

#[async_trait]
impl TextModel for StaticModel {
    async fn generate(&self, _request: GenerateRequest) -> Result<String> {
        if let Some(next) = self.responses.lock().expect("poisoned").pop_front() {
            return Ok(next);
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::ProviderError(
                "scripted responses exhausted".to_string(),
            )),
        }
    }

    fn model_name(&self) -> &str {
        "static"
    }
}

/// A model whose every call fails, for exercising retry paths.
pub struct FailingModel;

#[async_trait]
impl TextModel for FailingModel {
    async fn generate(&self, _request: GenerateRequest) -> Result<String> {
        Err(LlmError::ProviderError("always fails".to_string()))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_then_exhausted() {
        let model = StaticModel::sequence(["a", "b"]);
        let req = GenerateRequest::new("x");
        assert_eq!(model.generate(req.clone()).await.unwrap(), "a");
        assert_eq!(model.generate(req.clone()).await.unwrap(), "b");
        assert!(model.generate(req).await.is_err());
    }

    #[tokio::test]
    async fn always_repeats() {
        let model = StaticModel::always("ok");
        for _ in 0..3 {
            assert_eq!(model.generate(GenerateRequest::new("x")).await.unwrap(), "ok");
        }
    }
}
