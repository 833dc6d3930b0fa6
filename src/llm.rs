//! `LlmClient` — the fabric's only dependency on a language model, used by
//! AI-intent routing (C11) and AI-mode digest compilation (C10). An
//! external collaborator per spec §1: the core ships no concrete
//! implementation, only the trait boundary and a deterministic stub for
//! tests.

use async_trait::async_trait;

use crate::error::FabricError;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` against `model` (or the implementation's default
    /// if `None`), returning raw text. Callers are responsible for parsing
    /// structure out of the response themselves.
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, FabricError>;
}

/// Deterministic stand-in for tests: returns a canned response regardless
/// of prompt, or fails if configured to.
#[cfg(any(test, feature = "test-helpers"))]
pub struct StubLlmClient {
    pub response: Result<String, String>,
}

#[cfg(any(test, feature = "test-helpers"))]
#[async_trait]
impl LlmClient for StubLlmClient {
    async fn complete(&self, _prompt: &str, _model: Option<&str>) -> Result<String, FabricError> {
        self.response
            .clone()
            .map_err(FabricError::DependencyFailure)
    }
}
