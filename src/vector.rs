//! `VectorSearchEngine` — the fabric's dependency on local semantic search,
//! consulted by C12 Federated Search for the master's own corpus before
//! (or alongside) fanning out to children. External collaborator per spec
//! §1; no concrete implementation ships in the core.

use async_trait::async_trait;

use crate::error::FabricError;
use crate::wire::{SearchOptions, WireSearchResult};

#[async_trait]
pub trait VectorSearchEngine: Send + Sync {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
    ) -> Result<Vec<WireSearchResult>, FabricError>;
}

#[cfg(any(test, feature = "test-helpers"))]
pub struct StubVectorSearchEngine {
    pub results: Vec<WireSearchResult>,
}

#[cfg(any(test, feature = "test-helpers"))]
#[async_trait]
impl VectorSearchEngine for StubVectorSearchEngine {
    async fn search(
        &self,
        _query: &str,
        limit: usize,
        _options: &SearchOptions,
    ) -> Result<Vec<WireSearchResult>, FabricError> {
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}
