//! Provider adapters: per-vendor credential resolution, fetch, normalization

mod antigravity;
mod claude;
mod codex;
mod cursor;
mod kiro;
mod openrouter;

use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::model::{ProviderId, ProviderUsageResult};
use crate::storage::{SecretStore, StateDb};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use antigravity::AntigravityProvider;
pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use cursor::CursorProvider;
pub use kiro::KiroProvider;
pub use openrouter::OpenRouterProvider;

/// One vendor's fetch pipeline: resolve credentials, call the usage API,
/// normalize the response.
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    fn provider(&self) -> ProviderId;

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError>;
}

/// Fixed provider -> adapter mapping, built once at startup and read-only
/// thereafter.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn UsageFetcher>>,
}

impl ProviderRegistry {
    pub fn new(
        http: Arc<dyn HttpClient>,
        secrets: Arc<dyn SecretStore>,
        statedb: Arc<dyn StateDb>,
    ) -> Self {
        let mut adapters: HashMap<ProviderId, Arc<dyn UsageFetcher>> = HashMap::new();
        adapters.insert(
            ProviderId::Claude,
            Arc::new(ClaudeProvider::new(http.clone(), secrets.clone())),
        );
        adapters.insert(
            ProviderId::Codex,
            Arc::new(CodexProvider::new(http.clone(), secrets.clone())),
        );
        adapters.insert(
            ProviderId::Cursor,
            Arc::new(CursorProvider::new(http.clone(), statedb.clone())),
        );
        adapters.insert(
            ProviderId::Antigravity,
            Arc::new(AntigravityProvider::new(http.clone(), statedb.clone())),
        );
        adapters.insert(ProviderId::Kiro, Arc::new(KiroProvider::new(statedb)));
        adapters.insert(
            ProviderId::Openrouter,
            Arc::new(OpenRouterProvider::new(http, secrets)),
        );

        Self { adapters }
    }

    /// Build a registry from an explicit adapter map (tests).
    pub fn from_adapters(adapters: HashMap<ProviderId, Arc<dyn UsageFetcher>>) -> Self {
        Self { adapters }
    }

    pub fn adapter(&self, provider: ProviderId) -> Option<Arc<dyn UsageFetcher>> {
        self.adapters.get(&provider).cloned()
    }
}
