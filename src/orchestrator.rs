//! Concurrent fan-out fetch across providers
//!
//! One task per enabled provider per round; a task failure (error or panic)
//! becomes that provider's `Error` status and never touches its siblings.
//! The periodic loop is a single long-lived task that re-reads configuration
//! each round and observes cancellation both at the loop top and during the
//! inter-round sleep.

use crate::config::AppConfig;
use crate::model::{ProviderId, ProviderStatus};
use crate::providers::ProviderRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct FetchOrchestrator {
    registry: Arc<ProviderRegistry>,
}

impl FetchOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Fetch every enabled provider concurrently. The returned map always
    /// has an entry per provider: `Disabled` for providers outside the
    /// enabled set, `Loaded` or `Error` for the rest.
    pub async fn fetch_all(
        &self,
        enabled: &[ProviderId],
    ) -> HashMap<ProviderId, ProviderStatus> {
        let mut statuses: HashMap<ProviderId, ProviderStatus> = HashMap::new();
        for provider in ProviderId::all() {
            if !enabled.contains(&provider) {
                statuses.insert(provider, ProviderStatus::Disabled);
            }
        }

        let mut tasks = JoinSet::new();
        for provider in ProviderId::all() {
            if !enabled.contains(&provider) {
                continue;
            }
            let Some(adapter) = self.registry.adapter(provider) else {
                statuses.insert(
                    provider,
                    ProviderStatus::Error("Provider not available".to_string()),
                );
                continue;
            };
            tasks.spawn(async move {
                let status = match adapter.fetch_usage().await {
                    Ok(result) => ProviderStatus::Loaded(result),
                    Err(e) => {
                        tracing::debug!("fetch failed for {:?}: {}", provider, e);
                        ProviderStatus::Error(e.to_string())
                    }
                };
                (provider, status)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((provider, status)) => {
                    statuses.insert(provider, status);
                }
                // A panicking adapter only poisons its own entry; the
                // provider id is lost with the panic, so backfill below.
                Err(e) => tracing::warn!("provider task panicked: {}", e),
            }
        }
        for provider in enabled {
            statuses
                .entry(*provider)
                .or_insert_with(|| ProviderStatus::Error("Provider task failed".to_string()));
        }

        statuses
    }

    /// Refresh a single provider without waking the others.
    pub async fn fetch_one(&self, provider: ProviderId) -> ProviderStatus {
        let Some(adapter) = self.registry.adapter(provider) else {
            return ProviderStatus::Error("Provider not available".to_string());
        };
        match adapter.fetch_usage().await {
            Ok(result) => ProviderStatus::Loaded(result),
            Err(e) => ProviderStatus::Error(e.to_string()),
        }
    }

    /// Periodic refresh loop. Configuration is re-read at the start of each
    /// round; the inter-round sleep is interruptible, and no callback fires
    /// after cancellation. Rounds never overlap.
    pub async fn run_periodic<C, F>(&self, token: CancellationToken, config: C, mut on_update: F)
    where
        C: Fn() -> AppConfig + Send,
        F: FnMut(HashMap<ProviderId, ProviderStatus>) + Send,
    {
        loop {
            if token.is_cancelled() {
                return;
            }

            let round_config = config();
            let statuses = self.fetch_all(&round_config.enabled_providers).await;

            if token.is_cancelled() {
                return;
            }
            on_update(statuses);

            let interval = Duration::from_secs(round_config.refresh_seconds.max(1));
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::ProviderUsageResult;
    use crate::providers::UsageFetcher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        provider: ProviderId,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UsageFetcher for StubFetcher {
        fn provider(&self) -> ProviderId {
            self.provider
        }

        async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::NotLoggedIn("stub failure".to_string()))
            } else {
                Ok(ProviderUsageResult::new(self.provider, None, vec![]))
            }
        }
    }

    struct PanickingFetcher(ProviderId);

    #[async_trait]
    impl UsageFetcher for PanickingFetcher {
        fn provider(&self) -> ProviderId {
            self.0
        }

        async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
            panic!("adapter bug");
        }
    }

    fn registry_with(
        adapters: Vec<(ProviderId, Arc<dyn UsageFetcher>)>,
    ) -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::from_adapters(
            adapters.into_iter().collect(),
        ))
    }

    fn stub(provider: ProviderId, fail: bool) -> (Arc<dyn UsageFetcher>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(StubFetcher {
                provider,
                fail,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn one_failure_never_affects_siblings() {
        let (claude, _) = stub(ProviderId::Claude, false);
        let (codex, _) = stub(ProviderId::Codex, true);
        let (kiro, _) = stub(ProviderId::Kiro, false);
        let orchestrator = FetchOrchestrator::new(registry_with(vec![
            (ProviderId::Claude, claude),
            (ProviderId::Codex, codex),
            (ProviderId::Kiro, kiro),
        ]));

        let enabled = [ProviderId::Claude, ProviderId::Codex, ProviderId::Kiro];
        let statuses = orchestrator.fetch_all(&enabled).await;

        assert_eq!(statuses.len(), ProviderId::all().len());
        assert!(statuses[&ProviderId::Claude].result().is_some());
        assert!(statuses[&ProviderId::Kiro].result().is_some());
        assert_eq!(
            statuses[&ProviderId::Codex].error_message(),
            Some("stub failure")
        );

        let error_count = enabled
            .iter()
            .filter(|p| statuses[p].error_message().is_some())
            .count();
        assert_eq!(error_count, 1);
    }

    #[tokio::test]
    async fn panicking_adapter_is_contained() {
        let (claude, _) = stub(ProviderId::Claude, false);
        let orchestrator = FetchOrchestrator::new(registry_with(vec![
            (ProviderId::Claude, claude),
            (ProviderId::Codex, Arc::new(PanickingFetcher(ProviderId::Codex))),
        ]));

        let statuses = orchestrator
            .fetch_all(&[ProviderId::Claude, ProviderId::Codex])
            .await;

        assert!(statuses[&ProviderId::Claude].result().is_some());
        assert!(statuses[&ProviderId::Codex].error_message().is_some());
    }

    #[tokio::test]
    async fn disabled_providers_never_run_or_load() {
        let (claude, claude_calls) = stub(ProviderId::Claude, false);
        let (kiro, kiro_calls) = stub(ProviderId::Kiro, false);
        let orchestrator = FetchOrchestrator::new(registry_with(vec![
            (ProviderId::Claude, claude),
            (ProviderId::Kiro, kiro),
        ]));

        let statuses = orchestrator.fetch_all(&[ProviderId::Claude]).await;

        assert!(statuses[&ProviderId::Kiro].is_disabled());
        assert_eq!(kiro_calls.load(Ordering::SeqCst), 0);
        assert_eq!(claude_calls.load(Ordering::SeqCst), 1);
        for provider in ProviderId::all() {
            if provider != ProviderId::Claude {
                assert!(statuses[&provider].is_disabled());
            }
        }
    }

    #[tokio::test]
    async fn fetch_one_reports_single_status() {
        let (claude, _) = stub(ProviderId::Claude, false);
        let orchestrator =
            FetchOrchestrator::new(registry_with(vec![(ProviderId::Claude, claude)]));

        assert!(orchestrator
            .fetch_one(ProviderId::Claude)
            .await
            .result()
            .is_some());
        assert!(orchestrator
            .fetch_one(ProviderId::Codex)
            .await
            .error_message()
            .is_some());
    }

    #[tokio::test]
    async fn periodic_loop_publishes_then_stops_on_cancel() {
        let (claude, calls) = stub(ProviderId::Claude, false);
        let orchestrator = Arc::new(FetchOrchestrator::new(registry_with(vec![(
            ProviderId::Claude,
            claude,
        )])));

        let token = CancellationToken::new();
        let updates = Arc::new(AtomicUsize::new(0));

        let loop_token = token.clone();
        let loop_updates = updates.clone();
        let loop_orchestrator = orchestrator.clone();
        let handle = tokio::spawn(async move {
            loop_orchestrator
                .run_periodic(
                    loop_token,
                    || AppConfig {
                        refresh_seconds: 3600,
                        enabled_providers: vec![ProviderId::Claude],
                        ..AppConfig::default()
                    },
                    move |_statuses| {
                        loop_updates.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await;
        });

        // First round publishes once, then parks in the interruptible sleep.
        tokio::time::timeout(Duration::from_secs(5), async {
            while updates.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first round should publish");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should exit promptly")
            .unwrap();

        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_round() {
        let (claude, calls) = stub(ProviderId::Claude, false);
        let orchestrator =
            FetchOrchestrator::new(registry_with(vec![(ProviderId::Claude, claude)]));

        let token = CancellationToken::new();
        token.cancel();
        orchestrator
            .run_periodic(token, AppConfig::default, |_statuses| {
                panic!("no callback after cancellation")
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
