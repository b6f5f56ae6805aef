//! OpenRouter provider
//!
//! API keys only, no refresh flow. A management key in the secret store
//! switches to the bulk endpoint that aggregates spend across every key on
//! the account; otherwise a single key reports its own usage.

use super::UsageFetcher;
use crate::error::ProviderError;
use crate::http::{HttpClient, HttpRequest};
use crate::model::{
    BadgeMetric, MetricFormat, MetricLine, ProgressMetric, ProviderId, ProviderUsageResult,
    TextMetric,
};
use crate::normalize::finalize_lines;
use crate::storage::SecretStore;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SINGLE_KEY_URL: &str = "https://openrouter.ai/api/v1/auth/key";
const ALL_KEYS_URL: &str = "https://openrouter.ai/api/v1/keys";
const SINGLE_KEY_SERVICE: &str = "OPENROUTER_API_KEY";
const MANAGEMENT_KEY_SERVICE: &str = "OPENROUTER_MANAGEMENT_KEY";

pub struct OpenRouterProvider {
    http: Arc<dyn HttpClient>,
    secrets: Arc<dyn SecretStore>,
}

impl OpenRouterProvider {
    pub fn new(http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { http, secrets }
    }

    // -- Management key flow --

    async fn fetch_all_keys_usage(
        &self,
        management_key: &str,
    ) -> Result<ProviderUsageResult, ProviderError> {
        let request = HttpRequest::get(ALL_KEYS_URL)
            .header("Authorization", format!("Bearer {management_key}"))
            .header("Accept", "application/json");
        let response = self.http.execute(request).await?;

        if !response.is_success() {
            if response.is_auth_error() {
                return Err(ProviderError::AuthExpired(
                    "Management API key invalid or expired.".to_string(),
                ));
            }
            return Err(ProviderError::Http(response.status));
        }

        let parsed: AllKeysResponse = response.json()?;
        let active: Vec<&KeyInfo> = parsed
            .data
            .iter()
            .filter(|key| key.disabled != Some(true))
            .collect();

        let daily: f64 = active.iter().filter_map(|k| k.usage_daily).sum();
        let weekly: f64 = active.iter().filter_map(|k| k.usage_weekly).sum();
        let monthly: f64 = active.iter().filter_map(|k| k.usage_monthly).sum();

        let lines = vec![
            MetricLine::Text(TextMetric {
                label: "Today".to_string(),
                value: format!("${daily:.4}"),
            }),
            MetricLine::Text(TextMetric {
                label: "Week".to_string(),
                value: format!("${weekly:.4}"),
            }),
            MetricLine::Text(TextMetric {
                label: "Month".to_string(),
                value: format!("${monthly:.4}"),
            }),
            MetricLine::Badge(BadgeMetric {
                label: "Keys".to_string(),
                text: format!("{} active", active.len()),
                color: "#8BE9FD".to_string(),
            }),
        ];

        Ok(ProviderUsageResult::new(
            ProviderId::Openrouter,
            Some("All Keys".to_string()),
            finalize_lines(lines),
        ))
    }

    // -- Single key flow --

    async fn fetch_single_key_usage(
        &self,
        api_key: &str,
    ) -> Result<ProviderUsageResult, ProviderError> {
        let request = HttpRequest::get(SINGLE_KEY_URL)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Accept", "application/json");
        let response = self.http.execute(request).await?;

        if !response.is_success() {
            if response.is_auth_error() {
                return Err(ProviderError::AuthExpired(
                    "API key invalid or expired.".to_string(),
                ));
            }
            return Err(ProviderError::Http(response.status));
        }

        let parsed: SingleKeyResponse = response.json()?;
        let key = parsed.data;
        let mut lines = Vec::new();

        let usage = key.usage.unwrap_or(0.0);
        match key.limit {
            Some(limit) => lines.push(MetricLine::Progress(ProgressMetric {
                label: "Credits".to_string(),
                used: usage,
                limit,
                format: MetricFormat::Dollars,
                resets_at: None,
                period_seconds: None,
            })),
            None => lines.push(MetricLine::Text(TextMetric {
                label: "Spent".to_string(),
                value: format!("${usage:.4}"),
            })),
        }

        if key.is_free_tier == Some(true) {
            lines.push(MetricLine::Badge(BadgeMetric {
                label: "Tier".to_string(),
                text: "Free".to_string(),
                color: "#50FA7B".to_string(),
            }));
        }

        let plan = key.label.filter(|label| !label.is_empty());
        Ok(ProviderUsageResult::new(
            ProviderId::Openrouter,
            plan,
            finalize_lines(lines),
        ))
    }
}

#[async_trait]
impl UsageFetcher for OpenRouterProvider {
    fn provider(&self) -> ProviderId {
        ProviderId::Openrouter
    }

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
        if let Ok(Some(management_key)) = self.secrets.read(MANAGEMENT_KEY_SERVICE) {
            if !management_key.is_empty() {
                return self.fetch_all_keys_usage(&management_key).await;
            }
        }

        let api_key = self
            .secrets
            .read(SINGLE_KEY_SERVICE)
            .ok()
            .flatten()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ProviderError::NotLoggedIn(
                    "OpenRouter API key not found in the secret store.".to_string(),
                )
            })?;

        self.fetch_single_key_usage(&api_key).await
    }
}

// ---- Response Types ----

#[derive(Debug, Deserialize)]
struct AllKeysResponse {
    data: Vec<KeyInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyInfo {
    #[serde(default)]
    disabled: Option<bool>,
    #[serde(default)]
    usage_daily: Option<f64>,
    #[serde(default)]
    usage_weekly: Option<f64>,
    #[serde(default)]
    usage_monthly: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SingleKeyResponse {
    data: KeyData,
}

#[derive(Debug, Deserialize)]
struct KeyData {
    usage: Option<f64>,
    #[serde(default)]
    limit: Option<f64>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    is_free_tier: Option<bool>,
}
