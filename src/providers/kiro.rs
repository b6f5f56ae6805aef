//! Kiro provider
//!
//! Purely local: usage comes from the editor's cached usage state in
//! `state.vscdb`, with a fallback that tallies the append-only token log
//! when no usage state is available. No HTTP, no refresh flow.

use super::UsageFetcher;
use crate::error::ProviderError;
use crate::model::{
    MetricFormat, MetricLine, ProgressMetric, ProviderId, ProviderUsageResult, TextMetric,
};
use crate::normalize::finalize_lines;
use crate::storage::{statedb, StateDb};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

const STATE_KEY: &str = "kiro.kiroAgent";
const USAGE_STATE_FIELD: &str = "kiro.resourceNotifications.usageState";

const NO_DATA: &str = "Install Kiro and try again.";

pub struct KiroProvider {
    statedb: Arc<dyn StateDb>,
    state_db_path: PathBuf,
    token_log_file: PathBuf,
}

impl KiroProvider {
    pub fn new(statedb: Arc<dyn StateDb>) -> Self {
        let global_storage = dirs::config_dir()
            .unwrap_or_default()
            .join("Kiro/User/globalStorage");
        Self {
            statedb,
            state_db_path: global_storage.join("state.vscdb"),
            token_log_file: global_storage.join("kiro.kiroagent/dev_data/tokens_generated.jsonl"),
        }
    }

    #[cfg(test)]
    fn with_token_log_file(mut self, path: PathBuf) -> Self {
        self.token_log_file = path;
        self
    }

    // -- Cached usage state --

    fn load_cached_usage(&self) -> Option<Vec<MetricLine>> {
        let value = statedb::read_item(self.statedb.as_ref(), &self.state_db_path, STATE_KEY)?;
        let root: serde_json::Value = serde_json::from_str(&value).ok()?;
        let breakdowns: Vec<UsageBreakdown> =
            serde_json::from_value(root.get(USAGE_STATE_FIELD)?.get("usageBreakdowns")?.clone())
                .ok()?;

        let mut lines = Vec::new();
        for breakdown in breakdowns {
            let Some(display_name) = breakdown.display_name else {
                continue;
            };
            let Some(percentage_used) = breakdown.percentage_used else {
                continue;
            };
            let resets_at = breakdown
                .reset_date
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let line = match breakdown.usage_limit {
                Some(limit) if limit > 0 => {
                    let used = breakdown
                        .current_usage
                        .unwrap_or(percentage_used / 100.0 * limit as f64);
                    MetricLine::Progress(ProgressMetric {
                        label: display_name,
                        used,
                        limit: limit as f64,
                        format: MetricFormat::Count {
                            suffix: "invocations".to_string(),
                        },
                        resets_at,
                        period_seconds: None,
                    })
                }
                _ => MetricLine::Progress(ProgressMetric {
                    label: display_name,
                    used: percentage_used,
                    limit: 100.0,
                    format: MetricFormat::Percent,
                    resets_at,
                    period_seconds: None,
                }),
            };
            lines.push(line);
        }

        if lines.is_empty() {
            return None;
        }
        Some(lines)
    }

    // -- Token log fallback --

    async fn load_token_counts(&self) -> Option<Vec<MetricLine>> {
        let content = tokio::fs::read_to_string(&self.token_log_file).await.ok()?;

        let mut total: u64 = 0;
        let mut saw_entry = false;
        for line in content.lines().filter(|l| !l.is_empty()) {
            let Ok(entry) = serde_json::from_str::<TokenLogEntry>(line) else {
                continue;
            };
            total += entry.prompt_tokens.unwrap_or(0) + entry.generated_tokens.unwrap_or(0);
            saw_entry = true;
        }
        if !saw_entry {
            return None;
        }

        Some(vec![MetricLine::Text(TextMetric {
            label: "Tokens generated".to_string(),
            value: format_token_count(total),
        })])
    }
}

#[async_trait]
impl UsageFetcher for KiroProvider {
    fn provider(&self) -> ProviderId {
        ProviderId::Kiro
    }

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
        if let Some(lines) = self.load_cached_usage() {
            return Ok(ProviderUsageResult::new(
                ProviderId::Kiro,
                None,
                finalize_lines(lines),
            ));
        }

        // The token log is tried before giving up entirely.
        if let Some(lines) = self.load_token_counts().await {
            return Ok(ProviderUsageResult::new(ProviderId::Kiro, None, lines));
        }

        Err(ProviderError::NoData(NO_DATA.to_string()))
    }
}

fn format_token_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageBreakdown {
    display_name: Option<String>,
    percentage_used: Option<f64>,
    #[serde(default)]
    usage_limit: Option<i64>,
    #[serde(default)]
    current_usage: Option<f64>,
    #[serde(default)]
    reset_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenLogEntry {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    generated_tokens: Option<u64>,
}
