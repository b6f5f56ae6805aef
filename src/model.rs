//! Core domain model: providers, credentials, metric lines, fetch status

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Provider identifier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Claude,
    Codex,
    Cursor,
    Antigravity,
    Kiro,
    Openrouter,
}

impl ProviderId {
    pub fn all() -> Vec<ProviderId> {
        vec![
            ProviderId::Claude,
            ProviderId::Codex,
            ProviderId::Cursor,
            ProviderId::Antigravity,
            ProviderId::Kiro,
            ProviderId::Openrouter,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Claude => "Claude",
            ProviderId::Codex => "Codex",
            ProviderId::Cursor => "Cursor",
            ProviderId::Antigravity => "Gemini",
            ProviderId::Kiro => "Kiro",
            ProviderId::Openrouter => "OpenRouter",
        }
    }

    pub fn brand_color(&self) -> &'static str {
        match self {
            ProviderId::Claude => "#FFB86C",
            ProviderId::Codex => "#50FA7B",
            ProviderId::Cursor => "#FF79C6",
            ProviderId::Antigravity => "#8BE9FD",
            ProviderId::Kiro => "#BD93F9",
            ProviderId::Openrouter => "#F1FA8C",
        }
    }

    pub fn icon_name(&self) -> &'static str {
        match self {
            ProviderId::Claude => "brain",
            ProviderId::Codex => "terminal",
            ProviderId::Cursor => "cursor-rays",
            ProviderId::Antigravity => "arrow-up-circle",
            ProviderId::Kiro => "wand",
            ProviderId::Openrouter => "router",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderId> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Some(ProviderId::Claude),
            "codex" => Some(ProviderId::Codex),
            "cursor" => Some(ProviderId::Cursor),
            "antigravity" | "gemini" => Some(ProviderId::Antigravity),
            "kiro" => Some(ProviderId::Kiro),
            "openrouter" => Some(ProviderId::Openrouter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Claude => "claude",
            ProviderId::Codex => "codex",
            ProviderId::Cursor => "cursor",
            ProviderId::Antigravity => "antigravity",
            ProviderId::Kiro => "kiro",
            ProviderId::Openrouter => "openrouter",
        }
    }
}

/// Where a credential was read from. Provenance only; adapters use it to
/// decide how a refreshed token would be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    File(PathBuf),
    SecretStore(String),
    SqlKeyValue { db_path: PathBuf, key: String },
}

/// An OAuth credential as read from a local store. Rebuilt on every fetch;
/// never cached in memory across fetch rounds.
#[derive(Debug, Clone)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: CredentialSource,
    pub subscription_type: Option<String>,
}

impl OAuthCredential {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// True within five minutes of expiry. False when expiry is unknown.
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + Duration::minutes(5) >= expires_at,
            None => false,
        }
    }
}

/// How a progress metric's values render.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricFormat {
    Percent,
    Dollars,
    Count { suffix: String },
}

#[derive(Debug, Clone)]
pub struct ProgressMetric {
    pub label: String,
    pub used: f64,
    pub limit: f64,
    pub format: MetricFormat,
    pub resets_at: Option<DateTime<Utc>>,
    /// Length of the usage window in seconds, when known.
    pub period_seconds: Option<i64>,
}

impl ProgressMetric {
    pub fn fraction(&self) -> f64 {
        if self.limit <= 0.0 {
            return 0.0;
        }
        (self.used / self.limit).clamp(0.0, 1.0)
    }

    pub fn formatted_used(&self) -> String {
        self.format_value(self.used)
    }

    pub fn formatted_limit(&self) -> String {
        self.format_value(self.limit)
    }

    pub fn formatted_percentage(&self) -> String {
        match self.format {
            MetricFormat::Percent => format!("{}%", self.used as i64),
            _ => format!("{}%", (self.fraction() * 100.0) as i64),
        }
    }

    fn format_value(&self, value: f64) -> String {
        match &self.format {
            MetricFormat::Percent => format!("{}%", value as i64),
            MetricFormat::Dollars => format!("${:.2}", value),
            MetricFormat::Count { suffix } => format!("{} {}", value as i64, suffix),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextMetric {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct BadgeMetric {
    pub label: String,
    pub text: String,
    pub color: String,
}

/// One displayable usage datum.
#[derive(Debug, Clone)]
pub enum MetricLine {
    Progress(ProgressMetric),
    Text(TextMetric),
    Badge(BadgeMetric),
}

impl MetricLine {
    pub fn label(&self) -> &str {
        match self {
            MetricLine::Progress(m) => &m.label,
            MetricLine::Text(m) => &m.label,
            MetricLine::Badge(m) => &m.label,
        }
    }

    /// Identity key used for list merging and deduplication.
    pub fn id(&self) -> String {
        match self {
            MetricLine::Progress(m) => format!("progress-{}", m.label),
            MetricLine::Text(m) => format!("text-{}", m.label),
            MetricLine::Badge(m) => format!("badge-{}", m.label),
        }
    }
}

/// Result of one successful provider fetch.
#[derive(Debug, Clone)]
pub struct ProviderUsageResult {
    pub provider: ProviderId,
    pub plan: Option<String>,
    pub lines: Vec<MetricLine>,
    pub fetched_at: DateTime<Utc>,
}

impl ProviderUsageResult {
    pub fn new(provider: ProviderId, plan: Option<String>, lines: Vec<MetricLine>) -> Self {
        Self {
            provider,
            plan,
            lines,
            fetched_at: Utc::now(),
        }
    }
}

/// Per-provider fetch lifecycle. `Disabled` is driven by configuration
/// toggles, not by fetch outcomes.
#[derive(Debug, Clone)]
pub enum ProviderStatus {
    Idle,
    Loading,
    Loaded(ProviderUsageResult),
    Error(String),
    Disabled,
}

impl ProviderStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, ProviderStatus::Loading)
    }

    pub fn result(&self) -> Option<&ProviderUsageResult> {
        match self {
            ProviderStatus::Loaded(result) => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ProviderStatus::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ProviderStatus::Disabled)
    }
}
