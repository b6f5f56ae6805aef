//! Codex (OpenAI) provider
//!
//! Reads the CLI's `auth.json` (CODEX_HOME, `~/.config/codex`, `~/.codex`),
//! falling back to the secret store. Usage comes from the wham endpoint;
//! used-percent values may arrive in response headers before the body.

use super::UsageFetcher;
use crate::error::ProviderError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::model::{
    MetricFormat, MetricLine, ProgressMetric, ProviderId, ProviderUsageResult,
};
use crate::normalize::finalize_lines;
use crate::refresh::execute_with_retry;
use crate::storage::SecretStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

const USAGE_URL: &str = "https://chatgpt.com/backend-api/wham/usage";
const REFRESH_URL: &str = "https://auth.openai.com/oauth/token";
const SECRET_SERVICE: &str = "Codex Auth";
const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
/// Tokens older than this get a proactive refresh before the usage call.
const REFRESH_AGE_DAYS: i64 = 8;

const NOT_LOGGED_IN: &str = "Not logged in. Run `codex` to authenticate.";
const TOKEN_EXPIRED: &str = "Token expired. Run `codex` to log in again.";

static MODEL_LIMIT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GPT-[\d.]+-Codex-").expect("valid regex"));

pub struct CodexProvider {
    http: Arc<dyn HttpClient>,
    secrets: Arc<dyn SecretStore>,
    auth_files: Vec<PathBuf>,
}

impl CodexProvider {
    pub fn new(http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretStore>) -> Self {
        let mut auth_files = Vec::new();
        if let Ok(codex_home) = std::env::var("CODEX_HOME") {
            auth_files.push(PathBuf::from(codex_home).join("auth.json"));
        }
        if let Some(home) = dirs::home_dir() {
            auth_files.push(home.join(".config/codex/auth.json"));
            auth_files.push(home.join(".codex/auth.json"));
        }
        Self {
            http,
            secrets,
            auth_files,
        }
    }

    #[cfg(test)]
    fn with_auth_files(mut self, paths: Vec<PathBuf>) -> Self {
        self.auth_files = paths;
        self
    }

    // -- Credentials --

    async fn load_auth(&self) -> Result<AuthFile, ProviderError> {
        for path in &self.auth_files {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                if let Some(auth) = parse_auth(&content) {
                    return Ok(auth);
                }
            }
        }

        if let Ok(Some(value)) = self.secrets.read(SECRET_SERVICE) {
            if let Some(auth) = parse_auth(&value) {
                return Ok(auth);
            }
        }

        Err(ProviderError::NotLoggedIn(NOT_LOGGED_IN.to_string()))
    }

    // -- Token refresh --

    async fn refresh_token(&self, refresh_token: &str) -> Result<String, ProviderError> {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", CLIENT_ID)
            .append_pair("refresh_token", refresh_token)
            .finish();
        let request = HttpRequest::post(REFRESH_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body.into_bytes());
        let response = self.http.execute(request).await?;

        if response.status == 400 || response.status == 401 {
            return Err(ProviderError::AuthExpired(
                "Session expired. Run `codex` to log in again.".to_string(),
            ));
        }
        if !response.is_success() {
            return Err(ProviderError::RefreshFailed);
        }

        let parsed: RefreshResponse = response.json().map_err(|_| ProviderError::RefreshFailed)?;
        Ok(parsed.access_token)
    }

    // -- Usage API --

    async fn fetch_usage_data(
        &self,
        access_token: &str,
        account_id: Option<&str>,
    ) -> Result<HttpResponse, ProviderError> {
        let mut request = HttpRequest::get(USAGE_URL)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Accept", "application/json");
        if let Some(account_id) = account_id {
            request = request.header("ChatGPT-Account-Id", account_id);
        }
        self.http.execute(request).await
    }

    fn parse_usage(&self, response: &HttpResponse) -> Result<ProviderUsageResult, ProviderError> {
        let usage: UsageResponse = response.json()?;
        let now = Utc::now();
        let mut lines: Vec<MetricLine> = Vec::new();

        let primary = usage
            .rate_limit
            .as_ref()
            .and_then(|rl| rl.primary_window.as_ref());
        let secondary = usage
            .rate_limit
            .as_ref()
            .and_then(|rl| rl.secondary_window.as_ref());

        // Headers win over the body when both carry a used-percent.
        let session_used = header_f64(response, "x-codex-primary-used-percent")
            .or(primary.and_then(|w| w.used_percent));
        let weekly_used = header_f64(response, "x-codex-secondary-used-percent")
            .or(secondary.and_then(|w| w.used_percent));

        if let Some(used) = session_used {
            lines.push(percent_window("Session", used, primary, now, 5 * 60 * 60));
        }
        if let Some(used) = weekly_used {
            lines.push(percent_window(
                "Weekly",
                used,
                secondary,
                now,
                7 * 24 * 60 * 60,
            ));
        }

        // Per-model rate limits.
        for entry in usage.additional_rate_limits.iter().flatten() {
            let Some(rl) = entry.rate_limit.as_ref() else {
                continue;
            };
            let Some(window) = rl.primary_window.as_ref() else {
                continue;
            };
            let Some(used) = window.used_percent else {
                continue;
            };
            let name = entry.limit_name.as_deref().unwrap_or("Model");
            let label = MODEL_LIMIT_PREFIX.replace(name, "").to_string();
            let period = window.limit_window_seconds.unwrap_or(5 * 60 * 60);
            lines.push(percent_window(&label, used, Some(window), now, period));
        }

        if let Some(window) = usage
            .code_review_rate_limit
            .as_ref()
            .and_then(|rl| rl.primary_window.as_ref())
        {
            if let Some(used) = window.used_percent {
                lines.push(percent_window(
                    "Reviews",
                    used,
                    Some(window),
                    now,
                    7 * 24 * 60 * 60,
                ));
            }
        }

        // Credits render against a fixed 1000-credit scale.
        let balance = header_f64(response, "x-codex-credits-balance")
            .or(usage.credits.as_ref().and_then(|c| c.balance));
        if let Some(remaining) = balance {
            let limit = 1000.0;
            let used = (limit - remaining).clamp(0.0, limit);
            lines.push(MetricLine::Progress(ProgressMetric {
                label: "Credits".to_string(),
                used,
                limit,
                format: MetricFormat::Count {
                    suffix: "credits".to_string(),
                },
                resets_at: None,
                period_seconds: None,
            }));
        }

        let plan = usage.plan_type.as_deref().and_then(format_plan_label);
        Ok(ProviderUsageResult::new(
            ProviderId::Codex,
            plan,
            finalize_lines(lines),
        ))
    }
}

#[async_trait]
impl UsageFetcher for CodexProvider {
    fn provider(&self) -> ProviderId {
        ProviderId::Codex
    }

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
        let mut auth = self.load_auth().await?;

        if auth.is_refresh_stale() {
            if let Some(refresh_token) = auth.tokens.refresh_token.clone() {
                match self.refresh_token(&refresh_token).await {
                    Ok(token) => auth.tokens.access_token = token,
                    Err(e) => tracing::debug!("codex pre-refresh failed: {}", e),
                }
            }
        }

        let account_id = auth.tokens.account_id.clone();
        let refresh_token = auth.tokens.refresh_token.clone();
        let response = execute_with_retry(
            auth.tokens.access_token.clone(),
            |token| {
                let account_id = account_id.clone();
                async move {
                    let response = self
                        .fetch_usage_data(&token, account_id.as_deref())
                        .await?;
                    Ok((response.clone(), response))
                }
            },
            |_old| async move {
                let refresh_token = refresh_token.ok_or(ProviderError::NoRefreshToken)?;
                self.refresh_token(&refresh_token).await
            },
            TOKEN_EXPIRED,
        )
        .await?;

        if !response.is_success() {
            if response.is_auth_error() {
                return Err(ProviderError::AuthExpired(TOKEN_EXPIRED.to_string()));
            }
            return Err(ProviderError::Http(response.status));
        }

        self.parse_usage(&response)
    }
}

fn parse_auth(content: &str) -> Option<AuthFile> {
    let auth: AuthFile = serde_json::from_str(content).ok()?;
    if auth.tokens.access_token.is_empty() {
        return None;
    }
    Some(auth)
}

fn header_f64(response: &HttpResponse, name: &str) -> Option<f64> {
    response.header(name).and_then(|v| v.parse().ok())
}

fn percent_window(
    label: &str,
    used: f64,
    window: Option<&Window>,
    now: DateTime<Utc>,
    period_seconds: i64,
) -> MetricLine {
    let resets_at = window.and_then(|w| {
        if let Some(ts) = w.reset_at {
            DateTime::from_timestamp(ts as i64, 0)
        } else {
            w.reset_after_seconds
                .map(|secs| now + Duration::seconds(secs as i64))
        }
    });
    MetricLine::Progress(ProgressMetric {
        label: label.to_string(),
        used,
        limit: 100.0,
        format: MetricFormat::Percent,
        resets_at,
        period_seconds: Some(period_seconds),
    })
}

fn format_plan_label(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let mut chars = name.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase())
}

// ---- Auth / Response Types ----

#[derive(Debug, Deserialize)]
struct AuthFile {
    tokens: AuthTokens,
    #[serde(default)]
    last_refresh: Option<String>,
}

impl AuthFile {
    fn is_refresh_stale(&self) -> bool {
        let Some(last_refresh) = self
            .last_refresh
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            return true;
        };
        Utc::now().signed_duration_since(last_refresh) > Duration::days(REFRESH_AGE_DAYS)
    }
}

#[derive(Debug, Deserialize)]
struct AuthTokens {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    plan_type: Option<String>,
    rate_limit: Option<RateLimit>,
    #[serde(default)]
    additional_rate_limits: Option<Vec<AdditionalRateLimit>>,
    #[serde(default)]
    code_review_rate_limit: Option<RateLimit>,
    #[serde(default)]
    credits: Option<Credits>,
}

#[derive(Debug, Deserialize)]
struct RateLimit {
    primary_window: Option<Window>,
    #[serde(default)]
    secondary_window: Option<Window>,
}

#[derive(Debug, Deserialize)]
struct AdditionalRateLimit {
    limit_name: Option<String>,
    rate_limit: Option<RateLimit>,
}

#[derive(Debug, Deserialize)]
struct Window {
    used_percent: Option<f64>,
    #[serde(default)]
    reset_at: Option<f64>,
    #[serde(default)]
    reset_after_seconds: Option<f64>,
    #[serde(default)]
    limit_window_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Credits {
    balance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockHttpClient;
    use crate::storage::keyring::mock::MockSecretStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_auth(dir: &TempDir, last_refresh: Option<String>) -> PathBuf {
        let path = dir.path().join("auth.json");
        let mut auth = serde_json::json!({
            "tokens": {
                "access_token": "at_codex",
                "refresh_token": "rt_codex",
                "account_id": "acct_1"
            }
        });
        if let Some(last_refresh) = last_refresh {
            auth["last_refresh"] = serde_json::Value::String(last_refresh);
        }
        std::fs::write(&path, auth.to_string()).unwrap();
        path
    }

    fn recent_refresh() -> Option<String> {
        Some(Utc::now().to_rfc3339())
    }

    fn provider(http: Arc<MockHttpClient>, path: PathBuf) -> CodexProvider {
        CodexProvider::new(http, Arc::new(MockSecretStore::new())).with_auth_files(vec![path])
    }

    #[tokio::test]
    async fn parses_body_windows_and_extras() {
        let tmp = TempDir::new().unwrap();
        let path = write_auth(&tmp, recent_refresh());

        let http = Arc::new(MockHttpClient::new());
        http.set_json(
            "chatgpt.com",
            200,
            serde_json::json!({
                "plan_type": "PLUS",
                "rate_limit": {
                    "primary_window": { "used_percent": 35.0, "reset_after_seconds": 1200.0 },
                    "secondary_window": { "used_percent": 60.0, "reset_at": 1900000000.0 }
                },
                "additional_rate_limits": [
                    {
                        "limit_name": "GPT-5.1-Codex-Mini",
                        "rate_limit": {
                            "primary_window": {
                                "used_percent": 12.0,
                                "limit_window_seconds": 18000
                            }
                        }
                    }
                ],
                "code_review_rate_limit": {
                    "primary_window": { "used_percent": 5.0 }
                },
                "credits": { "balance": 400.0 }
            }),
        );

        let result = provider(http, path).fetch_usage().await.unwrap();

        assert_eq!(result.plan.as_deref(), Some("Plus"));
        let labels: Vec<&str> = result.lines.iter().map(|l| l.label()).collect();
        assert_eq!(
            labels,
            vec!["Session", "Weekly", "Mini", "Reviews", "Credits"]
        );
        match &result.lines[4] {
            MetricLine::Progress(m) => {
                assert!((m.used - 600.0).abs() < f64::EPSILON);
                assert!((m.limit - 1000.0).abs() < f64::EPSILON);
            }
            other => panic!("expected credits progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn headers_override_body_percentages() {
        let tmp = TempDir::new().unwrap();
        let path = write_auth(&tmp, recent_refresh());

        let http = Arc::new(MockHttpClient::new());
        let mut headers = HashMap::new();
        headers.insert("x-codex-primary-used-percent".to_string(), "77.5".to_string());
        http.set_response(
            "chatgpt.com",
            HttpResponse {
                status: 200,
                body: serde_json::json!({
                    "rate_limit": { "primary_window": { "used_percent": 10.0 } }
                })
                .to_string()
                .into_bytes(),
                headers,
            },
        );

        let result = provider(http, path).fetch_usage().await.unwrap();
        match &result.lines[0] {
            MetricLine::Progress(m) => assert!((m.used - 77.5).abs() < f64::EPSILON),
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_last_refresh_triggers_pre_refresh() {
        let tmp = TempDir::new().unwrap();
        let stale = (Utc::now() - Duration::days(30)).to_rfc3339();
        let path = write_auth(&tmp, Some(stale));

        let http = Arc::new(MockHttpClient::new());
        http.set_json(
            "auth.openai.com",
            200,
            serde_json::json!({ "access_token": "at_new" }),
        );
        http.set_json("chatgpt.com", 200, serde_json::json!({}));

        let result = provider(http.clone(), path).fetch_usage().await.unwrap();

        assert_eq!(http.requests_to("auth.openai.com"), 1);
        // Empty body still yields the fallback badge.
        assert_eq!(result.lines.len(), 1);
    }

    #[tokio::test]
    async fn auth_failure_refreshes_once_and_retries() {
        let tmp = TempDir::new().unwrap();
        let path = write_auth(&tmp, recent_refresh());

        let http = Arc::new(MockHttpClient::new());
        http.set_sequence(
            "chatgpt.com",
            vec![
                MockHttpClient::json_response(403, serde_json::json!({})),
                MockHttpClient::json_response(
                    200,
                    serde_json::json!({
                        "rate_limit": { "primary_window": { "used_percent": 1.0 } }
                    }),
                ),
            ],
        );
        http.set_json(
            "auth.openai.com",
            200,
            serde_json::json!({ "access_token": "at_new" }),
        );

        let result = provider(http.clone(), path).fetch_usage().await.unwrap();

        assert_eq!(http.requests_to("auth.openai.com"), 1);
        assert_eq!(http.requests_to("chatgpt.com"), 2);
        assert_eq!(result.lines[0].label(), "Session");
    }

    #[tokio::test]
    async fn refresh_rejection_is_auth_expired() {
        let tmp = TempDir::new().unwrap();
        let path = write_auth(&tmp, recent_refresh());

        let http = Arc::new(MockHttpClient::new());
        http.set_json("chatgpt.com", 401, serde_json::json!({}));
        http.set_json("auth.openai.com", 400, serde_json::json!({}));

        let err = provider(http, path).fetch_usage().await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthExpired(_)));
    }

    #[tokio::test]
    async fn secret_store_fallback_and_missing_auth() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.json");

        let secrets = MockSecretStore::with(&[(
            SECRET_SERVICE,
            r#"{"tokens":{"access_token":"at_ks"},"last_refresh":"2999-01-01T00:00:00Z"}"#,
        )]);
        let http = Arc::new(MockHttpClient::new());
        http.set_json("chatgpt.com", 200, serde_json::json!({}));

        let provider = CodexProvider::new(http, Arc::new(secrets))
            .with_auth_files(vec![missing.clone()]);
        assert!(provider.fetch_usage().await.is_ok());

        let empty = CodexProvider::new(
            Arc::new(MockHttpClient::new()),
            Arc::new(MockSecretStore::new()),
        )
        .with_auth_files(vec![missing]);
        assert!(matches!(
            empty.fetch_usage().await.unwrap_err(),
            ProviderError::NotLoggedIn(_)
        ));
    }
}
