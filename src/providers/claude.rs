//! Claude provider
//!
//! Credentials come from `~/.claude/.credentials.json`, falling back to the
//! secret-store entry written by the CLI. Usage is served by the OAuth usage
//! endpoint; an expired access token is refreshed through the platform token
//! endpoint with a single retry.

use super::UsageFetcher;
use crate::error::ProviderError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::model::{
    CredentialSource, MetricFormat, MetricLine, OAuthCredential, ProgressMetric, ProviderId,
    ProviderUsageResult, TextMetric,
};
use crate::normalize::finalize_lines;
use crate::refresh::execute_with_retry;
use crate::storage::SecretStore;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const REFRESH_URL: &str = "https://platform.claude.com/v1/oauth/token";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";
const SECRET_SERVICE: &str = "Claude Code-credentials";
const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const SCOPES: &str = "user:profile user:inference user:sessions:claude_code user:mcp_servers";

const NOT_LOGGED_IN: &str = "Not logged in. Run `claude` to authenticate.";
const TOKEN_EXPIRED: &str = "Token expired. Run `claude` to log in again.";

pub struct ClaudeProvider {
    http: Arc<dyn HttpClient>,
    secrets: Arc<dyn SecretStore>,
    credentials_file: Option<PathBuf>,
}

impl ClaudeProvider {
    pub fn new(http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretStore>) -> Self {
        let credentials_file = dirs::home_dir().map(|home| home.join(".claude/.credentials.json"));
        Self {
            http,
            secrets,
            credentials_file,
        }
    }

    #[cfg(test)]
    fn with_credentials_file(mut self, path: PathBuf) -> Self {
        self.credentials_file = Some(path);
        self
    }

    // -- Credentials --

    async fn load_credentials(&self) -> Result<OAuthCredential, ProviderError> {
        if let Some(path) = &self.credentials_file {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                if let Some(credential) =
                    parse_credentials(&content, CredentialSource::File(path.clone()))
                {
                    return Ok(credential);
                }
            }
        }

        if let Ok(Some(value)) = self.secrets.read(SECRET_SERVICE) {
            if let Some(credential) = parse_credentials(
                &value,
                CredentialSource::SecretStore(SECRET_SERVICE.to_string()),
            ) {
                return Ok(credential);
            }
        }

        Err(ProviderError::NotLoggedIn(NOT_LOGGED_IN.to_string()))
    }

    // -- Token refresh --

    async fn refresh_token(&self, refresh_token: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": CLIENT_ID,
            "scope": SCOPES,
        });
        let request = HttpRequest::post(REFRESH_URL).json_body(&body);
        let response = self.http.execute(request).await?;

        if response.status == 400 || response.status == 401 {
            return Err(ProviderError::AuthExpired(
                "Session expired. Run `claude` to log in again.".to_string(),
            ));
        }
        if !response.is_success() {
            return Err(ProviderError::RefreshFailed);
        }

        let parsed: RefreshResponse = response.json().map_err(|_| ProviderError::RefreshFailed)?;
        Ok(parsed.access_token)
    }

    // -- Usage API --

    async fn fetch_usage_data(&self, access_token: &str) -> Result<HttpResponse, ProviderError> {
        let request = HttpRequest::get(USAGE_URL)
            .header(
                "Authorization",
                format!("Bearer {}", access_token.trim()),
            )
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("anthropic-beta", OAUTH_BETA_HEADER);
        self.http.execute(request).await
    }

    fn parse_usage(
        &self,
        response: &HttpResponse,
        subscription_type: Option<&str>,
    ) -> Result<ProviderUsageResult, ProviderError> {
        let usage: UsageResponse = response.json()?;
        let mut lines: Vec<MetricLine> = Vec::new();

        let windows = [
            ("Session", &usage.five_hour, 5 * 60 * 60),
            ("Weekly", &usage.seven_day, 7 * 24 * 60 * 60),
            ("Sonnet", &usage.seven_day_sonnet, 7 * 24 * 60 * 60),
        ];
        for (label, window, period_seconds) in windows {
            let Some(window) = window else { continue };
            let Some(utilization) = window.utilization else {
                continue;
            };
            lines.push(MetricLine::Progress(ProgressMetric {
                label: label.to_string(),
                used: utilization,
                limit: 100.0,
                format: MetricFormat::Percent,
                resets_at: window
                    .resets_at
                    .and_then(|ts| DateTime::from_timestamp(ts as i64, 0)),
                period_seconds: Some(period_seconds),
            }));
        }

        if let Some(extra) = &usage.extra_usage {
            if extra.is_enabled == Some(true) {
                let used = extra.used_credits.unwrap_or(0.0);
                let limit = extra.monthly_limit.unwrap_or(0.0);
                if limit > 0.0 {
                    lines.push(MetricLine::Progress(ProgressMetric {
                        label: "Extra usage".to_string(),
                        used,
                        limit,
                        format: MetricFormat::Dollars,
                        resets_at: None,
                        period_seconds: None,
                    }));
                } else if used > 0.0 {
                    lines.push(MetricLine::Text(TextMetric {
                        label: "Extra usage".to_string(),
                        value: format!("${used:.2}"),
                    }));
                }
            }
        }

        let plan = subscription_type.and_then(format_plan_label);
        Ok(ProviderUsageResult::new(
            ProviderId::Claude,
            plan,
            finalize_lines(lines),
        ))
    }
}

#[async_trait]
impl UsageFetcher for ClaudeProvider {
    fn provider(&self) -> ProviderId {
        ProviderId::Claude
    }

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
        let mut credential = self.load_credentials().await?;

        // Proactive refresh near expiry; failure falls through to the
        // on-auth-error retry below.
        if credential.needs_refresh() {
            if let Some(refresh_token) = credential.refresh_token.clone() {
                match self.refresh_token(&refresh_token).await {
                    Ok(token) => credential.access_token = token,
                    Err(e) => tracing::debug!("claude pre-refresh failed: {}", e),
                }
            }
        }

        let refresh_token = credential.refresh_token.clone();
        let response = execute_with_retry(
            credential.access_token.clone(),
            |token| async move {
                let response = self.fetch_usage_data(&token).await?;
                Ok((response.clone(), response))
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

        self.parse_usage(&response, credential.subscription_type.as_deref())
    }
}

fn parse_credentials(content: &str, source: CredentialSource) -> Option<OAuthCredential> {
    let file: CredentialsFile = serde_json::from_str(content).ok()?;
    let oauth = file.claude_ai_oauth?;
    if oauth.access_token.is_empty() {
        return None;
    }

    Some(OAuthCredential {
        access_token: oauth.access_token,
        refresh_token: oauth.refresh_token,
        // Stored as epoch milliseconds.
        expires_at: oauth
            .expires_at
            .and_then(|ms| DateTime::from_timestamp((ms / 1000.0) as i64, 0)),
        source,
        subscription_type: oauth.subscription_type,
    })
}

fn format_plan_label(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let lowered = name.to_lowercase();
    let label = if lowered.contains("pro") {
        "Pro".to_string()
    } else if lowered.contains("max") {
        "Max".to_string()
    } else if lowered.contains("team") {
        "Team".to_string()
    } else if lowered.contains("enterprise") {
        "Enterprise".to_string()
    } else if lowered.contains("free") {
        "Free".to_string()
    } else {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => return None,
        }
    };
    Some(label)
}

// ---- Response Types ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    claude_ai_oauth: Option<ClaudeOAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaudeOAuth {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<f64>,
    #[serde(default)]
    subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    five_hour: Option<UsageWindow>,
    seven_day: Option<UsageWindow>,
    #[serde(default)]
    seven_day_sonnet: Option<UsageWindow>,
    #[serde(default)]
    extra_usage: Option<ExtraUsage>,
}

#[derive(Debug, Deserialize)]
struct UsageWindow {
    utilization: Option<f64>,
    resets_at: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExtraUsage {
    is_enabled: Option<bool>,
    monthly_limit: Option<f64>,
    used_credits: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockHttpClient;
    use crate::storage::keyring::mock::MockSecretStore;
    use chrono::Utc;
    use tempfile::TempDir;

    fn write_credentials(dir: &TempDir, expires_in_ms: i64) -> PathBuf {
        let path = dir.path().join(".credentials.json");
        let expires_at = (Utc::now().timestamp_millis() + expires_in_ms) as f64;
        let content = serde_json::json!({
            "claudeAiOauth": {
                "accessToken": "at_file",
                "refreshToken": "rt_file",
                "expiresAt": expires_at,
                "subscriptionType": "max_20x"
            }
        });
        std::fs::write(&path, content.to_string()).unwrap();
        path
    }

    fn usage_body() -> serde_json::Value {
        serde_json::json!({
            "five_hour": { "utilization": 42.0, "resets_at": 1900000000.0 },
            "seven_day": { "utilization": 10.5 },
            "seven_day_sonnet": { "utilization": 3.0 },
            "extra_usage": { "is_enabled": true, "monthly_limit": 50.0, "used_credits": 12.5 }
        })
    }

    #[tokio::test]
    async fn fetches_and_normalizes_usage() {
        let tmp = TempDir::new().unwrap();
        let path = write_credentials(&tmp, 60 * 60 * 1000);

        let http = Arc::new(MockHttpClient::new());
        http.set_json("api.anthropic.com", 200, usage_body());

        let provider = ClaudeProvider::new(http.clone(), Arc::new(MockSecretStore::new()))
            .with_credentials_file(path);
        let result = provider.fetch_usage().await.unwrap();

        assert_eq!(result.provider, ProviderId::Claude);
        assert_eq!(result.plan.as_deref(), Some("Max"));
        let labels: Vec<&str> = result.lines.iter().map(|l| l.label()).collect();
        assert_eq!(labels, vec!["Session", "Weekly", "Sonnet", "Extra usage"]);
        assert_eq!(http.requests_to("platform.claude.com"), 0);
    }

    #[tokio::test]
    async fn falls_back_to_secret_store() {
        let secrets = MockSecretStore::with(&[(
            SECRET_SERVICE,
            r#"{"claudeAiOauth":{"accessToken":"at_keychain"}}"#,
        )]);
        let http = Arc::new(MockHttpClient::new());
        http.set_json("api.anthropic.com", 200, usage_body());

        let tmp = TempDir::new().unwrap();
        let provider = ClaudeProvider::new(http.clone(), Arc::new(secrets))
            .with_credentials_file(tmp.path().join("missing.json"));
        let result = provider.fetch_usage().await.unwrap();

        assert_eq!(result.provider, ProviderId::Claude);
        let sent_auth = http
            .request_log
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.url.contains("api.anthropic.com"))
            .and_then(|r| {
                r.headers
                    .iter()
                    .find(|(name, _)| name == "Authorization")
                    .map(|(_, value)| value.clone())
            });
        assert_eq!(sent_auth.as_deref(), Some("Bearer at_keychain"));
    }

    #[tokio::test]
    async fn missing_everything_is_not_logged_in() {
        let tmp = TempDir::new().unwrap();
        let provider = ClaudeProvider::new(
            Arc::new(MockHttpClient::new()),
            Arc::new(MockSecretStore::new()),
        )
        .with_credentials_file(tmp.path().join("missing.json"));

        let err = provider.fetch_usage().await.unwrap_err();
        assert!(matches!(err, ProviderError::NotLoggedIn(_)));
    }

    #[tokio::test]
    async fn auth_failure_refreshes_once_and_retries() {
        let tmp = TempDir::new().unwrap();
        let path = write_credentials(&tmp, 60 * 60 * 1000);

        let http = Arc::new(MockHttpClient::new());
        http.set_sequence(
            "api.anthropic.com",
            vec![
                MockHttpClient::json_response(401, serde_json::json!({})),
                MockHttpClient::json_response(200, usage_body()),
            ],
        );
        http.set_json(
            "platform.claude.com",
            200,
            serde_json::json!({ "access_token": "at_new" }),
        );

        let provider = ClaudeProvider::new(http.clone(), Arc::new(MockSecretStore::new()))
            .with_credentials_file(path);
        let result = provider.fetch_usage().await.unwrap();

        assert!(!result.lines.is_empty());
        assert_eq!(http.requests_to("platform.claude.com"), 1);
        assert_eq!(http.requests_to("api.anthropic.com"), 2);
    }

    #[tokio::test]
    async fn persistent_auth_failure_is_auth_expired() {
        let tmp = TempDir::new().unwrap();
        let path = write_credentials(&tmp, 60 * 60 * 1000);

        let http = Arc::new(MockHttpClient::new());
        http.set_json("api.anthropic.com", 401, serde_json::json!({}));
        http.set_json(
            "platform.claude.com",
            200,
            serde_json::json!({ "access_token": "at_new" }),
        );

        let provider = ClaudeProvider::new(http.clone(), Arc::new(MockSecretStore::new()))
            .with_credentials_file(path);
        let err = provider.fetch_usage().await.unwrap_err();

        assert!(matches!(err, ProviderError::AuthExpired(_)));
        assert_eq!(http.requests_to("platform.claude.com"), 1);
    }

    #[tokio::test]
    async fn empty_usage_yields_fallback_badge() {
        let tmp = TempDir::new().unwrap();
        let path = write_credentials(&tmp, 60 * 60 * 1000);

        let http = Arc::new(MockHttpClient::new());
        http.set_json("api.anthropic.com", 200, serde_json::json!({}));

        let provider = ClaudeProvider::new(http, Arc::new(MockSecretStore::new()))
            .with_credentials_file(path);
        let result = provider.fetch_usage().await.unwrap();

        assert_eq!(result.lines.len(), 1);
        assert!(matches!(result.lines[0], MetricLine::Badge(_)));
    }
}
