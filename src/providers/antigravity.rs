//! Antigravity (Gemini) provider
//!
//! The editor keeps its Google OAuth tokens inside a protobuf blob in
//! `state.vscdb`; field numbers below come from reverse engineering that
//! storage format and must be preserved as-is. Credential candidates are
//! tried in order: the protobuf access token, a locally cached refreshed
//! token, then the plain API key (sent as a `key` query parameter). Quota
//! comes from the Cloud Code private API.

use super::UsageFetcher;
use crate::error::ProviderError;
use crate::http::{HttpClient, HttpRequest};
use crate::model::{
    MetricFormat, MetricLine, ProgressMetric, ProviderId, ProviderUsageResult,
};
use crate::normalize::finalize_lines;
use crate::storage::{statedb, StateDb};
use crate::wire;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

const CLOUD_CODE_BASES: [&str; 2] = [
    "https://daily-cloudcode-pa.googleapis.com",
    "https://cloudcode-pa.googleapis.com",
];
const FETCH_MODELS_PATH: &str = "/v1internal:fetchAvailableModels";
const GOOGLE_OAUTH_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
const GOOGLE_CLIENT_SECRET: &str = "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";

const INIT_STATE_KEY: &str = "jetskiStateSync.agentManagerInitState";
const AUTH_STATUS_KEY: &str = "antigravityAuthStatus";

const TRY_AGAIN: &str = "Start Antigravity and try again.";

/// Internal/duplicated model ids that never carry user-facing quota.
const MODEL_BLACKLIST: [&str; 9] = [
    "MODEL_CHAT_20706",
    "MODEL_CHAT_23310",
    "MODEL_GOOGLE_GEMINI_2_5_FLASH",
    "MODEL_GOOGLE_GEMINI_2_5_FLASH_THINKING",
    "MODEL_GOOGLE_GEMINI_2_5_FLASH_LITE",
    "MODEL_GOOGLE_GEMINI_2_5_PRO",
    "MODEL_PLACEHOLDER_M19",
    "MODEL_PLACEHOLDER_M9",
    "MODEL_PLACEHOLDER_M12",
];

pub struct AntigravityProvider {
    http: Arc<dyn HttpClient>,
    statedb: Arc<dyn StateDb>,
    state_db_path: PathBuf,
    token_cache_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct ProtoTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthTransport {
    Bearer,
    QueryKey,
}

#[derive(Debug, Clone)]
struct Candidate {
    token: String,
    transport: AuthTransport,
}

/// Refreshed access tokens are cached on disk keyed by their expiry so a
/// fresh fetch round can reuse them without hitting the OAuth endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

struct ProbeOutcome {
    data: Option<serde_json::Value>,
    auth_failed: bool,
}

impl AntigravityProvider {
    pub fn new(http: Arc<dyn HttpClient>, statedb: Arc<dyn StateDb>) -> Self {
        let state_db_path = dirs::config_dir()
            .unwrap_or_default()
            .join("Antigravity/User/globalStorage/state.vscdb");
        let token_cache_file = crate::config::app_data_dir()
            .ok()
            .map(|dir| dir.join("antigravity-token.json"));
        Self {
            http,
            statedb,
            state_db_path,
            token_cache_file,
        }
    }

    #[cfg(test)]
    fn with_token_cache_file(mut self, path: PathBuf) -> Self {
        self.token_cache_file = Some(path);
        self
    }

    // -- Credential loading --

    fn load_proto_tokens(&self) -> Option<ProtoTokens> {
        let value = statedb::read_item(self.statedb.as_ref(), &self.state_db_path, INIT_STATE_KEY)?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .ok()?;

        let outer = wire::read_fields(&raw);
        let inner_bytes = outer.get(&6)?.as_bytes()?;
        let inner = wire::read_fields(inner_bytes);

        let access_token = inner.get(&1)?.as_str()?.to_string();
        if access_token.is_empty() {
            return None;
        }
        let refresh_token = inner
            .get(&3)
            .and_then(|f| f.as_str())
            .map(str::to_string);
        let expires_at = inner
            .get(&4)
            .and_then(|f| f.as_bytes())
            .map(wire::read_fields)
            .and_then(|ts| ts.get(&1).and_then(|f| f.as_varint()))
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));

        Some(ProtoTokens {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    fn load_api_key(&self) -> Option<String> {
        let value = statedb::read_item(self.statedb.as_ref(), &self.state_db_path, AUTH_STATUS_KEY)?;
        let status: serde_json::Value = serde_json::from_str(&value).ok()?;
        status
            .get("apiKey")
            .and_then(|k| k.as_str())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }

    async fn load_cached_token(&self) -> Option<String> {
        let path = self.token_cache_file.as_ref()?;
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let cached: CachedToken = serde_json::from_str(&content).ok()?;
        if cached.expires_at <= Utc::now().timestamp() {
            return None;
        }
        Some(cached.access_token)
    }

    async fn store_cached_token(&self, access_token: &str, expires_in: i64) {
        let Some(path) = self.token_cache_file.as_ref() else {
            return;
        };
        let cached = CachedToken {
            access_token: access_token.to_string(),
            expires_at: Utc::now().timestamp() + expires_in,
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Ok(content) = serde_json::to_string(&cached) {
            if let Err(e) = tokio::fs::write(path, content).await {
                tracing::warn!("failed to write antigravity token cache: {}", e);
            }
        }
    }

    fn candidates(&self, proto: Option<&ProtoTokens>, cached: Option<String>) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if let Some(proto) = proto {
            let unexpired = proto.expires_at.map(|exp| exp > Utc::now()).unwrap_or(true);
            if unexpired && !proto.access_token.is_empty() {
                candidates.push(Candidate {
                    token: proto.access_token.clone(),
                    transport: AuthTransport::Bearer,
                });
            }
        }
        if let Some(cached) = cached {
            if !candidates.iter().any(|c| c.token == cached) {
                candidates.push(Candidate {
                    token: cached,
                    transport: AuthTransport::Bearer,
                });
            }
        }
        if let Some(api_key) = self.load_api_key() {
            if !candidates.iter().any(|c| c.token == api_key) {
                candidates.push(Candidate {
                    token: api_key,
                    transport: AuthTransport::QueryKey,
                });
            }
        }
        candidates
    }

    // -- Cloud Code API --

    async fn probe_cloud_code(&self, candidate: &Candidate) -> ProbeOutcome {
        for base in CLOUD_CODE_BASES {
            let url = match candidate.transport {
                AuthTransport::Bearer => format!("{base}{FETCH_MODELS_PATH}"),
                AuthTransport::QueryKey => {
                    format!("{base}{FETCH_MODELS_PATH}?key={}", candidate.token)
                }
            };
            let mut request = HttpRequest::post(url).json_body(&serde_json::json!({}));
            if candidate.transport == AuthTransport::Bearer {
                request = request.header("Authorization", format!("Bearer {}", candidate.token));
            }

            let response = match self.http.execute(request).await {
                Ok(response) => response,
                // Transport failure: fall through to the next base URL.
                Err(e) => {
                    tracing::debug!("cloud code probe failed: {}", e);
                    continue;
                }
            };

            if response.is_auth_error() {
                return ProbeOutcome {
                    data: None,
                    auth_failed: true,
                };
            }
            if response.is_success() {
                if let Ok(data) = response.json::<serde_json::Value>() {
                    return ProbeOutcome {
                        data: Some(data),
                        auth_failed: false,
                    };
                }
            }
        }

        ProbeOutcome {
            data: None,
            auth_failed: false,
        }
    }

    // -- Google OAuth refresh --

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, ProviderError> {
        let body: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", GOOGLE_CLIENT_ID)
            .append_pair("client_secret", GOOGLE_CLIENT_SECRET)
            .append_pair("refresh_token", refresh_token)
            .append_pair("grant_type", "refresh_token")
            .finish();
        let request = HttpRequest::post(GOOGLE_OAUTH_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body.into_bytes());
        let response = self.http.execute(request).await?;

        if !response.is_success() {
            return Err(ProviderError::RefreshFailed);
        }
        let parsed: GoogleRefreshResponse =
            response.json().map_err(|_| ProviderError::RefreshFailed)?;

        self.store_cached_token(&parsed.access_token, parsed.expires_in.unwrap_or(3600))
            .await;
        Ok(parsed.access_token)
    }

    // -- Model parsing --

    fn parse_models(&self, data: &serde_json::Value) -> Vec<MetricLine> {
        let Some(models) = data.get("models").and_then(|m| m.as_object()) else {
            return Vec::new();
        };

        let mut lines = Vec::new();
        for (key, model) in models {
            if model.get("isInternal").and_then(|v| v.as_bool()) == Some(true) {
                continue;
            }
            let model_id = model.get("model").and_then(|v| v.as_str()).unwrap_or(key);
            if MODEL_BLACKLIST.contains(&model_id) {
                continue;
            }
            let Some(display_name) = model
                .get("displayName")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            else {
                continue;
            };
            let Some(remaining) = model
                .get("quotaInfo")
                .and_then(|q| q.get("remainingFraction"))
                .and_then(|f| f.as_f64())
            else {
                continue;
            };

            let used = ((1.0 - remaining.clamp(0.0, 1.0)) * 100.0).round();
            let resets_at = model
                .get("quotaInfo")
                .and_then(|q| q.get("resetTime"))
                .and_then(|r| r.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            lines.push(MetricLine::Progress(ProgressMetric {
                label: display_name.to_string(),
                used,
                limit: 100.0,
                format: MetricFormat::Percent,
                resets_at,
                period_seconds: Some(5 * 60 * 60),
            }));
        }

        lines
    }
}

#[async_trait]
impl UsageFetcher for AntigravityProvider {
    fn provider(&self) -> ProviderId {
        ProviderId::Antigravity
    }

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
        let proto = self.load_proto_tokens();
        let cached = self.load_cached_token().await;
        let candidates = self.candidates(proto.as_ref(), cached);

        if candidates.is_empty() {
            return Err(ProviderError::NotLoggedIn(TRY_AGAIN.to_string()));
        }

        let mut data = None;
        let mut auth_failed = false;
        for candidate in &candidates {
            let outcome = self.probe_cloud_code(candidate).await;
            if outcome.data.is_some() {
                data = outcome.data;
                break;
            }
            if outcome.auth_failed {
                auth_failed = true;
            }
        }

        // One refresh when every candidate was rejected for auth.
        if data.is_none() && auth_failed {
            if let Some(refresh_token) = proto.as_ref().and_then(|p| p.refresh_token.clone()) {
                if let Ok(refreshed) = self.refresh_access_token(&refresh_token).await {
                    let outcome = self
                        .probe_cloud_code(&Candidate {
                            token: refreshed,
                            transport: AuthTransport::Bearer,
                        })
                        .await;
                    data = outcome.data;
                }
            }
        }

        let Some(data) = data else {
            return Err(ProviderError::NoData(TRY_AGAIN.to_string()));
        };

        let lines = self.parse_models(&data);
        if lines.is_empty() {
            return Err(ProviderError::NoData(TRY_AGAIN.to_string()));
        }

        Ok(ProviderUsageResult::new(
            ProviderId::Antigravity,
            None,
            finalize_lines(lines),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct GoogleRefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}
