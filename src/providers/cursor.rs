//! Cursor provider
//!
//! Tokens live in Cursor's `state.vscdb` key-value table. The usage API is
//! cookie-authenticated: the session cookie is `{subjectId}::{accessToken}`
//! with the subject pulled from the JWT `sub` claim.

use super::UsageFetcher;
use crate::error::ProviderError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::jwt;
use crate::model::{
    MetricFormat, MetricLine, ProgressMetric, ProviderId, ProviderUsageResult, TextMetric,
};
use crate::normalize::finalize_lines;
use crate::refresh::execute_with_retry;
use crate::storage::{statedb, StateDb};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

const USAGE_URL: &str = "https://cursor.com/api/usage-summary";
const REFRESH_URL: &str = "https://api2.cursor.sh/oauth/token";
const CLIENT_ID: &str = "KbZUR41cY7W6zRSdpSUJ7I7mLYBKOCmB";
const ACCESS_TOKEN_KEY: &str = "cursorAuth/accessToken";
const REFRESH_TOKEN_KEY: &str = "cursorAuth/refreshToken";
const SESSION_COOKIE: &str = "WorkosCursorSessionToken";

const NOT_LOGGED_IN: &str = "Not logged in. Sign in via Cursor app.";
const TOKEN_EXPIRED: &str = "Token expired. Sign in via Cursor app.";

pub struct CursorProvider {
    http: Arc<dyn HttpClient>,
    statedb: Arc<dyn StateDb>,
    state_db_path: PathBuf,
}

impl CursorProvider {
    pub fn new(http: Arc<dyn HttpClient>, statedb: Arc<dyn StateDb>) -> Self {
        let state_db_path = dirs::config_dir()
            .unwrap_or_default()
            .join("Cursor/User/globalStorage/state.vscdb");
        Self {
            http,
            statedb,
            state_db_path,
        }
    }

    // -- Credentials --

    fn read_state_value(&self, key: &str) -> Option<String> {
        statedb::read_item(self.statedb.as_ref(), &self.state_db_path, key)
    }

    // -- Token refresh --

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": CLIENT_ID,
            "refresh_token": refresh_token,
        });
        let request = HttpRequest::post(REFRESH_URL).json_body(&body);
        let response = self.http.execute(request).await?;

        if response.status == 400 || response.status == 401 {
            return Err(ProviderError::AuthExpired(
                "Session expired. Sign in via Cursor app.".to_string(),
            ));
        }
        if !response.is_success() {
            return Err(ProviderError::RefreshFailed);
        }

        let parsed: RefreshResponse = response.json().map_err(|_| ProviderError::RefreshFailed)?;
        Ok(parsed.access_token)
    }

    // -- Usage API --

    async fn fetch_summary(&self, access_token: &str) -> Result<HttpResponse, ProviderError> {
        let request = HttpRequest::get(USAGE_URL)
            .header("Cookie", format!("{SESSION_COOKIE}={}", session_token(access_token)))
            .header("Accept", "application/json");
        self.http.execute(request).await
    }

    fn parse_summary(&self, response: &HttpResponse) -> Result<ProviderUsageResult, ProviderError> {
        let summary: UsageSummary = response.json()?;
        let mut lines: Vec<MetricLine> = Vec::new();

        let cycle_start = summary
            .billing_cycle_start
            .as_deref()
            .and_then(parse_iso_date);
        let cycle_end = summary.billing_cycle_end.as_deref().and_then(parse_iso_date);
        // The billing period comes from the cycle bounds when both are
        // present; a fixed 30-day window otherwise.
        let period_seconds = match (cycle_start, cycle_end) {
            (Some(start), Some(end)) if end > start => (end - start).num_seconds(),
            _ => 30 * 24 * 60 * 60,
        };

        if let Some(plan) = summary
            .individual_usage
            .as_ref()
            .and_then(|u| u.plan.as_ref())
        {
            if let Some(limit_cents) = plan.limit {
                let used_cents = plan
                    .used
                    .unwrap_or_else(|| limit_cents - plan.remaining.unwrap_or(limit_cents));
                lines.push(MetricLine::Progress(ProgressMetric {
                    label: "Plan usage".to_string(),
                    used: used_cents / 100.0,
                    limit: limit_cents / 100.0,
                    format: MetricFormat::Dollars,
                    resets_at: cycle_end,
                    period_seconds: Some(period_seconds),
                }));
            }

            if let Some(bonus_cents) = plan.bonus_spend {
                if bonus_cents > 0.0 {
                    lines.push(MetricLine::Text(TextMetric {
                        label: "Bonus spend".to_string(),
                        value: format!("${:.2}", bonus_cents / 100.0),
                    }));
                }
            }
        }

        if let Some(on_demand) = summary
            .individual_usage
            .as_ref()
            .and_then(|u| u.on_demand.as_ref())
        {
            let limit_cents = on_demand
                .individual_limit
                .or(on_demand.pooled_limit)
                .or(on_demand.limit)
                .unwrap_or(0.0);
            if on_demand.enabled == Some(true) && limit_cents > 0.0 {
                let used_cents = on_demand.used.unwrap_or(0.0);
                lines.push(MetricLine::Progress(ProgressMetric {
                    label: "On-demand".to_string(),
                    used: used_cents / 100.0,
                    limit: limit_cents / 100.0,
                    format: MetricFormat::Dollars,
                    resets_at: None,
                    period_seconds: None,
                }));
            }
        }

        let plan = summary
            .membership_type
            .as_deref()
            .and_then(format_membership_type);
        Ok(ProviderUsageResult::new(
            ProviderId::Cursor,
            plan,
            finalize_lines(lines),
        ))
    }
}

#[async_trait]
impl UsageFetcher for CursorProvider {
    fn provider(&self) -> ProviderId {
        ProviderId::Cursor
    }

    async fn fetch_usage(&self) -> Result<ProviderUsageResult, ProviderError> {
        let mut access_token = self.read_state_value(ACCESS_TOKEN_KEY).unwrap_or_default();
        let refresh_token = self.read_state_value(REFRESH_TOKEN_KEY);

        if access_token.is_empty() {
            let Some(refresh_token) = refresh_token.as_deref() else {
                return Err(ProviderError::NotLoggedIn(NOT_LOGGED_IN.to_string()));
            };
            access_token = self.refresh_access_token(refresh_token).await?;
        }

        // Refresh ahead of expiry when the JWT says we are close.
        let expires_soon = jwt::decode_payload(&access_token)
            .and_then(|claims| claims.expires_at())
            .is_some_and(|exp| Utc::now() + Duration::minutes(5) >= exp);
        if expires_soon {
            if let Some(refresh_token) = refresh_token.as_deref() {
                match self.refresh_access_token(refresh_token).await {
                    Ok(token) => access_token = token,
                    Err(e) => tracing::debug!("cursor pre-refresh failed: {}", e),
                }
            }
        }

        let response = execute_with_retry(
            access_token,
            |token| async move {
                let response = self.fetch_summary(&token).await?;
                Ok((response.clone(), response))
            },
            |_old| async move {
                let refresh_token = refresh_token.ok_or(ProviderError::NoRefreshToken)?;
                self.refresh_access_token(&refresh_token).await
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

        self.parse_summary(&response)
    }
}

/// Session-cookie value: `{subjectId}::{accessToken}`, `::` percent-encoded.
/// Falls back to the bare token when the JWT carries no subject.
fn session_token(access_token: &str) -> String {
    match jwt::decode_payload(access_token)
        .and_then(|claims| claims.subject_id().map(str::to_string))
    {
        Some(subject) => format!("{subject}%3A%3A{access_token}"),
        None => access_token.to_string(),
    }
}

fn parse_iso_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

fn format_membership_type(membership: &str) -> Option<String> {
    if membership.is_empty() {
        return None;
    }
    let label = match membership.to_lowercase().as_str() {
        "free" => "Free".to_string(),
        "pro" => "Pro".to_string(),
        "business" => "Business".to_string(),
        "enterprise" => "Enterprise".to_string(),
        "hobby" => "Hobby".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => return None,
            }
        }
    };
    Some(label)
}

// ---- Response Types ----

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageSummary {
    billing_cycle_start: Option<String>,
    billing_cycle_end: Option<String>,
    membership_type: Option<String>,
    individual_usage: Option<IndividualUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndividualUsage {
    plan: Option<PlanUsage>,
    on_demand: Option<OnDemandUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanUsage {
    used: Option<f64>,
    limit: Option<f64>,
    remaining: Option<f64>,
    #[serde(default)]
    bonus_spend: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnDemandUsage {
    enabled: Option<bool>,
    used: Option<f64>,
    limit: Option<f64>,
    #[serde(default)]
    individual_limit: Option<f64>,
    #[serde(default)]
    pooled_limit: Option<f64>,
}
