//! Generic refresh-and-retry-once protocol
//!
//! Wraps an authenticated call with a single-retry budget: one auth failure
//! triggers one refresh and one retry, and any failure past that point is
//! terminal. Non-auth outcomes of the first call are handed back untouched so
//! callers can apply their own error mapping.

use crate::error::ProviderError;
use crate::http::HttpResponse;
use std::future::Future;

/// Run `action` with `token`; on an auth-failed response, refresh once and
/// retry once.
///
/// * A refresh failure is terminal (`AuthExpired`), never a second refresh.
/// * A retry that errors or returns a non-success response is terminal
///   (`AuthExpired` with `expired_message`).
/// * A first response that is not an auth error is returned as-is, success or
///   not.
pub async fn execute_with_retry<T, A, AFut, R, RFut>(
    token: String,
    action: A,
    refresh: R,
    expired_message: &str,
) -> Result<T, ProviderError>
where
    A: Fn(String) -> AFut,
    AFut: Future<Output = Result<(HttpResponse, T), ProviderError>>,
    R: FnOnce(String) -> RFut,
    RFut: Future<Output = Result<String, ProviderError>>,
{
    let (response, result) = action(token.clone()).await?;
    if !response.is_auth_error() {
        return Ok(result);
    }

    tracing::debug!("auth failure (HTTP {}), refreshing token", response.status);
    let new_token = refresh(token).await.map_err(|e| match e {
        ProviderError::AuthExpired(message) => ProviderError::AuthExpired(message),
        _ => ProviderError::AuthExpired(expired_message.to_string()),
    })?;

    match action(new_token).await {
        Ok((retry_response, retry_result)) if retry_response.is_success() => Ok(retry_result),
        _ => Err(ProviderError::AuthExpired(expired_message.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            body: Vec::new(),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn returns_first_result_when_not_auth_error() {
        let refreshes = AtomicUsize::new(0);
        let result = execute_with_retry(
            "tok".to_string(),
            |token| async move { Ok((response(200), token)) },
            |_| async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Ok("new".to_string())
            },
            "expired",
        )
        .await
        .unwrap();

        assert_eq!(result, "tok");
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refreshes_exactly_once_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let refreshes = AtomicUsize::new(0);

        let result = execute_with_retry(
            "old".to_string(),
            |token| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Ok((response(401), token))
                    } else {
                        Ok((response(200), token))
                    }
                }
            },
            |_| async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            },
            "expired",
        )
        .await
        .unwrap();

        assert_eq!(result, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn double_auth_failure_is_terminal_with_one_refresh() {
        let refreshes = AtomicUsize::new(0);

        let result: Result<String, _> = execute_with_retry(
            "old".to_string(),
            |token| async move { Ok((response(401), token)) },
            |_| async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            },
            "expired",
        )
        .await;

        assert!(matches!(result, Err(ProviderError::AuthExpired(m)) if m == "expired"));
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_is_terminal() {
        let result: Result<String, _> = execute_with_retry(
            "old".to_string(),
            |token| async move { Ok((response(403), token)) },
            |_| async { Err(ProviderError::RefreshFailed) },
            "expired",
        )
        .await;

        assert!(matches!(result, Err(ProviderError::AuthExpired(m)) if m == "expired"));
    }

    #[tokio::test]
    async fn refresh_auth_expired_message_is_preserved() {
        let result: Result<String, _> = execute_with_retry(
            "old".to_string(),
            |token| async move { Ok((response(401), token)) },
            |_| async { Err(ProviderError::AuthExpired("sign in again".to_string())) },
            "expired",
        )
        .await;

        assert!(matches!(result, Err(ProviderError::AuthExpired(m)) if m == "sign in again"));
    }

    #[tokio::test]
    async fn retry_transport_error_is_terminal() {
        let calls = AtomicUsize::new(0);
        let result: Result<String, _> = execute_with_retry(
            "old".to_string(),
            |token| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Ok((response(401), token))
                    } else {
                        Err(ProviderError::Transport("reset".to_string()))
                    }
                }
            },
            |_| async { Ok("fresh".to_string()) },
            "expired",
        )
        .await;

        assert!(matches!(result, Err(ProviderError::AuthExpired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
