use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RequestOptions;
use crate::error::{LabError, Result};

/// Sends the request built by `build`, retrying throttling, server errors and
/// transient connection failures up to `options.retries` extra times.
///
/// Non-success responses that are not retried come back as [`LabError::Api`].
pub(crate) async fn send_with_retry<F>(
    service: &'static str,
    options: RequestOptions,
    build: F,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = options.retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        let mut request = build();

        if let Some(timeout_secs) = options.timeout_secs {
            request = request.timeout(Duration::from_secs(timeout_secs));
        }

        match request.send().await {
            Ok(response) => {
                if response.status().is_success() {
                    return Ok(response);
                }

                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let can_retry = is_retryable_status(status) && attempt + 1 < max_attempts;

                if can_retry {
                    warn!(service, %status, attempt, "retrying request");
                    sleep(retry_delay(attempt, options.retry_delay_ms)).await;
                    attempt += 1;
                    continue;
                }

                debug!(service, %status, "request failed");
                return Err(LabError::Api {
                    service,
                    status,
                    body,
                });
            }
            Err(source) => {
                let can_retry = is_retryable_request_error(&source) && attempt + 1 < max_attempts;

                if can_retry {
                    warn!(service, error = %source, attempt, "retrying request");
                    sleep(retry_delay(attempt, options.retry_delay_ms)).await;
                    attempt += 1;
                    continue;
                }

                return Err(LabError::Request { service, source });
            }
        }
    }
}

/// Builds the shared HTTP client.
pub(crate) fn client(accept_invalid_certs: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(LabError::request("http client"))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_request_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_delay(attempt: u32, base_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor).min(30_000);
    Duration::from_millis(delay_ms)
}
