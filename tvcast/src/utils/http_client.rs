use std::time::Duration;

use tracing::warn;

/// Default user agent sent with playlist and artifact downloads.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Build the shared `reqwest::Client` used for playlist ingestion and
/// artifact acquisition.
///
/// Falls back to reqwest defaults if the configured builder cannot be
/// constructed.
pub fn build_http_client(user_agent: &str, request_timeout: Duration) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().user_agent(user_agent.to_string());

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create configured HTTP client; falling back to reqwest defaults"
        );
        reqwest::Client::new()
    })
}
