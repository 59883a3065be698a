//! Passive check for a newer claudepath release.
//!
//! The check runs as a background task while the command works and is given
//! a short grace period afterwards. It never fails the command: every error
//! is logged at `debug` and treated as "no update".

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// crates.io API endpoint for this crate.
pub const DEFAULT_INDEX_URL: &str = "https://crates.io/api/v1/crates/claudepath";

/// HTTP request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// The running version.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors that can occur while checking for updates.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry returned an error status.
    #[error("registry returned status {0}")]
    Status(u16),

    /// The reported version is not `MAJOR.MINOR.PATCH`.
    #[error("unrecognized version: {0}")]
    InvalidVersion(String),
}

#[derive(Debug, Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Debug, Deserialize)]
struct CrateInfo {
    max_stable_version: Option<String>,
    max_version: Option<String>,
}

/// Parses `1.2.3` (an optional leading `v` is accepted) into its parts.
/// Pre-release and build suffixes are ignored.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let core = version
        .trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// Whether `latest` is strictly newer than `current`. Unparsable versions are
/// never newer.
#[must_use]
pub fn is_newer(latest: &str, current: &str) -> bool {
    match (parse_version(latest), parse_version(current)) {
        (Some(l), Some(c)) => l > c,
        _ => false,
    }
}

/// Builds the HTTP client used for the check.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client() -> Result<Client, UpdateError> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(format!("claudepath/{CURRENT_VERSION}"))
        .build()?)
}

/// Asks the registry at `url` for the newest stable version.
///
/// # Errors
///
/// Returns an error on network failure, a non-success status, or a
/// response without a usable version.
pub async fn fetch_latest_version(client: &Client, url: &str) -> Result<String, UpdateError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(UpdateError::Status(status.as_u16()));
    }
    let body: CrateResponse = response.json().await?;
    let version = body
        .krate
        .max_stable_version
        .or(body.krate.max_version)
        .unwrap_or_default();
    if parse_version(&version).is_none() {
        return Err(UpdateError::InvalidVersion(version));
    }
    Ok(version)
}

/// Returns the newer version available at `url`, if any. Never fails.
pub async fn check(url: &str) -> Option<String> {
    let client = match build_client() {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "Update check skipped");
            return None;
        }
    };
    match fetch_latest_version(&client, url).await {
        Ok(latest) if is_newer(&latest, CURRENT_VERSION) => Some(latest),
        Ok(latest) => {
            debug!(latest = %latest, "claudepath is up to date");
            None
        }
        Err(e) => {
            debug!(error = %e, "Update check failed");
            None
        }
    }
}

/// Starts the check in the background.
#[must_use]
pub fn spawn_check(url: String) -> JoinHandle<Option<String>> {
    tokio::spawn(async move { check(&url).await })
}

/// Waits up to `grace` for a spawned check. Slow or failed checks yield
/// `None`.
pub async fn await_check(handle: JoinHandle<Option<String>>, grace: Duration) -> Option<String> {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            debug!(error = %e, "Update check task failed");
            None
        }
        Err(_) => {
            debug!("Update check timed out");
            None
        }
    }
}

/// Text shown when a newer release exists.
#[must_use]
pub fn notice(latest: &str) -> String {
    format!(
        "A new version of claudepath is available: {latest} (you have {CURRENT_VERSION})\n\
         Run 'cargo install claudepath' to update."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_version("v0.10.0"), Some((0, 10, 0)));
        assert_eq!(parse_version("2.0.0-beta.1"), Some((2, 0, 0)));
        assert_eq!(parse_version("1.4"), Some((1, 4, 0)));
        assert_eq!(parse_version("1.2.3.4"), None);
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_is_newer_compares_numerically() {
        assert!(is_newer("0.10.0", "0.9.9"));
        assert!(!is_newer("0.1.0", "0.1.0"));
        assert!(!is_newer("0.0.9", "0.1.0"));
        assert!(!is_newer("garbage", "0.1.0"));
    }

    #[tokio::test]
    async fn test_fetch_latest_version_reads_max_stable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/crates/claudepath"))
            .and(header("user-agent", format!("claudepath/{CURRENT_VERSION}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "crate": {"max_stable_version": "9.1.0", "max_version": "10.0.0-rc.1"}
            })))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let url = format!("{}/api/v1/crates/claudepath", server.uri());
        let version = fetch_latest_version(&client, &url).await.unwrap();

        assert_eq!(version, "9.1.0");
    }

    #[tokio::test]
    async fn test_fetch_latest_version_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let err = fetch_latest_version(&client, &server.uri()).await.unwrap_err();

        assert!(matches!(err, UpdateError::Status(404)));
    }

    #[tokio::test]
    async fn test_check_swallows_bad_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert_eq!(check(&server.uri()).await, None);
    }

    #[tokio::test]
    async fn test_spawned_check_finds_newer_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "crate": {"max_stable_version": "999.0.0"}
            })))
            .mount(&server)
            .await;

        let handle = spawn_check(server.uri());
        let latest = await_check(handle, Duration::from_secs(5)).await;

        assert_eq!(latest.as_deref(), Some("999.0.0"));
    }

    #[tokio::test]
    async fn test_await_check_gives_up_after_grace() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"crate": {"max_stable_version": "999.0.0"}}))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let handle = spawn_check(server.uri());
        let latest = await_check(handle, Duration::from_millis(100)).await;

        assert_eq!(latest, None);
    }

    #[test]
    fn test_notice_mentions_both_versions() {
        let text = notice("9.9.9");
        assert!(text.contains("9.9.9"));
        assert!(text.contains(CURRENT_VERSION));
    }
}
