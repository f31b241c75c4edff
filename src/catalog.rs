//! Upstream release catalog client.
//!
//! Fetches the JSON release feed and normalizes it into [`Release`] values.
//! Release candidates (`"rc"` anywhere in the version) and development
//! snapshots (`"next"` prefix) are never built and never surface here.

use crate::error::BuildError;
use serde::Deserialize;
use std::time::Duration;

/// One buildable upstream release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub version: String,
    /// Tarball location.
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseFeed {
    releases: Vec<Release>,
}

/// Something that can enumerate buildable releases.
pub trait ReleaseSource {
    fn fetch(&self) -> Result<Vec<Release>, BuildError>;
}

pub struct CatalogClient {
    url: String,
}

const FEED_TIMEOUT: Duration = Duration::from_secs(30);

impl CatalogClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ReleaseSource for CatalogClient {
    fn fetch(&self) -> Result<Vec<Release>, BuildError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| BuildError::CatalogUnavailable(e.to_string()))?;
        let feed: ReleaseFeed = http
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| BuildError::CatalogUnavailable(e.to_string()))?
            .json()
            .map_err(|e| BuildError::CatalogUnavailable(e.to_string()))?;

        Ok(feed
            .releases
            .into_iter()
            .filter(|release| is_buildable(&release.version))
            .collect())
    }
}

fn is_buildable(version: &str) -> bool {
    !version.contains("rc") && !version.starts_with("next")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> CatalogClient {
        CatalogClient::new(format!("{}/releases.json", server.url()))
    }

    #[test]
    fn fetch_excludes_prereleases() {
        let mut server = mockito::Server::new();
        let _feed = server
            .mock("GET", "/releases.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"releases":[
                    {"version":"6.10-rc3","source":"https://cdn/linux-6.10-rc3.tar.xz"},
                    {"version":"next-20240607","source":"https://cdn/linux-next.tar.xz"},
                    {"version":"6.9.2","source":"https://cdn/linux-6.9.2.tar.xz"},
                    {"version":"4.9","source":"https://cdn/linux-4.9.tar.xz"}
                ]}"#,
            )
            .create();

        let releases = client_for(&server).fetch().unwrap();
        let versions: Vec<_> = releases.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["6.9.2", "4.9"]);
    }

    #[test]
    fn fetch_fails_on_http_error() {
        let mut server = mockito::Server::new();
        let _feed = server
            .mock("GET", "/releases.json")
            .with_status(503)
            .create();

        let err = client_for(&server).fetch().unwrap_err();
        assert!(matches!(err, BuildError::CatalogUnavailable(_)));
    }

    #[test]
    fn fetch_fails_on_malformed_payload() {
        let mut server = mockito::Server::new();
        let _feed = server
            .mock("GET", "/releases.json")
            .with_status(200)
            .with_body("{\"releases\": \"not an array\"}")
            .create();

        let err = client_for(&server).fetch().unwrap_err();
        assert!(matches!(err, BuildError::CatalogUnavailable(_)));
    }
}
