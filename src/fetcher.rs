//! Fetcher contract consumed from the player's HTTP collaborator (§4.4, C4),
//! plus a default blocking `reqwest` implementation built the same way the
//! teacher builds its HTTP clients (`library/metadata/art_fetcher.rs`,
//! `audio/lyrics_downloader.rs`).

use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::FetchError;

const USER_AGENT: &str = "streamrecorder/0.1";
const TIMEOUT: Duration = Duration::from_secs(15);

/// External collaborator the core consumes synchronously (§4.4, §5). The
/// Recorder holds one instance for its whole process lifetime (init-once,
/// free-once) and never calls it concurrently.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Default implementation backed by `reqwest::blocking`, with an optional
/// HTTP(S) proxy matching `RecorderSettings::proxy`/`control_proxy` (§6).
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(proxy: Option<&str>) -> Result<Self, FetchError> {
        let mut builder = Client::builder().timeout(TIMEOUT).user_agent(USER_AGENT);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| FetchError::Request(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Fetcher for ReqwestFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Request(e.to_string()))
    }
}
