//! Client for the statistics site JSON endpoints.
//!
//! Every endpoint answers with a JSON object wrapping a single list, e.g.
//! `{"IndicatoriStrutturali": [...]}`. Some endpoints prepend a UTF-8 byte
//! order mark, which is stripped before parsing.

use std::path::{Path, PathBuf};

use reqwest::{Client, Url};
use serde_json::Value;
use statweb_core::config::DEFAULT_CHUNK_SIZE;
use statweb_core::traits::IndicatorSource;
use statweb_core::{AppError, HttpConfig};

use crate::download::LargeFileDownloader;
use crate::request_error;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// HTTP client for the statistics site.
///
/// # Examples
///
/// ```no_run
/// use statweb_client::StatwebClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StatwebClient::new()?;
/// let index = client
///     .fetch_json("http://www.statweb.provincia.tn.it/IndicatoriStrutturali/exp.aspx")
///     .await?;
/// println!("{}", index);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StatwebClient {
    client: Client,
    downloader: LargeFileDownloader,
    timeout_secs: u64,
}

impl StatwebClient {
    /// Creates a client with the default HTTP configuration.
    pub fn new() -> Result<Self, AppError> {
        Self::with_config(&HttpConfig::default(), DEFAULT_CHUNK_SIZE)
    }

    /// Creates a client with a custom HTTP configuration and download chunk size.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn with_config(http_config: &HttpConfig, chunk_size: usize) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(http_config.user_agent.as_str())
            .timeout(http_config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;
        let timeout_secs = http_config.timeout.as_secs();

        Ok(Self {
            downloader: LargeFileDownloader::new(client.clone(), chunk_size, timeout_secs),
            client,
            timeout_secs,
        })
    }

    /// Fetches `url` and parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AppError::HttpStatus` for non-2xx answers,
    /// `AppError::EmptyResponse` for an empty body and
    /// `AppError::SerializationError` when the body is not JSON.
    pub async fn fetch_json(&self, url: &str) -> Result<Value, AppError> {
        let parsed = Url::parse(url).map_err(|_| AppError::InvalidUrl(url.to_string()))?;

        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;
        let body = body.strip_prefix(UTF8_BOM).unwrap_or(&body);
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(AppError::EmptyResponse);
        }

        Ok(serde_json::from_slice(body)?)
    }
}

impl IndicatorSource for StatwebClient {
    async fn get_json(&self, url: &str) -> Result<Value, AppError> {
        self.fetch_json(url).await
    }

    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, AppError> {
        self.downloader.download(url, dir).await
    }
}
