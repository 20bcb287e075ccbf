//! Streaming download of large tables into the scratch directory.
//!
//! Some numerator tables weigh tens of megabytes. The body is copied chunk
//! by chunk through a bounded write buffer, so memory use does not depend on
//! the size of the table.

use std::path::{Path, PathBuf};

use reqwest::{Client, Response, Url};
use statweb_core::AppError;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::request_error;

/// Prefix used when the URL has no usable last segment.
const FALLBACK_PREFIX: &str = "download";

/// Downloader writing each remote file to a fresh scratch file.
#[derive(Clone)]
pub struct LargeFileDownloader {
    client: Client,
    chunk_size: usize,
    timeout_secs: u64,
}

impl LargeFileDownloader {
    /// Creates a downloader sharing `client`.
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for the requests
    /// * `chunk_size` - Capacity of the write buffer, at least one byte
    /// * `timeout_secs` - Client timeout, reported in timeout errors
    pub fn new(client: Client, chunk_size: usize, timeout_secs: u64) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            timeout_secs,
        }
    }

    /// Streams `url` into a new file inside `dir` and returns its path.
    ///
    /// The file is named after the last URL segment plus a random suffix.
    /// Nothing is left on disk when the server answers with an error status
    /// or the transfer breaks midway.
    ///
    /// # Errors
    ///
    /// Returns `AppError::HttpStatus` for non-2xx answers, a transport error
    /// when the connection fails, `AppError::Io` when the scratch file cannot
    /// be written.
    pub async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, AppError> {
        let parsed = Url::parse(url).map_err(|_| AppError::InvalidUrl(url.to_string()))?;

        let mut resp = self
            .client
            .get(parsed.clone())
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

        tokio::fs::create_dir_all(dir).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix(&format!("{}_", scratch_prefix(&parsed)))
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| AppError::Io(e.error))?;

        let mut writer = BufWriter::with_capacity(self.chunk_size, File::from_std(file));
        match self.copy_body(&mut resp, &mut writer).await {
            Ok(bytes) => {
                tracing::debug!(url, path = %path.display(), bytes, "Download complete");
                Ok(path)
            }
            Err(e) => {
                drop(writer);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %rm, "Cannot remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn copy_body(
        &self,
        resp: &mut Response,
        writer: &mut BufWriter<File>,
    ) -> Result<u64, AppError> {
        let mut written = 0u64;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?
        {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

/// Filesystem-safe prefix taken from the last path segment of a URL.
fn scratch_prefix(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let safe: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    if safe.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        safe
    }
}
