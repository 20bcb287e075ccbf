//! Statweb Client - HTTP clients for the harvest collaborators
//!
//! This crate provides HTTP clients for interacting with:
//!
//! - [`statweb`] - the statistics site (index, metadata and table endpoints)
//! - [`download`] - streaming of large tables to scratch files
//! - [`ckan`] - the CKAN catalog and its file store
//!
//! # Overview
//!
//! [`StatwebClient`] implements `IndicatorSource` and [`CkanCatalog`]
//! implements `CatalogClient`, so both plug straight into
//! `statweb_core::HarvestService`.

pub mod ckan;
pub mod download;
pub mod statweb;

// Re-export main client types
pub use ckan::CkanCatalog;
pub use download::LargeFileDownloader;
pub use statweb::StatwebClient;

use statweb_core::AppError;

/// Maps a transport-level reqwest failure onto the error taxonomy.
pub(crate) fn request_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {}", e))
    } else {
        AppError::ClientError(e.to_string())
    }
}
