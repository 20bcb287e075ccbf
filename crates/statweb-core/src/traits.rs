//! Trait definitions for the pipeline's collaborators.
//!
//! The stage machine talks to three external systems: the statistics site
//! it harvests from, the ledger that keeps harvest objects between stages,
//! and the dataset catalog it publishes to. Each one sits behind a trait so
//! the pipeline can run against in-memory mocks in tests.
//!
//! # Example
//!
//! ```
//! use statweb_core::traits::IndicatorSource;
//! use statweb_core::AppError;
//!
//! async fn index_size<R: IndicatorSource>(source: &R, url: &str) -> Result<usize, AppError> {
//!     let index = source.get_json(url).await?;
//!     Ok(statweb_core::models::first_list(&index).map_or(0, Vec::len))
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use serde_json::Value;
use uuid::Uuid;

use crate::AppError;
use crate::models::{DatasetRecord, HarvestObject, ObjectState, ServiceIdentity, Stage};

/// Remote publisher of indicator indexes, metadata and tables.
pub trait IndicatorSource: Send + Sync + Clone {
    /// Fetches and parses a JSON document.
    ///
    /// # Errors
    ///
    /// Transport failures and non-2xx answers are errors, as is a body that
    /// is not JSON.
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, AppError>> + Send;

    /// Streams a remote file into a new scratch file inside `dir`.
    ///
    /// Returns the path of the created file. Nothing is created when the
    /// remote answers with an error status.
    fn download(
        &self,
        url: &str,
        dir: &Path,
    ) -> impl Future<Output = Result<PathBuf, AppError>> + Send;
}

/// Durable store of harvest objects.
pub trait HarvestLedger: Send + Sync + Clone {
    /// Creates a harvest object in state `Discovered`.
    ///
    /// # Arguments
    ///
    /// * `job_id` - The owning harvest job
    /// * `guid` - Content-hash identifier of the indicator
    /// * `payload` - Initial serialized payload
    fn create(
        &self,
        job_id: Uuid,
        guid: &str,
        payload: &str,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Loads a harvest object, or `None` if it does not exist.
    fn load(&self, id: Uuid) -> impl Future<Output = Result<Option<HarvestObject>, AppError>> + Send;

    /// Replaces the payload of an object and moves it to `state`.
    fn save(
        &self,
        id: Uuid,
        payload: &str,
        state: ObjectState,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Records an error against an object and marks it `Failed`.
    ///
    /// The payload is left untouched.
    fn mark_error(
        &self,
        id: Uuid,
        message: &str,
        stage: Stage,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Dataset catalog with create-or-update-by-id semantics.
pub trait CatalogClient: Send + Sync + Clone {
    /// Creates the dataset, or updates it when its id already exists.
    ///
    /// Returns the name the dataset is stored under: `record.name` for a new
    /// dataset, the name it already had for an update.
    fn create_or_update(
        &self,
        record: &DatasetRecord,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Uploads a local file to the catalog file store and returns its public URL.
    fn upload_file(&self, path: &Path) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Returns a dataset name derived from `title` that is free in the catalog.
    fn generate_unique_name(
        &self,
        title: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Returns the identity catalog writes are performed as. Checked once
    /// before a run; the pipeline itself does not use it.
    fn service_identity(&self) -> impl Future<Output = Result<ServiceIdentity, AppError>> + Send;
}
