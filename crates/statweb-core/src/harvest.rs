//! Harvest service: the gather → fetch → import stage machine.
//!
//! # Architecture
//!
//! The [`HarvestService`] is generic over three traits:
//! - [`HarvestLedger`] - keeps harvest objects between stages
//! - [`IndicatorSource`] - reads indexes, metadata and tables from the statistics site
//! - [`CatalogClient`] - publishes datasets and hosts converted tables
//!
//! # Stages
//!
//! 1. **Gather** reads every configured index and stores one object per
//!    entry, in state `Discovered`. An unreadable index is skipped.
//! 2. **Fetch** retrieves the metadata document (legacy entries only) and
//!    every declared sub-resource, downloads the CSV counterparts to the
//!    scratch directory and stores the enriched payload (`Enriched`). A
//!    missing sub-resource is dropped; a missing metadata document fails
//!    the object.
//! 3. **Import** normalizes the metadata, converts and uploads the tables
//!    and hands the dataset to the catalog (`Imported`). A missing object or
//!    an empty payload fails the object.
//!
//! Each stage is callable on its own so an external scheduler can retry a
//! single object. [`HarvestService::run_job`] chains them for one job.
//!
//! Errors raised by the ledger itself are propagated: without the ledger no
//! stage can record anything.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{HarvestConfig, SourceEntry};
use crate::error::{AppError, ErrorKind};
use crate::mapping::normalize;
use crate::models::{
    DatasetRecord, FetchedResource, HarvestJob, HarvestObject, HarvestPayload, IndicatorRecord,
    License, ObjectState, PUBLISHER_EMAIL, ResourceAttachment, Stage, first_key, first_list,
    first_record,
};
use crate::progress::{HarvestEvent, ProgressReporter, SilentReporter};
use crate::stats::{HarvestStats, StageOutcome};
use crate::tabular;
use crate::traits::{CatalogClient, HarvestLedger, IndicatorSource};

/// Returns the CSV counterpart of a JSON endpoint.
///
/// Upstream serves every table in both formats, selected by the `fmt`
/// query parameter. Returns `None` when the URL carries no `fmt=json`.
///
/// # Examples
///
/// ```
/// use statweb_core::harvest::csv_url;
///
/// assert_eq!(
///     csv_url("http://x/exp.aspx?fmt=json&idind=7").as_deref(),
///     Some("http://x/exp.aspx?fmt=csv&idind=7")
/// );
/// assert_eq!(csv_url("http://x/exp.aspx?idind=7"), None);
/// ```
pub fn csv_url(json_url: &str) -> Option<String> {
    let (base, query) = json_url.split_once('?')?;
    let mut found = false;
    let params: Vec<&str> = query
        .split('&')
        .map(|param| match param.split_once('=') {
            Some((name, value))
                if name.eq_ignore_ascii_case("fmt") && value.eq_ignore_ascii_case("json") =>
            {
                found = true;
                "fmt=csv"
            }
            _ => param,
        })
        .collect();

    found.then(|| format!("{}?{}", base, params.join("&")))
}

/// Service running the harvest stages.
///
/// # Type Parameters
///
/// * `L` - Ledger implementation (e.g., `ObjectRepository`)
/// * `R` - Remote source implementation (e.g., `StatwebClient`)
/// * `C` - Catalog implementation (e.g., `CkanCatalog`)
///
/// # Example
///
/// ```ignore
/// use statweb_core::{HarvestJob, HarvestService, SourceEntry};
///
/// let service = HarvestService::new(ledger, source, catalog);
/// let job = HarvestJob::new(vec![SourceEntry::new("legacy", index_url)]);
/// let stats = service.run_job(&job).await?;
/// println!("{} of {} indicators published", stats.imported, stats.gathered);
/// ```
pub struct HarvestService<L, R, C>
where
    L: HarvestLedger,
    R: IndicatorSource,
    C: CatalogClient,
{
    ledger: L,
    source: R,
    catalog: C,
    config: HarvestConfig,
}

impl<L, R, C> Clone for HarvestService<L, R, C>
where
    L: HarvestLedger,
    R: IndicatorSource,
    C: CatalogClient,
{
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            source: self.source.clone(),
            catalog: self.catalog.clone(),
            config: self.config.clone(),
        }
    }
}

impl<L, R, C> HarvestService<L, R, C>
where
    L: HarvestLedger,
    R: IndicatorSource,
    C: CatalogClient,
{
    /// Creates a new harvest service with default configuration.
    ///
    /// # Arguments
    ///
    /// * `ledger` - Store for harvest objects
    /// * `source` - Client for the statistics site
    /// * `catalog` - Client for the dataset catalog
    pub fn new(ledger: L, source: R, catalog: C) -> Self {
        Self::with_config(ledger, source, catalog, HarvestConfig::default())
    }

    /// Creates a harvest service with custom configuration.
    pub fn with_config(ledger: L, source: R, catalog: C, config: HarvestConfig) -> Self {
        Self {
            ledger,
            source,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    // =========================================================================
    // Gather
    // =========================================================================

    /// Reads every index of the job and stores one harvest object per entry.
    ///
    /// Returns the ids of the created objects. An index that cannot be read
    /// contributes no ids and does not stop the others.
    ///
    /// # Errors
    ///
    /// Only ledger failures are returned.
    pub async fn gather_stage(&self, job: &HarvestJob) -> Result<Vec<Uuid>, AppError> {
        self.gather_stage_with_progress(job, &SilentReporter).await
    }

    /// Same as [`gather_stage`](Self::gather_stage), with progress events.
    pub async fn gather_stage_with_progress<P: ProgressReporter>(
        &self,
        job: &HarvestJob,
        reporter: &P,
    ) -> Result<Vec<Uuid>, AppError> {
        let (ids, _) = self.gather_sources(job, reporter).await?;
        Ok(ids)
    }

    /// Gathers every source; returns the ids and the number of unreadable sources.
    async fn gather_sources<P: ProgressReporter>(
        &self,
        job: &HarvestJob,
        reporter: &P,
    ) -> Result<(Vec<Uuid>, usize), AppError> {
        debug!(job_id = %job.id, "In gather stage");
        let mut ids = Vec::new();
        let mut failed_sources = 0;

        for source in &job.sources {
            let entries = match self.read_index(source).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(source = %source.name, url = %source.url, error = %e, "Cannot read index");
                    reporter.report(HarvestEvent::SourceFailed {
                        name: &source.name,
                        url: &source.url,
                        error: &e.to_string(),
                    });
                    failed_sources += 1;
                    continue;
                }
            };

            let mut created = 0;
            for entry in entries {
                let Value::Object(entry) = entry else {
                    warn!(source = %source.name, "Skipping index entry that is not an object");
                    continue;
                };
                let Some(record) = IndicatorRecord::from_index_entry(entry) else {
                    warn!(source = %source.name, "Skipping index entry without identifier");
                    continue;
                };

                let payload = HarvestPayload::from(record);
                let id = self
                    .ledger
                    .create(job.id, &payload.record.guid, &payload.to_json()?)
                    .await?;
                ids.push(id);
                created += 1;
            }

            reporter.report(HarvestEvent::SourceGathered {
                name: &source.name,
                url: &source.url,
                objects: created,
            });
        }

        Ok((ids, failed_sources))
    }

    /// Reads the entry list of one index.
    async fn read_index(&self, source: &SourceEntry) -> Result<Vec<Value>, AppError> {
        let document = self.source.get_json(&source.url).await?;
        first_list(&document)
            .cloned()
            .ok_or_else(|| AppError::MalformedIndex(source.url.clone()))
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Enriches one harvest object with its metadata and sub-resources.
    ///
    /// Returns `Ok(false)` when the object was marked failed: unreadable
    /// payload, or metadata document unavailable. In that case the stored
    /// payload is left as it was.
    ///
    /// # Errors
    ///
    /// Only ledger failures are returned.
    pub async fn fetch_stage(&self, object: &HarvestObject) -> Result<bool, AppError> {
        self.fetch_stage_with_progress(object, &SilentReporter).await
    }

    /// Same as [`fetch_stage`](Self::fetch_stage), with progress events.
    pub async fn fetch_stage_with_progress<P: ProgressReporter>(
        &self,
        object: &HarvestObject,
        reporter: &P,
    ) -> Result<bool, AppError> {
        debug!(object_id = %object.id, "In fetch stage");

        let content = object.content.as_deref().unwrap_or_default();
        if content.trim().is_empty() {
            let message = format!("Empty content for object {}", object.id);
            self.fail(object.id, Stage::Fetch, &message, reporter).await?;
            return Ok(false);
        }

        let mut payload = match HarvestPayload::from_json(content) {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("Cannot parse payload: {}", e);
                self.fail(object.id, Stage::Fetch, &message, reporter).await?;
                return Ok(false);
            }
        };

        let mut metadata = if payload.record.schema.requires_metadata_fetch() {
            let url = payload.record.source_url().unwrap_or_default().to_string();
            match self.fetch_metadata(&url).await {
                Ok(metadata) => metadata,
                Err(message) => {
                    self.fail(object.id, Stage::Fetch, &message, reporter).await?;
                    return Ok(false);
                }
            }
        } else {
            payload.record.entry.clone()
        };

        let mut resources = Vec::new();
        for key in payload.record.schema.dataset_keys() {
            let Some(url) = metadata.get(*key).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };

            match self.fetch_resource(&url).await {
                Ok((data, data_url)) => {
                    let csv_path = self.download_csv(&data_url).await;
                    resources.push(FetchedResource {
                        key: key.to_string(),
                        name: first_key(&data).map(str::to_string),
                        url,
                        data,
                        csv_path,
                    });
                }
                Err(e) => {
                    warn!(object_id = %object.id, key, url = %url, error = %e, "Dropping resource");
                    metadata.remove(*key);
                }
            }
        }

        // a retried fetch replaces the tables of the previous one
        for stale in payload.resources.iter().filter_map(|r| r.csv_path.as_deref()) {
            remove_scratch(stale).await;
        }

        payload.metadata = Some(metadata);
        payload.resources = resources;
        self.ledger
            .save(object.id, &payload.to_json()?, ObjectState::Enriched)
            .await?;

        reporter.report(HarvestEvent::ObjectFetched {
            object_id: object.id,
        });
        Ok(true)
    }

    /// Retrieves the metadata document of a legacy entry.
    ///
    /// The error is the message recorded against the object.
    async fn fetch_metadata(&self, url: &str) -> Result<Map<String, Value>, String> {
        let document = self
            .source
            .get_json(url)
            .await
            .map_err(|e| format!("Cannot get {}: {}", url, e))?;

        first_record(&document)
            .cloned()
            .ok_or_else(|| format!("Metadata document at {} has no records", url))
    }

    /// Retrieves a sub-resource, following one level of indirection.
    ///
    /// Returns the data and the URL it was actually read from.
    async fn fetch_resource(&self, url: &str) -> Result<(Value, String), AppError> {
        let data = self.source.get_json(url).await?;

        let target = first_record(&data)
            .and_then(|record| record.get("URL"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match target {
            Some(target) => {
                debug!(from = url, to = %target, "Following resource indirection");
                let data = self.source.get_json(&target).await?;
                Ok((data, target))
            }
            None => Ok((data, url.to_string())),
        }
    }

    /// Downloads the CSV counterpart of a JSON endpoint into the scratch directory.
    async fn download_csv(&self, json_url: &str) -> Option<PathBuf> {
        let Some(url) = csv_url(json_url) else {
            debug!(url = json_url, "No CSV counterpart");
            return None;
        };

        match self.source.download(&url, &self.config.scratch_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(url = %url, error = %e, "CSV download failed, keeping JSON only");
                None
            }
        }
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Loads an object from the ledger and imports it.
    pub async fn import_object(&self, id: Uuid) -> Result<DatasetRecord, AppError> {
        let object = self.ledger.load(id).await?;
        self.import_stage(object.as_ref()).await
    }

    /// Builds the dataset of one harvest object and publishes it.
    ///
    /// # Errors
    ///
    /// Fails when the object is missing, its payload is empty or has no
    /// metadata, or the catalog rejects the dataset. Everything except a
    /// missing object is recorded against the object.
    pub async fn import_stage(
        &self,
        object: Option<&HarvestObject>,
    ) -> Result<DatasetRecord, AppError> {
        self.import_stage_with_progress(object, &SilentReporter).await
    }

    /// Same as [`import_stage`](Self::import_stage), with progress events.
    pub async fn import_stage_with_progress<P: ProgressReporter>(
        &self,
        object: Option<&HarvestObject>,
        reporter: &P,
    ) -> Result<DatasetRecord, AppError> {
        let Some(object) = object else {
            error!("No harvest object received");
            return Err(AppError::ObjectNotFound("no object received".to_string()));
        };
        debug!(object_id = %object.id, "In import stage");

        let content = object.content.as_deref().unwrap_or_default();
        if content.trim().is_empty() {
            let err = AppError::EmptyContent(object.id);
            self.fail(object.id, Stage::Import, &err.to_string(), reporter)
                .await?;
            return Err(err);
        }

        let payload = match HarvestPayload::from_json(content) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(object.id, Stage::Import, &e.to_string(), reporter)
                    .await?;
                return Err(e);
            }
        };

        let Some(metadata) = payload.metadata.as_ref() else {
            let err = AppError::MetadataError(format!("Object {} was never fetched", object.id));
            self.fail(object.id, Stage::Import, &err.to_string(), reporter)
                .await?;
            return Err(err);
        };

        match self.publish(&payload, metadata).await {
            Ok(record) => {
                self.ledger
                    .save(object.id, content, ObjectState::Imported)
                    .await?;
                reporter.report(HarvestEvent::ObjectImported {
                    object_id: object.id,
                    name: &record.name,
                });
                Ok(record)
            }
            Err(e) if e.kind() == ErrorKind::Ledger => Err(e),
            Err(e) => {
                self.fail(object.id, Stage::Import, &e.to_string(), reporter)
                    .await?;
                Err(e)
            }
        }
    }

    /// Builds the dataset, attaches its resources and sends it to the catalog.
    async fn publish(
        &self,
        payload: &HarvestPayload,
        metadata: &Map<String, Value>,
    ) -> Result<DatasetRecord, AppError> {
        let record = &payload.record;
        let normalized = normalize(record, metadata, Utc::now());
        let attribution = record.attribution().to_string();

        let mut resources = Vec::new();
        for resource in &payload.resources {
            let declared = metadata
                .get(&resource.key)
                .and_then(Value::as_str)
                .is_some();
            if !declared {
                continue;
            }

            let name = resource.name.as_deref().unwrap_or(resource.key.as_str());
            let json = ResourceAttachment::json(&resource.url, name, normalized.modified);

            let csv = match &resource.csv_path {
                Some(path) => self.attach_csv(&json, path).await,
                None => {
                    warn!(guid = %record.guid, key = %resource.key, "No CSV downloaded, attaching JSON only");
                    None
                }
            };

            resources.push(json);
            resources.extend(csv);
        }

        let name = self.catalog.generate_unique_name(&normalized.title).await?;

        let mut dataset = DatasetRecord {
            id: record.guid.clone(),
            name,
            title: normalized.title,
            groups: vec![normalized.category.clone()],
            category: normalized.category,
            url: self.config.documentation_url.clone(),
            notes: normalized.description,
            author: attribution.clone(),
            author_email: PUBLISHER_EMAIL.to_string(),
            maintainer: attribution,
            maintainer_email: PUBLISHER_EMAIL.to_string(),
            tags: normalized.tags,
            license: License::cc_by_it(),
            extras: normalized.extras,
            metadata_created: Some(normalized.created),
            metadata_modified: normalized.modified,
            resources,
        };

        // an existing dataset keeps the name it was created with
        dataset.name = self.catalog.create_or_update(&dataset).await?;
        info!(id = %dataset.id, name = %dataset.name, "Dataset published");
        Ok(dataset)
    }

    /// Converts a scratch CSV, uploads it and returns the hosted attachment.
    ///
    /// Both scratch files are gone afterwards, except when conversion fails.
    async fn attach_csv(&self, json: &ResourceAttachment, path: &Path) -> Option<ResourceAttachment> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "Scratch CSV missing, attaching JSON only");
            return None;
        }

        let input = path.to_path_buf();
        let converted = match tokio::task::spawn_blocking(move || tabular::convert_file(&input)).await {
            Ok(Ok(converted)) => converted,
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "CSV conversion failed");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "CSV conversion task failed");
                return None;
            }
        };
        remove_scratch(path).await;

        let attachment = match self.catalog.upload_file(&converted).await {
            Ok(url) => Some(json.csv_copy(&url)),
            Err(e) => {
                warn!(path = %converted.display(), error = %e, "CSV upload failed");
                None
            }
        };
        remove_scratch(&converted).await;
        attachment
    }

    // =========================================================================
    // Job
    // =========================================================================

    /// Runs gather, fetch and import for one job.
    ///
    /// Objects that fail a stage are counted and skipped by later stages.
    pub async fn run_job(&self, job: &HarvestJob) -> Result<HarvestStats, AppError> {
        self.run_job_with_progress(job, &SilentReporter).await
    }

    /// Same as [`run_job`](Self::run_job), with progress events.
    pub async fn run_job_with_progress<P: ProgressReporter>(
        &self,
        job: &HarvestJob,
        reporter: &P,
    ) -> Result<HarvestStats, AppError> {
        reporter.report(HarvestEvent::JobStarted {
            job_id: job.id,
            sources: job.sources.len(),
        });

        let mut stats = HarvestStats::new();
        let (ids, failed_sources) = self.gather_sources(job, reporter).await?;
        for _ in 0..failed_sources {
            stats.record(StageOutcome::Failed(Stage::Gather));
        }
        for _ in &ids {
            stats.record(StageOutcome::Gathered);
        }

        let mut fetched = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(object) = self.ledger.load(id).await? else {
                warn!(object_id = %id, "Gathered object vanished from the ledger");
                stats.record(StageOutcome::Failed(Stage::Fetch));
                continue;
            };
            if object.state == ObjectState::Failed {
                debug!(object_id = %id, "Skipping failed object");
                continue;
            }

            if self.fetch_stage_with_progress(&object, reporter).await? {
                stats.record(StageOutcome::Fetched);
                fetched.push(id);
            } else {
                stats.record(StageOutcome::Failed(Stage::Fetch));
            }
        }

        for id in fetched {
            let object = self.ledger.load(id).await?;
            if object.as_ref().is_some_and(|o| o.state == ObjectState::Failed) {
                debug!(object_id = %id, "Skipping failed object");
                continue;
            }

            match self
                .import_stage_with_progress(object.as_ref(), reporter)
                .await
            {
                Ok(_) => stats.record(StageOutcome::Imported),
                Err(e) if e.kind() == ErrorKind::Ledger => return Err(e),
                Err(_) => stats.record(StageOutcome::Failed(Stage::Import)),
            }
        }

        reporter.report(HarvestEvent::JobCompleted {
            job_id: job.id,
            stats: &stats,
        });
        Ok(stats)
    }

    /// Records an object failure in the ledger and reports it.
    async fn fail<P: ProgressReporter>(
        &self,
        id: Uuid,
        stage: Stage,
        message: &str,
        reporter: &P,
    ) -> Result<(), AppError> {
        error!(object_id = %id, %stage, "{}", message);
        self.ledger.mark_error(id, message, stage).await?;
        reporter.report(HarvestEvent::ObjectFailed {
            object_id: id,
            stage,
            error: message,
        });
        Ok(())
    }
}

/// Deletes a scratch file. A file that is already gone is not an error.
async fn remove_scratch(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove scratch file"),
    }
}
