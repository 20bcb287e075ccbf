//! Statweb Core - Domain types and the harvesting pipeline.
//!
//! This crate turns the structural-indicator indexes of the provincial
//! statistics site into catalog datasets:
//!
//! - **Domain models**: [`IndicatorRecord`], [`HarvestObject`], [`DatasetRecord`], etc.
//! - **Business logic**: metadata normalization, tag cleaning, table conversion
//! - **Services**: [`HarvestService`] running the gather → fetch → import stages
//! - **Traits**: [`IndicatorSource`], [`HarvestLedger`], [`CatalogClient`] for dependency injection
//! - **Progress reporting**: [`ProgressReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! The pipeline never talks to HTTP or PostgreSQL directly. The concrete
//! collaborators live in `statweb-client` and `statweb-db`:
//!
//! - [`IndicatorSource`] - statistics site (JSON endpoints, CSV downloads)
//! - [`HarvestLedger`] - durable harvest objects between stages
//! - [`CatalogClient`] - CKAN catalog and its file store
//!
//! # Example
//!
//! ```ignore
//! use statweb_core::{HarvestJob, HarvestService, SourceEntry, TracingReporter};
//!
//! let service = HarvestService::new(ledger, source, catalog);
//! let job = HarvestJob::new(vec![SourceEntry::new("indicatori-strutturali", index_url)]);
//! let stats = service.run_job_with_progress(&job, &TracingReporter).await?;
//! ```

pub mod config;
pub mod error;
pub mod harvest;
pub mod mapping;
pub mod models;
pub mod progress;
pub mod stats;
pub mod tabular;
pub mod tags;
pub mod traits;

// Configuration
pub use config::{
    HarvestConfig, HttpConfig, SourceEntry, SourcesConfig, default_config_path,
    load_sources_config,
};

// Error handling
pub use error::{AppError, ErrorKind};

// Domain models
pub use models::{
    DatasetRecord, FetchedResource, HarvestJob, HarvestObject, HarvestPayload, HarvesterInfo,
    IndicatorRecord, License, ObjectError, ObjectState, ResourceAttachment, SchemaVariant,
    ServiceIdentity, Stage, content_hash, slugify,
};

// Normalization
pub use mapping::{NormalizedMetadata, normalize};
pub use tags::clean_tags;

// Statistics
pub use stats::{HarvestStats, StageOutcome};

// Progress reporting
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use traits::{CatalogClient, HarvestLedger, IndicatorSource};

// Services (generic over trait implementations)
pub use harvest::HarvestService;
