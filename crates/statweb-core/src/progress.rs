//! Progress reporting for harvest runs.
//!
//! The harvest service emits [`HarvestEvent`]s; frontends decide what to do
//! with them. The CLI logs them through [`TracingReporter`], tests use
//! [`SilentReporter`].

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::Stage;
use crate::stats::HarvestStats;

// =============================================================================
// Harvest Events
// =============================================================================

/// Events emitted while a job runs.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// A job started over `sources` index endpoints.
    JobStarted { job_id: Uuid, sources: usize },
    /// An index endpoint was read and its entries stored.
    SourceGathered {
        name: &'a str,
        url: &'a str,
        objects: usize,
    },
    /// An index endpoint could not be read; the job goes on.
    SourceFailed {
        name: &'a str,
        url: &'a str,
        error: &'a str,
    },
    /// An object was enriched.
    ObjectFetched { object_id: Uuid },
    /// An object was published to the catalog.
    ObjectImported { object_id: Uuid, name: &'a str },
    /// An object failed at some stage.
    ObjectFailed {
        object_id: Uuid,
        stage: Stage,
        error: &'a str,
    },
    /// The job finished.
    JobCompleted {
        job_id: Uuid,
        stats: &'a HarvestStats,
    },
}

/// Receiver of harvest events.
pub trait ProgressReporter: Send + Sync {
    /// Called when a harvest event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Tracing-based reporter for CLI logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::JobStarted { job_id, sources } => {
                info!(%job_id, sources, "Harvest job started");
            }
            HarvestEvent::SourceGathered { name, url, objects } => {
                info!(source = name, url, objects, "Index gathered");
            }
            HarvestEvent::SourceFailed { name, url, error } => {
                warn!(source = name, url, error, "Index unavailable, skipping");
            }
            HarvestEvent::ObjectFetched { object_id } => {
                tracing::debug!(%object_id, "Object fetched");
            }
            HarvestEvent::ObjectImported { object_id, name } => {
                info!(%object_id, name, "Dataset published");
            }
            HarvestEvent::ObjectFailed {
                object_id,
                stage,
                error,
            } => {
                error!(%object_id, %stage, error, "Object failed");
            }
            HarvestEvent::JobCompleted { job_id, stats } => {
                info!(
                    %job_id,
                    gathered = stats.gathered,
                    fetched = stats.fetched,
                    imported = stats.imported,
                    failed = stats.failed(),
                    "Harvest job completed"
                );
            }
        }
    }
}
