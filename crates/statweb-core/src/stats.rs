//! Counters for a harvest job.

use crate::models::Stage;

/// Outcome of running one stage on one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Gathered,
    Fetched,
    Imported,
    Failed(Stage),
}

/// Statistics for a harvest job.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    /// Objects created by gather.
    pub gathered: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub imported: usize,
    pub import_failed: usize,
    /// Index endpoints that could not be read.
    pub sources_failed: usize,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Gathered => self.gathered += 1,
            StageOutcome::Fetched => self.fetched += 1,
            StageOutcome::Imported => self.imported += 1,
            StageOutcome::Failed(Stage::Gather) => self.sources_failed += 1,
            StageOutcome::Failed(Stage::Fetch) => self.fetch_failed += 1,
            StageOutcome::Failed(Stage::Import) => self.import_failed += 1,
        }
    }

    /// Objects that failed at fetch or import.
    pub fn failed(&self) -> usize {
        self.fetch_failed + self.import_failed
    }

    /// True when every gathered object made it into the catalog.
    pub fn is_complete(&self) -> bool {
        self.sources_failed == 0 && self.failed() == 0 && self.imported == self.gathered
    }
}
