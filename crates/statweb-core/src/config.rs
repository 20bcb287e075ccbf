//! Configuration types for the harvester.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

/// HTTP client configuration for calls to the statistics site and the catalog.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("statweb-harvester/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Size of one buffered write while streaming a download to disk.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Technical documentation page linked from every harvested dataset.
pub const DOCUMENTATION_URL: &str =
    "http://www.statweb.provincia.tn.it/INDICATORISTRUTTURALI/ElencoIndicatori.aspx";

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Directory where downloaded CSV files wait between fetch and import.
    pub scratch_dir: PathBuf,
    /// Write buffer size used by the large-file downloader.
    pub chunk_size: usize,
    /// Public URL of the catalog; file store links are rewritten onto it.
    pub site_url: String,
    /// Value of the `url` field of every dataset.
    pub documentation_url: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            site_url: "http://localhost:5000".to_string(),
            documentation_url: DOCUMENTATION_URL.to_string(),
        }
    }
}

impl HarvestConfig {
    /// Sets the scratch directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Sets the public catalog URL.
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = url.into();
        self
    }

    /// Sets the download chunk size. Zero is bumped to one byte.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

// =============================================================================
// Index Source Configuration (harvest.toml)
// =============================================================================

/// Default enabled status when not specified in configuration.
fn default_enabled() -> bool {
    true
}

/// Root configuration structure for harvest.toml.
///
/// # Example
///
/// ```toml
/// [[sources]]
/// name = "indicatori-strutturali"
/// url = "http://www.statweb.provincia.tn.it/IndicatoriStrutturali/exp.aspx"
/// description = "Indicatori strutturali"
///
/// [[sources]]
/// name = "subpro"
/// url = "http://www.statweb.provincia.tn.it/IndicatoriStrutturaliSubPro/exp.aspx"
/// enabled = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Array of index endpoints.
    pub sources: Vec<SourceEntry>,
}

impl SourcesConfig {
    /// Returns only enabled sources.
    pub fn enabled_sources(&self) -> Vec<&SourceEntry> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    /// Find a source by name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// A single index endpoint in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Human-readable name, used for `--source <name>` lookup and logging.
    pub name: String,

    /// URL of the JSON index.
    pub url: String,

    /// Whether the source takes part in a harvest run.
    ///
    /// Defaults to `true` if not specified.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Optional description of the source.
    pub description: Option<String>,
}

impl SourceEntry {
    /// Builds an enabled entry without description.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            description: None,
        }
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "harvest.toml";

/// Returns the default configuration directory path: `~/.config/statweb/`
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("statweb"))
}

/// Returns the default configuration file path: `~/.config/statweb/harvest.toml`
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# statweb harvester configuration
#
# Usage:
#   statweb harvest                  # Harvest every enabled source
#   statweb harvest --source subpro  # Harvest one source by name
#
# Set enabled = false to skip a source.

# Structural indicators (entries point to a metadata document)
[[sources]]
name = "indicatori-strutturali"
url = "http://www.statweb.provincia.tn.it/IndicatoriStrutturali/exp.aspx"
description = "Indicatori strutturali della Provincia Autonoma di Trento"

# Sub-provincial indicators (self-contained entries)
[[sources]]
name = "subpro"
url = "http://www.statweb.provincia.tn.it/IndicatoriStrutturaliSubPro/exp.aspx"
enabled = false
description = "Indicatori strutturali sub-provinciali"
"#;

/// Load the source list from a TOML file.
///
/// # Arguments
/// * `path` - Optional custom path. If `None`, uses the default XDG path.
///
/// # Returns
/// * `Ok(Some(config))` - Configuration loaded successfully
/// * `Ok(None)` - No configuration directory available and no template could be written
/// * `Err(e)` - Custom path missing, or the file exists but is invalid
///
/// When the default file does not exist a template listing the upstream
/// index endpoints is written first and then read back.
pub fn load_sources_config(path: Option<PathBuf>) -> Result<Option<SourcesConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if using_default_path {
            if let Err(e) = create_default_config(&config_path) {
                tracing::warn!("Could not create default config template: {}", e);
                return Ok(None);
            }
        } else {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: SourcesConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
