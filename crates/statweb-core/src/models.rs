//! Domain models for harvested indicators.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::config::SourceEntry;
use crate::error::AppError;

/// Sub-resources of an indicator published by the structural indicators index.
pub const DATASET_KEYS: [&str; 3] = ["Indicatore", "TabNumeratore", "TabDenominatore"];

/// Sub-resources of a self-contained sub-provincial entry.
pub const SUBPRO_DATASET_KEYS: [&str; 4] = [
    "Indicatore",
    "TabNumeratore",
    "TabDenominatore",
    "TabSubProvinciale",
];

/// Entry fields that can identify an indicator, in order of preference.
pub const IDENTIFIER_FIELDS: [&str; 3] = ["URL", "Indicatore", "id"];

/// Publisher of every indicator.
pub const PUBLISHER: &str = "Servizio Statistica - Provincia Autonoma di Trento";

/// Contact address of the publisher.
pub const PUBLISHER_EMAIL: &str = "serv.statistica@provincia.tn.it";

/// Descriptor of this harvester as shown to catalog administrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HarvesterInfo {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
}

impl HarvesterInfo {
    pub const fn statweb() -> Self {
        Self {
            name: "PATstatweb",
            title: PUBLISHER,
            description: "Harvester for www.statistica.provincia.tn.it",
        }
    }
}

/// Computes the content-hash identifier of an indicator.
///
/// The identifier is the hex SHA-1 of the source identifier, so harvesting
/// the same source twice always yields the same catalog id.
///
/// # Examples
///
/// ```
/// use statweb_core::models::content_hash;
///
/// let a = content_hash("http://example.com/ind.aspx?id=1");
/// let b = content_hash("http://example.com/ind.aspx?id=1");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 40);
/// ```
pub fn content_hash(source_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Returns the list held by the first array-valued field of a JSON object.
///
/// Upstream wraps every payload in an object with a single key naming the
/// content (`{"IndicatoriStrutturali": [...]}`); the key changes between
/// endpoints, the shape does not.
pub fn first_list(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Object(map) => map.values().find_map(Value::as_array),
        Value::Array(list) => Some(list),
        _ => None,
    }
}

/// Returns the first record of the first list in a JSON payload.
pub fn first_record(value: &Value) -> Option<&Map<String, Value>> {
    first_list(value)?.first()?.as_object()
}

/// Returns the first key of a JSON object, in document order.
pub fn first_key(value: &Value) -> Option<&str> {
    value.as_object()?.keys().next().map(String::as_str)
}

/// Reads a field as text; numbers are rendered, empty strings count as absent.
pub fn text_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<Cow<'a, str>> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        _ => None,
    }
}

// =============================================================================
// Index entries
// =============================================================================

/// Which index layout produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// Entry carries a `URL` pointing at its metadata document.
    LegacyIndicator,
    /// Entry fields are the metadata.
    SubProIndicator,
}

impl SchemaVariant {
    /// Detects the layout from the presence of a textual `URL` field.
    pub fn detect(entry: &Map<String, Value>) -> Self {
        let has_url = entry
            .get("URL")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if has_url {
            SchemaVariant::LegacyIndicator
        } else {
            SchemaVariant::SubProIndicator
        }
    }

    /// Whether fetch must retrieve a separate metadata document.
    pub fn requires_metadata_fetch(&self) -> bool {
        matches!(self, SchemaVariant::LegacyIndicator)
    }

    /// Dataset-keys whose values are resource URLs.
    pub fn dataset_keys(&self) -> &'static [&'static str] {
        match self {
            SchemaVariant::LegacyIndicator => &DATASET_KEYS,
            SchemaVariant::SubProIndicator => &SUBPRO_DATASET_KEYS,
        }
    }
}

/// Raw entry of a remote index, tagged with its layout and identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub schema: SchemaVariant,
    /// Content-hash identifier.
    pub guid: String,
    /// Value the identifier was computed from.
    pub source_id: String,
    /// Entry as published upstream.
    pub entry: Map<String, Value>,
}

impl IndicatorRecord {
    /// Builds a record from one index entry.
    ///
    /// Returns `None` when none of [`IDENTIFIER_FIELDS`] is present.
    pub fn from_index_entry(entry: Map<String, Value>) -> Option<Self> {
        let source_id = IDENTIFIER_FIELDS
            .iter()
            .find_map(|field| text_field(&entry, field))?
            .into_owned();

        Some(Self {
            schema: SchemaVariant::detect(&entry),
            guid: content_hash(&source_id),
            source_id,
            entry,
        })
    }

    /// URL of the metadata document, for entries that have one.
    pub fn source_url(&self) -> Option<&str> {
        match self.schema {
            SchemaVariant::LegacyIndicator => self.entry.get("URL").and_then(Value::as_str),
            SchemaVariant::SubProIndicator => None,
        }
    }

    /// Free-text title of the indicator.
    pub fn title(&self) -> Option<&str> {
        self.entry
            .get("Descrizione")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Source attribution, defaulting to the publisher.
    pub fn attribution(&self) -> &str {
        self.entry
            .get("Fonte")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(PUBLISHER)
    }
}

// =============================================================================
// Harvest objects
// =============================================================================

/// One sub-resource retrieved during fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedResource {
    /// Dataset-key the resource was declared under.
    pub key: String,
    /// JSON endpoint declared in the metadata.
    pub url: String,
    /// First key of the JSON payload, used as resource name.
    pub name: Option<String>,
    pub data: Value,
    /// Downloaded CSV counterpart, if the download succeeded.
    pub csv_path: Option<PathBuf>,
}

/// Serialized content of a harvest object.
///
/// Gather stores only `record`; fetch fills in `metadata` and `resources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestPayload {
    pub record: IndicatorRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<FetchedResource>,
}

impl From<IndicatorRecord> for HarvestPayload {
    fn from(record: IndicatorRecord) -> Self {
        Self {
            record,
            metadata: None,
            resources: Vec::new(),
        }
    }
}

impl HarvestPayload {
    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Lifecycle state of a harvest object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Discovered,
    Enriched,
    Imported,
    Failed,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Discovered => "discovered",
            ObjectState::Enriched => "enriched",
            ObjectState::Imported => "imported",
            ObjectState::Failed => "failed",
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(ObjectState::Discovered),
            "enriched" => Ok(ObjectState::Enriched),
            "imported" => Ok(ObjectState::Imported),
            "failed" => Ok(ObjectState::Failed),
            _ => Err(AppError::Generic(format!("Unknown object state: {}", s))),
        }
    }
}

/// Pipeline stage, recorded alongside object errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Gather,
    Fetch,
    Import,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Gather => "Gather",
            Stage::Fetch => "Fetch",
            Stage::Import => "Import",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gather" => Ok(Stage::Gather),
            "Fetch" => Ok(Stage::Fetch),
            "Import" => Ok(Stage::Import),
            _ => Err(AppError::Generic(format!("Unknown stage: {}", s))),
        }
    }
}

/// Error recorded against a harvest object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectError {
    pub message: String,
    pub stage: Stage,
}

/// Durable intermediate record, one per index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestObject {
    pub id: Uuid,
    pub guid: String,
    pub job_id: Uuid,
    pub state: ObjectState,
    pub content: Option<String>,
    pub error: Option<ObjectError>,
}

/// One harvest run over a set of index sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: Uuid,
    pub sources: Vec<SourceEntry>,
    pub created_at: DateTime<Utc>,
}

impl HarvestJob {
    pub fn new(sources: Vec<SourceEntry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sources,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Catalog records
// =============================================================================

/// One attachment of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttachment {
    pub url: String,
    pub format: String,
    pub mimetype: String,
    pub resource_type: String,
    pub description: String,
    pub name: String,
    pub last_modified: Option<NaiveDateTime>,
}

impl ResourceAttachment {
    /// Attachment pointing at the original JSON endpoint.
    pub fn json(url: &str, name: &str, last_modified: Option<NaiveDateTime>) -> Self {
        Self {
            url: url.to_string(),
            format: "json".to_string(),
            mimetype: "application/json".to_string(),
            resource_type: "api".to_string(),
            description: name.to_string(),
            name: name.to_string(),
            last_modified,
        }
    }

    /// Copy of this attachment pointing at a catalog-hosted CSV.
    pub fn csv_copy(&self, hosted_url: &str) -> Self {
        Self {
            url: hosted_url.to_string(),
            format: "csv".to_string(),
            mimetype: "text/csv".to_string(),
            resource_type: "file".to_string(),
            ..self.clone()
        }
    }
}

/// License block attached to every dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub title: String,
    pub url: String,
    pub is_open: bool,
}

impl License {
    /// Creative Commons Attribution 3.0, Italian port.
    pub fn cc_by_it() -> Self {
        Self {
            id: "cc-by".to_string(),
            title: "Creative Commons Attribution 3.0 it".to_string(),
            url: "http://creativecommons.org/licenses/by/3.0/it/".to_string(),
            is_open: true,
        }
    }
}

/// Canonical dataset handed to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Content-hash identifier.
    pub id: String,
    /// URL slug, unique within the catalog.
    pub name: String,
    pub title: String,
    pub category: String,
    pub groups: Vec<String>,
    pub url: String,
    pub notes: String,
    pub author: String,
    pub author_email: String,
    pub maintainer: String,
    pub maintainer_email: String,
    pub tags: Vec<String>,
    pub license: License,
    pub extras: BTreeMap<String, String>,
    pub metadata_created: Option<NaiveDateTime>,
    pub metadata_modified: Option<NaiveDateTime>,
    pub resources: Vec<ResourceAttachment>,
}

/// Credentials the catalog client writes with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    pub api_key: Option<String>,
}

impl ServiceIdentity {
    /// Whether the catalog will accept writes: an API key that is not blank.
    pub fn can_write(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Maximum length of a catalog name.
pub const MAX_NAME_LENGTH: usize = 100;

/// Turns a title into a catalog name: lowercase ASCII letters, digits and dashes.
///
/// # Examples
///
/// ```
/// use statweb_core::models::slugify;
///
/// assert_eq!(slugify("Popolazione residente (età 0-14)"), "popolazione-residente-eta-0-14");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        let mapped = match c {
            'a'..='z' | '0'..='9' => Some(c),
            'à' | 'á' | 'â' | 'ä' => Some('a'),
            'è' | 'é' | 'ê' | 'ë' => Some('e'),
            'ì' | 'í' | 'î' | 'ï' => Some('i'),
            'ò' | 'ó' | 'ô' | 'ö' => Some('o'),
            'ù' | 'ú' | 'û' | 'ü' => Some('u'),
            _ => None,
        };
        match mapped {
            Some(m) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(m);
            }
            None => pending_dash = true,
        }
    }

    if slug.len() > MAX_NAME_LENGTH {
        slug.truncate(MAX_NAME_LENGTH);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.len() < 2 {
        slug = format!("indicatore-{}", slug).trim_end_matches('-').to_string();
    }

    slug
}
