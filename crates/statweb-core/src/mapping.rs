//! Metadata normalization.
//!
//! Maps the metadata dictionary of one indicator onto the catalog's
//! vocabulary: title, synthesized description, category, tags, extras and
//! the created/modified timestamps.
//!
//! Upstream changes field names and formats without notice, so every derived
//! value is computed on its own. A missing or unparsable source field drops
//! only the values that depend on it and logs a warning; the rest of the
//! mapping goes through.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::AppError;
use crate::models::{IndicatorRecord, PUBLISHER_EMAIL, SchemaVariant, text_field};
use crate::tags::clean_tags;

/// Category used when the sector is missing or unknown.
pub const DEFAULT_CATEGORY: &str = "statistica";

/// Year used when an indicator declares no start year.
pub const DEFAULT_START_YEAR: i32 = 1970;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Sector (lowercase) to catalog category.
const SECTOR_CATEGORIES: &[(&str, &str)] = &[
    ("agricoltura", "agricoltura"),
    ("agricoltura e foreste", "agricoltura"),
    ("ambiente", "ambiente"),
    ("popolazione", "demografia"),
    ("famiglie", "demografia"),
    ("istruzione", "conoscenza"),
    ("istruzione e formazione", "conoscenza"),
    ("ricerca e sviluppo", "conoscenza"),
    ("cultura", "cultura"),
    ("economia", "economia"),
    ("lavoro", "economia"),
    ("mercato del lavoro", "economia"),
    ("turismo", "economia"),
    ("industria", "economia"),
    ("sanità", "salute"),
    ("sanita'", "salute"),
    ("salute", "salute"),
    ("assistenza e protezione sociale", "welfare"),
    ("protezione sociale", "welfare"),
    ("trasporti", "mobilita"),
    ("territorio", "gestione-del-territorio"),
    ("giustizia", "sicurezza"),
    ("pubblica amministrazione", "amministrazione"),
];

/// Extras keys written for every dataset.
pub mod keys {
    pub const TITOLARE: &str = "Titolare";
    pub const CATEGORIE: &str = "Categorie";
    pub const COPERTURA_GEOGRAFICA: &str = "Copertura Geografica";
    pub const DATA_INIZIO: &str = "Copertura Temporale (Data di inizio)";
    pub const DATA_FINE: &str = "Copertura Temporale (Data di fine)";
    pub const AGGIORNAMENTO: &str = "Aggiornamento";
    pub const DATA_PUBBLICAZIONE: &str = "Data di pubblicazione";
    pub const DATA_AGGIORNAMENTO: &str = "Data di Aggiornamento";
    pub const TITOLO: &str = "Titolo";
    pub const DESCRIZIONE: &str = "Descrizione";
    pub const AUTORE: &str = "Autore";
    pub const CONTATTO: &str = "Contatto";
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMetadata {
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub extras: BTreeMap<String, String>,
    pub created: NaiveDateTime,
    pub modified: Option<NaiveDateTime>,
}

/// Formats a timestamp the way the catalog extras expect it.
pub fn iso(ts: &NaiveDateTime) -> String {
    ts.format(ISO_FORMAT).to_string()
}

/// Parses a `dd/mm/yyyy` date; a trailing time part is ignored.
pub fn parse_day_month_year(raw: &str) -> Result<NaiveDate, AppError> {
    let date_part = raw.split_whitespace().next().unwrap_or_default();
    NaiveDate::parse_from_str(date_part, "%d/%m/%Y")
        .map_err(|e| AppError::MetadataError(format!("unparsable date '{}': {}", raw, e)))
}

/// Derives the creation timestamp from a start year, falling back to 1970.
pub fn start_of_year(raw: Option<&str>) -> NaiveDateTime {
    let year = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_START_YEAR,
        Some(s) => s.parse::<i32>().unwrap_or_else(|_| {
            warn!(value = s, "Unparsable AnnoInizio, using {}", DEFAULT_START_YEAR);
            DEFAULT_START_YEAR
        }),
    };

    NaiveDate::from_ymd_opt(year, 1, 1)
        .or_else(|| NaiveDate::from_ymd_opt(DEFAULT_START_YEAR, 1, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Looks up the catalog category of a sector.
pub fn category_for_sector(sector: Option<&str>) -> &'static str {
    let Some(sector) = sector else {
        return DEFAULT_CATEGORY;
    };
    let folded = sector.trim().to_lowercase();
    SECTOR_CATEGORIES
        .iter()
        .find(|(s, _)| *s == folded)
        .map_or(DEFAULT_CATEGORY, |(_, c)| *c)
}

/// Removes dataset-key fields and derived file paths from the metadata.
fn descriptive_fields(schema: SchemaVariant, metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .filter(|(k, _)| !schema.dataset_keys().contains(&k.as_str()) && !k.ends_with("_csv_path"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Builds the multi-line description.
///
/// Missing fields render as empty strings.
fn describe(schema: SchemaVariant, title: &str, fields: &Map<String, Value>) -> String {
    let mut missing = Vec::new();
    let mut get = |key: &'static str| match text_field(fields, key) {
        Some(v) => v.into_owned(),
        None => {
            missing.push(key);
            String::new()
        }
    };

    let description = match schema {
        SchemaVariant::LegacyIndicator => format!(
            "{}.\nArea: {}.\nSettore: {}.\nAlgoritmo: {}.\nUnità di misura: {}.\nFenomeno: {}.\nConfronti territoriali: {}. Note: {}",
            title,
            get("Area"),
            get("Settore"),
            get("Algoritmo"),
            get("UM"),
            get("Fenomeno"),
            get("ConfrontiTerritoriali"),
            get("Note"),
        ),
        SchemaVariant::SubProIndicator => format!(
            "{}.\nArea: {}.\nSettore: {}.\nAlgoritmo: {}.\nUnità di misura: {}. Note: {}",
            title,
            get("Area"),
            get("Settore"),
            get("Algoritmo"),
            get("UM"),
            get("Note"),
        ),
    };

    if !missing.is_empty() {
        warn!(fields = ?missing, "Description fields missing from metadata");
    }

    description
}

/// Normalizes the metadata of one indicator.
///
/// Never fails: each derived value degrades on its own when its source field
/// is absent or malformed.
pub fn normalize(
    record: &IndicatorRecord,
    metadata: &Map<String, Value>,
    now: DateTime<Utc>,
) -> NormalizedMetadata {
    let fields = descriptive_fields(record.schema, metadata);

    let title = record
        .title()
        .map(str::to_string)
        .or_else(|| text_field(&fields, "Descrizione").map(|s| s.trim().to_string()))
        .unwrap_or_else(|| {
            warn!(guid = %record.guid, "Indicator has no Descrizione, using source id as title");
            record.source_id.clone()
        });

    let modified = match text_field(&fields, "UltimoAggiornamento") {
        Some(raw) => match parse_day_month_year(&raw) {
            Ok(date) => date.and_hms_opt(0, 0, 0),
            Err(e) => {
                warn!(guid = %record.guid, error = %e, "Cannot derive modification date");
                None
            }
        },
        None => {
            warn!(guid = %record.guid, "UltimoAggiornamento missing");
            None
        }
    };

    let created = start_of_year(text_field(&fields, "AnnoInizio").as_deref());
    let sector = text_field(&fields, "Settore");
    let category = category_for_sector(sector.as_deref()).to_string();
    let description = describe(record.schema, &title, &fields);

    let raw_tags: Vec<String> = ["Area", "Settore"]
        .iter()
        .filter_map(|k| text_field(&fields, k).map(|v| v.into_owned()))
        .collect();
    let tags = clean_tags(&raw_tags);

    let mut extras = BTreeMap::new();
    extras.insert(
        keys::TITOLARE.to_string(),
        "Provincia Autonoma di Trento".to_string(),
    );
    extras.insert(keys::CATEGORIE.to_string(), category.clone());
    extras.insert(
        keys::COPERTURA_GEOGRAFICA.to_string(),
        "Provincia di Trento".to_string(),
    );
    extras.insert(keys::DATA_INIZIO.to_string(), iso(&created));
    extras.insert(
        keys::DATA_PUBBLICAZIONE.to_string(),
        iso(&now.naive_utc()),
    );
    extras.insert(keys::TITOLO.to_string(), title.clone());
    extras.insert(keys::DESCRIZIONE.to_string(), description.clone());
    extras.insert(keys::AUTORE.to_string(), record.attribution().to_string());
    extras.insert(keys::CONTATTO.to_string(), PUBLISHER_EMAIL.to_string());

    if let Some(modified) = &modified {
        extras.insert(keys::DATA_FINE.to_string(), iso(modified));
        extras.insert(keys::DATA_AGGIORNAMENTO.to_string(), iso(modified));
    }

    match text_field(&fields, "FreqAggiornamento") {
        Some(freq) => {
            extras.insert(keys::AGGIORNAMENTO.to_string(), freq.into_owned());
        }
        None => warn!(guid = %record.guid, "FreqAggiornamento missing"),
    }

    NormalizedMetadata {
        title,
        description,
        category,
        tags,
        extras,
        created,
        modified,
    }
}
