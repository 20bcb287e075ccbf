//! Tag cleaning for the area and sector fields.
//!
//! Upstream packs several topics into one comma-separated string, mixes
//! case, and uses apostrophes as accents (`sanita'`). The catalog accepts
//! neither apostrophes nor single-character tags.

/// Pieces that carry no topic and are dropped.
const STOP_LIST: &[&str] = &[
    "altro",
    "altri",
    "varie",
    "vari",
    "generale",
    "totale",
    "n.d.",
    "nd",
    "-",
    "indicatori strutturali",
];

/// Canonical spelling for pieces that upstream writes in several ways.
const SYNONYMS: &[(&str, &str)] = &[
    ("p.a.", "pubblica amministrazione"),
    ("pubbl. amm.", "pubblica amministrazione"),
    ("pubblica amm.ne", "pubblica amministrazione"),
    ("sanita'", "sanità"),
    ("attivita' produttive", "attività produttive"),
    ("popolazione e famiglie", "popolazione"),
    ("ict", "società dell'informazione"),
    ("r&s", "ricerca e sviluppo"),
];

const APOSTROPHES: [char; 2] = ['\'', '’'];

/// Cleans raw tag-bearing strings into catalog tags.
///
/// Each input is lowercased and split on commas; pieces are trimmed,
/// stop-listed pieces are dropped, synonyms are substituted, pieces of one
/// character or less are dropped and apostrophes are removed. Output follows
/// input order and keeps duplicates.
///
/// # Examples
///
/// ```
/// use statweb_core::tags::clean_tags;
///
/// assert_eq!(clean_tags(["Agricoltura, Pesca"]), vec!["agricoltura", "pesca"]);
/// ```
pub fn clean_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags = Vec::new();

    for value in raw {
        let mut lowered = value.as_ref().to_lowercase();
        while lowered.contains("  ") {
            lowered = lowered.replace("  ", " ");
        }

        for piece in lowered.split(',').map(str::trim) {
            if STOP_LIST.contains(&piece) {
                continue;
            }

            let canonical = SYNONYMS
                .iter()
                .find(|(from, _)| *from == piece)
                .map_or(piece, |(_, to)| *to);

            if canonical.chars().count() <= 1 {
                continue;
            }

            tags.push(canonical.replace(APOSTROPHES, ""));
        }
    }

    tags
}
