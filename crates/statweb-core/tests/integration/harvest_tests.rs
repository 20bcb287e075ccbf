//! Integration tests for HarvestService.
//!
//! These tests run the gather, fetch and import stages against the mock
//! statistics site, ledger and catalog.

use std::path::Path;

use crate::integration::common::{
    BROKEN_INDEX_URL, DEN_URL, IND_URL, INDEX_URL, META_URL, MockCatalog,
    MockLedger, MockSource, NUM_URL, SUBPRO_INDEX_URL, legacy_index, legacy_metadata,
    legacy_source,
};
use serde_json::json;
use statweb_core::harvest::HarvestService;
use statweb_core::{
    AppError, HarvestConfig, HarvestJob, HarvestObject, ObjectState, SourceEntry, Stage,
    content_hash,
};
use tempfile::TempDir;
use uuid::Uuid;

type Service = HarvestService<MockLedger, MockSource, MockCatalog>;

fn service(source: &MockSource, ledger: &MockLedger, catalog: &MockCatalog, scratch: &Path) -> Service {
    let config = HarvestConfig::default().with_scratch_dir(scratch);
    HarvestService::with_config(ledger.clone(), source.clone(), catalog.clone(), config)
}

fn job(urls: &[&str]) -> HarvestJob {
    HarvestJob::new(
        urls.iter()
            .enumerate()
            .map(|(i, url)| SourceEntry::new(format!("source-{}", i), *url))
            .collect(),
    )
}

fn scratch_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Test 1: Verify that repeated gathers of the same source yield the same guid.
///
/// The guid is the catalog id, so it must not depend on the job.
#[tokio::test]
async fn test_gather_guid_is_stable_across_jobs() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let first = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();
    let second = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Assert
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    let a = ledger.get(first[0]).unwrap();
    let b = ledger.get(second[0]).unwrap();
    assert_ne!(a.job_id, b.job_id, "Each gather belongs to its own job");
    assert_eq!(a.guid, b.guid, "Same source must give the same guid");
    assert_eq!(a.guid, content_hash(META_URL));
    assert_eq!(a.state, ObjectState::Discovered);
}

/// Test 2: Verify that a malformed index does not stop the next one.
#[tokio::test]
async fn test_gather_skips_malformed_source() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let source = legacy_source().with_malformed(BROKEN_INDEX_URL);
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let ids = service
        .gather_stage(&job(&[BROKEN_INDEX_URL, INDEX_URL]))
        .await
        .unwrap();

    // Assert
    assert_eq!(ids.len(), 1, "Only the valid source contributes objects");
    assert_eq!(ledger.len(), 1);
    let payload = ledger.payload(ids[0]);
    assert_eq!(payload.record.source_id, META_URL);
    assert!(payload.metadata.is_none());
}

/// Test 3: Verify that entries without any identifier are not stored.
#[tokio::test]
async fn test_gather_skips_entries_without_identifier() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let source = MockSource::new().with_json(
        INDEX_URL,
        json!({"IndicatoriStrutturali": [
            {"URL": META_URL, "Descrizione": "Tasso di natalità"},
            {"Descrizione": "Senza riferimenti"},
            "not an object"
        ]}),
    );
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Assert
    assert_eq!(ids.len(), 1);
}

/// Test 4: Verify that a failed metadata fetch fails the object only.
///
/// The stored payload must stay exactly as gather left it.
#[tokio::test]
async fn test_fetch_metadata_failure_leaves_payload_unmodified() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let source = legacy_source();
    source.remove(META_URL);
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();
    let before = ledger.get(ids[0]).unwrap();

    // Act
    let ok = service.fetch_stage(&before).await.unwrap();

    // Assert
    assert!(!ok, "Fetch should report failure");
    let after = ledger.get(ids[0]).unwrap();
    assert_eq!(after.content, before.content, "Payload must be unmodified");
    assert_eq!(after.state, ObjectState::Failed);
    let error = after.error.expect("error recorded");
    assert_eq!(error.stage, Stage::Fetch);
    assert!(error.message.contains(META_URL), "message: {}", error.message);
    assert_eq!(scratch_files(scratch.path()), 0);
}

/// Test 5: Verify that fetch stores metadata, resources and scratch CSVs.
#[tokio::test]
async fn test_fetch_enriches_object() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Act
    let ok = service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();

    // Assert
    assert!(ok);
    assert_eq!(ledger.get(ids[0]).unwrap().state, ObjectState::Enriched);
    let payload = ledger.payload(ids[0]);
    let metadata = payload.metadata.expect("metadata stored");
    assert_eq!(metadata["Area"], json!("Popolazione"));

    let keys: Vec<&str> = payload.resources.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["Indicatore", "TabNumeratore"]);
    assert_eq!(payload.resources[0].name.as_deref(), Some("Tasso di natalità"));
    assert_eq!(payload.resources[1].name.as_deref(), Some("Nati"));
    for resource in &payload.resources {
        let path = resource.csv_path.as_ref().expect("CSV downloaded");
        assert!(path.starts_with(scratch.path()));
        assert!(path.exists());
    }
    assert_eq!(scratch_files(scratch.path()), 2);
}

/// Test 6: Verify that an unreachable sub-resource is dropped, not fatal.
#[tokio::test]
async fn test_fetch_drops_unreachable_resource() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let mut metadata = legacy_metadata();
    metadata["Metadati"][0]["TabDenominatore"] = json!(DEN_URL);
    let source = legacy_source().with_json(META_URL, metadata);
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Act
    let ok = service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();

    // Assert
    assert!(ok, "A missing sub-resource must not fail the object");
    let payload = ledger.payload(ids[0]);
    let metadata = payload.metadata.unwrap();
    assert!(!metadata.contains_key("TabDenominatore"));
    assert!(metadata.contains_key("TabNumeratore"));
    assert_eq!(payload.resources.len(), 2);
}

/// Test 7: Verify that a pointer document is followed exactly once.
#[tokio::test]
async fn test_fetch_follows_indirection_once() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let real_url = "http://statweb.test/real.aspx?idind=1&fmt=json";
    let real_csv_url = "http://statweb.test/real.aspx?idind=1&fmt=csv";
    let source = legacy_source()
        .with_json(IND_URL, json!({"Rimando": [{"URL": real_url}]}))
        .with_json(real_url, json!({"Tasso di natalità": [{"Anno": "2019"}]}))
        .with_csv(real_csv_url, "Anno\n2019\n");
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Act
    service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();

    // Assert
    let payload = ledger.payload(ids[0]);
    let indicator = &payload.resources[0];
    assert_eq!(indicator.key, "Indicatore");
    assert_eq!(indicator.url, IND_URL, "Attachment keeps the declared URL");
    assert_eq!(indicator.name.as_deref(), Some("Tasso di natalità"));
    assert_eq!(indicator.data, json!({"Tasso di natalità": [{"Anno": "2019"}]}));
    let csv = std::fs::read_to_string(indicator.csv_path.as_ref().unwrap()).unwrap();
    assert_eq!(csv, "Anno\n2019\n", "CSV comes from the resolved endpoint");
    assert_eq!(source.request_count(real_url), 1);
}

/// Test 8: Verify that a second-level pointer is kept as data.
#[tokio::test]
async fn test_fetch_does_not_follow_second_pointer() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let hop1 = "http://statweb.test/hop1.aspx?fmt=json";
    let hop2 = "http://statweb.test/hop2.aspx?fmt=json";
    let source = legacy_source()
        .with_json(IND_URL, json!({"Rimando": [{"URL": hop1}]}))
        .with_json(hop1, json!({"Rimando": [{"URL": hop2}]}))
        .with_json(hop2, json!({"Dati": []}));
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Act
    service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();

    // Assert
    let payload = ledger.payload(ids[0]);
    assert_eq!(payload.resources[0].data, json!({"Rimando": [{"URL": hop2}]}));
    assert_eq!(source.request_count(hop2), 0);
}

/// Test 9: Verify that import builds the dataset and publishes it.
///
/// Each table gets a JSON attachment and a converted CSV attachment, and
/// no scratch file survives the import.
#[tokio::test]
async fn test_import_publishes_dataset() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();
    service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();

    // Act
    let record = service.import_object(ids[0]).await.unwrap();

    // Assert
    assert_eq!(record.id, content_hash(META_URL));
    assert_eq!(record.name, "tasso-di-natalita");
    assert_eq!(record.title, "Tasso di natalità");
    assert_eq!(record.category, "economia");
    assert_eq!(record.groups, vec!["economia"]);
    assert_eq!(record.tags, vec!["popolazione", "lavoro"]);
    assert_eq!(record.license.id, "cc-by");
    assert_eq!(record.author_email, "serv.statistica@provincia.tn.it");
    assert_eq!(
        record.metadata_modified.map(|d| d.to_string()).as_deref(),
        Some("2020-03-15 00:00:00")
    );
    assert_eq!(record.extras["Titolo"], "Tasso di natalità");

    let formats: Vec<(&str, &str)> = record
        .resources
        .iter()
        .map(|r| (r.name.as_str(), r.format.as_str()))
        .collect();
    assert_eq!(
        formats,
        vec![
            ("Tasso di natalità", "json"),
            ("Tasso di natalità", "csv"),
            ("Nati", "json"),
            ("Nati", "csv"),
        ]
    );
    assert_eq!(record.resources[0].url, IND_URL);
    assert_eq!(record.resources[2].url, NUM_URL);
    assert!(record.resources[1].url.starts_with("http://catalog.test/storage/f/"));

    assert_eq!(
        catalog.uploads(),
        vec![
            "Anno,Valore\n2019,9.5\n2020,8.75\n".to_string(),
            "Anno,Nati\n2019,5012\n".to_string(),
        ]
    );
    assert_eq!(catalog.get(&record.id), Some(record.clone()));
    assert_eq!(ledger.get(ids[0]).unwrap().state, ObjectState::Imported);
    assert_eq!(scratch_files(scratch.path()), 0, "Scratch files must be deleted");
}

/// Test 10: Verify that a missing scratch CSV only drops that attachment.
#[tokio::test]
async fn test_import_missing_scratch_csv_keeps_json() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();
    service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();
    let payload = ledger.payload(ids[0]);
    std::fs::remove_file(payload.resources[0].csv_path.as_ref().unwrap()).unwrap();

    // Act
    let record = service.import_object(ids[0]).await.unwrap();

    // Assert
    let formats: Vec<(&str, &str)> = record
        .resources
        .iter()
        .map(|r| (r.name.as_str(), r.format.as_str()))
        .collect();
    assert_eq!(
        formats,
        vec![
            ("Tasso di natalità", "json"),
            ("Nati", "json"),
            ("Nati", "csv"),
        ]
    );
    assert_eq!(catalog.len(), 1);
    assert_eq!(ledger.get(ids[0]).unwrap().state, ObjectState::Imported);
}

/// Test 11: Verify that a failed CSV download yields a JSON-only resource.
#[tokio::test]
async fn test_failed_download_yields_json_only() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let source = MockSource::new()
        .with_json(INDEX_URL, legacy_index())
        .with_json(META_URL, legacy_metadata())
        .with_json(IND_URL, json!({"Tasso di natalità": []}))
        .with_json(NUM_URL, json!({"Nati": []}));
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let stats = service.run_job(&job(&[INDEX_URL])).await.unwrap();

    // Assert
    assert_eq!(stats.imported, 1);
    let record = catalog.get(&content_hash(META_URL)).unwrap();
    assert!(record.resources.iter().all(|r| r.format == "json"));
    assert_eq!(record.resources.len(), 2);
    assert!(catalog.uploads().is_empty());
}

/// Test 12: Verify that an object without content fails import fatally.
#[tokio::test]
async fn test_import_empty_content_is_fatal() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (MockSource::new(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let object = HarvestObject {
        id: Uuid::new_v4(),
        guid: content_hash("x"),
        job_id: Uuid::new_v4(),
        state: ObjectState::Enriched,
        content: None,
        error: None,
    };
    ledger.insert(object.clone());

    // Act
    let result = service.import_stage(Some(&object)).await;

    // Assert
    assert!(matches!(result, Err(AppError::EmptyContent(id)) if id == object.id));
    let stored = ledger.get(object.id).unwrap();
    assert_eq!(stored.state, ObjectState::Failed);
    let error = stored.error.unwrap();
    assert_eq!(error.stage, Stage::Import);
    assert_eq!(error.message, format!("Empty content for object {}", object.id));
    assert_eq!(catalog.writes(), 0, "No dataset may be produced");
}

/// Test 13: Verify that a missing object fails import.
#[tokio::test]
async fn test_import_missing_object_is_fatal() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (MockSource::new(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let direct = service.import_stage(None).await;
    let by_id = service.import_object(Uuid::new_v4()).await;

    // Assert
    assert!(matches!(direct, Err(AppError::ObjectNotFound(_))));
    assert!(matches!(by_id, Err(AppError::ObjectNotFound(_))));
    assert_eq!(catalog.writes(), 0);
}

/// Test 14: Verify that importing an object that was never fetched fails it.
#[tokio::test]
async fn test_import_unfetched_object_fails() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();

    // Act
    let result = service.import_object(ids[0]).await;

    // Assert
    assert!(matches!(result, Err(AppError::MetadataError(_))));
    assert_eq!(ledger.get(ids[0]).unwrap().state, ObjectState::Failed);
}

/// Test 15: Verify job statistics over good, broken and failing inputs.
#[tokio::test]
async fn test_run_job_collects_stats() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let source = legacy_source()
        .with_malformed(BROKEN_INDEX_URL)
        .with_json(
            INDEX_URL,
            json!({"IndicatoriStrutturali": [
                {"URL": META_URL, "Descrizione": "Tasso di natalità"},
                {"URL": "http://statweb.test/gone.aspx", "Descrizione": "Sparito"}
            ]}),
        );
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let stats = service
        .run_job(&job(&[INDEX_URL, BROKEN_INDEX_URL]))
        .await
        .unwrap();

    // Assert
    assert_eq!(stats.gathered, 2, "Should have gathered 2 objects");
    assert_eq!(stats.fetched, 1, "Should have fetched 1 object");
    assert_eq!(stats.fetch_failed, 1, "Should have 1 fetch failure");
    assert_eq!(stats.imported, 1, "Should have imported 1 dataset");
    assert_eq!(stats.import_failed, 0);
    assert_eq!(stats.sources_failed, 1, "The malformed index is counted");
    assert!(!stats.is_complete());
    assert_eq!(catalog.len(), 1);
}

/// Test 16: Verify that re-harvesting updates the same dataset.
#[tokio::test]
async fn test_run_job_twice_upserts_same_dataset() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let first = service.run_job(&job(&[INDEX_URL])).await.unwrap();
    let second = service.run_job(&job(&[INDEX_URL])).await.unwrap();

    // Assert
    assert!(first.is_complete());
    assert!(second.is_complete());
    assert_eq!(catalog.writes(), 2);
    assert_eq!(catalog.len(), 1, "Same source must map to one dataset");
}

/// Test 17: Verify the self-contained sub-provincial layout.
///
/// Entry fields are the metadata, so no metadata document is requested.
#[tokio::test]
async fn test_subpro_entry_is_self_contained() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let ind = "http://statweb.test/sub.aspx?idind=9&fmt=json";
    let sub = "http://statweb.test/subtab.aspx?idind=9&fmt=json";
    let source = MockSource::new()
        .with_json(
            SUBPRO_INDEX_URL,
            json!({"IndicatoriSubPro": [{
                "Indicatore": ind,
                "TabSubProvinciale": sub,
                "Descrizione": "Indice di vecchiaia",
                "Area": "Popolazione",
                "Settore": "Popolazione",
                "UltimoAggiornamento": "01/02/2021"
            }]}),
        )
        .with_json(ind, json!({"Indice di vecchiaia": []}))
        .with_json(sub, json!({"Comunità di valle": []}));
    let (ledger, catalog) = (MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    // Act
    let stats = service.run_job(&job(&[SUBPRO_INDEX_URL])).await.unwrap();

    // Assert
    assert_eq!(stats.imported, 1);
    let record = catalog.get(&content_hash(ind)).expect("dataset published");
    assert_eq!(record.category, "demografia");
    let names: Vec<&str> = record.resources.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Indice di vecchiaia", "Comunità di valle"]);
    assert!(record.notes.starts_with("Indice di vecchiaia.\nArea: Popolazione."));
}

/// Test 18: Verify that a retried fetch leaves no orphaned scratch CSVs.
///
/// The second fetch replaces the tables of the first one, and import then
/// consumes everything that is left.
#[tokio::test]
async fn test_fetch_retry_replaces_scratch_files() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());
    let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();
    service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();
    let first_downloads: Vec<std::path::PathBuf> = ledger
        .payload(ids[0])
        .resources
        .iter()
        .filter_map(|r| r.csv_path.clone())
        .collect();

    // Act
    let refetched = service
        .fetch_stage(&ledger.get(ids[0]).unwrap())
        .await
        .unwrap();

    // Assert
    assert!(refetched);
    assert_eq!(first_downloads.len(), 2);
    assert!(first_downloads.iter().all(|p| !p.exists()));
    assert_eq!(scratch_files(scratch.path()), 2, "Only the latest tables are kept");

    service.import_object(ids[0]).await.unwrap();
    assert_eq!(scratch_files(scratch.path()), 0, "Scratch files must be deleted");
}

/// Test 19: Verify that re-importing an existing dataset reports its stored name.
///
/// The slug is taken by the dataset itself, so a fresh allocation would
/// yield a numbered variant the catalog never uses.
#[tokio::test]
async fn test_reimport_reports_stored_name() {
    // Arrange
    let scratch = TempDir::new().unwrap();
    let (source, ledger, catalog) = (legacy_source(), MockLedger::new(), MockCatalog::new());
    let service = service(&source, &ledger, &catalog, scratch.path());

    let mut names = Vec::new();
    for _ in 0..2 {
        let ids = service.gather_stage(&job(&[INDEX_URL])).await.unwrap();
        service
            .fetch_stage(&ledger.get(ids[0]).unwrap())
            .await
            .unwrap();

        // Act
        let record = service.import_object(ids[0]).await.unwrap();
        names.push(record.name);
    }

    // Assert
    assert_eq!(names, vec!["tasso-di-natalita", "tasso-di-natalita"]);
    let stored = catalog.get(&content_hash(META_URL)).unwrap();
    assert_eq!(stored.name, "tasso-di-natalita");
    assert_eq!(catalog.len(), 1);
}
