use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::{record, scenario_records, VocabProvider};
use crate::catalog::Catalog;
use crate::export;
use crate::semantic::{
    model_id_hash, CacheError, EmbedError, Embedder, EmbeddingCache, EmbeddingProvider,
    MatchError, MatchService, ProviderError, VectorStorage, MATCH_RATIONALE, VECTORS_FILE,
};

const QUERY: &str = "cloud analytics software company";

fn embedder(provider: &VocabProvider) -> Embedder {
    Embedder::new(Box::new(provider.clone()))
        .with_batch_size(100)
        .with_batch_delay(Duration::ZERO)
}

fn open_cache(dir: &std::path::Path) -> EmbeddingCache {
    let storage = VectorStorage::new(dir.join(VECTORS_FILE));
    EmbeddingCache::open(storage, model_id_hash("test", "vocab")).unwrap()
}

#[test]
fn software_firm_ranks_above_pump_maker() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());
    let catalog = Catalog::from_records(scenario_records());

    let results = MatchService::new(&catalog, &mut cache, &embedder)
        .find_matches(QUERY, 10)
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "T1");
    assert_eq!(results[1].id, "T2");
    assert!(results[0].score > results[1].score);
    assert!((results[0].score - 0.5).abs() < 1e-6);
    assert!(results.iter().all(|r| r.rationale == MATCH_RATIONALE));
}

#[test]
fn empty_catalog_returns_no_matches() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());
    let catalog = Catalog::default();

    let results = MatchService::new(&catalog, &mut cache, &embedder)
        .find_matches(QUERY, 10)
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(provider.calls(), 0);
}

#[test]
fn empty_query_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());
    let catalog = Catalog::from_records(scenario_records());

    let result = MatchService::new(&catalog, &mut cache, &embedder).find_matches("  \n", 10);

    assert!(matches!(result, Err(MatchError::EmptyQuery)));
    assert_eq!(provider.calls(), 0);
}

#[test]
fn cached_vectors_are_reused_across_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let catalog = Catalog::from_records(scenario_records());

    {
        let mut cache = open_cache(tmp.path());
        MatchService::new(&catalog, &mut cache, &embedder)
            .find_matches(QUERY, 10)
            .unwrap();
    }
    // one catalog batch + one query
    assert_eq!(provider.calls(), 2);
    assert_eq!(provider.texts_seen(), 3);
    assert!(tmp.path().join(VECTORS_FILE).exists());

    let mut cache = open_cache(tmp.path());
    assert_eq!(cache.len(), 2);
    let results = MatchService::new(&catalog, &mut cache, &embedder)
        .find_matches("industrial pump", 1)
        .unwrap();

    // only the query was embedded this time
    assert_eq!(provider.calls(), 3);
    assert_eq!(provider.texts_seen(), 4);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "T2");
}

#[test]
fn changed_document_is_re_embedded() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());

    let mut catalog = Catalog::from_records(scenario_records());
    let first = MatchService::new(&catalog, &mut cache, &embedder)
        .refresh_index()
        .unwrap();
    assert_eq!(first.embedded, 2);

    catalog.records_mut()[1].scraped_text = Some("cloud software for pump fleets".to_string());

    let second = MatchService::new(&catalog, &mut cache, &embedder)
        .refresh_index()
        .unwrap();
    assert_eq!(second.cached, 1);
    assert_eq!(second.refreshed, 1);
    assert_eq!(second.embedded, 0);

    let expected =
        VocabProvider::vector("industrial pump manufacturer Industrial cloud software for pump fleets");
    assert_eq!(cache.get("T2").unwrap(), expected.as_slice());
}

#[test]
fn provider_failure_aborts_query_and_keeps_cache_clean() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    provider.fail(true);
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());
    let catalog = Catalog::from_records(scenario_records());

    let result = MatchService::new(&catalog, &mut cache, &embedder).find_matches(QUERY, 10);

    match result {
        Err(MatchError::Embedding(EmbedError::EmbeddingProviderError { batch, .. })) => {
            assert_eq!(batch, 0)
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert!(cache.is_empty());
    assert!(!tmp.path().join(VECTORS_FILE).exists());

    // the service recovers once the provider does
    provider.fail(false);
    let results = MatchService::new(&catalog, &mut cache, &embedder)
        .find_matches(QUERY, 10)
        .unwrap();
    assert_eq!(results[0].id, "T1");
}

#[test]
fn cancelled_run_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider).with_cancel_flag(Arc::new(AtomicBool::new(true)));
    let mut cache = open_cache(tmp.path());
    let catalog = Catalog::from_records(scenario_records());

    let result = MatchService::new(&catalog, &mut cache, &embedder).refresh_index();

    assert!(matches!(
        result,
        Err(MatchError::Embedding(EmbedError::Cancelled { batch: 0 }))
    ));
    assert!(cache.is_empty());
    assert_eq!(provider.calls(), 0);
}

#[test]
fn large_catalog_is_embedded_in_batches() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());

    let records = (0..250)
        .map(|i| {
            let industry = if i % 2 == 0 { "Tech" } else { "Industrial" };
            record(&format!("T{i}"), "software firm", industry, 1.0)
        })
        .collect();
    let catalog = Catalog::from_records(records);

    let results = MatchService::new(&catalog, &mut cache, &embedder)
        .find_matches("tech software", 5)
        .unwrap();

    // three catalog batches + one query
    assert_eq!(provider.calls(), 4);
    assert_eq!(cache.len(), 250);
    assert_eq!(results.len(), 5);
    // ties keep catalog order
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["T0", "T2", "T4", "T6", "T8"]);
}

#[test]
fn catalog_csv_to_export() {
    let tmp = tempfile::tempdir().unwrap();
    let csv_path = tmp.path().join("Database.csv");
    std::fs::write(
        &csv_path,
        "Target/Issuer Name,MI Transaction ID,Implied Enterprise Value/ EBITDA (x),\"Business Description\n(Target/Issuer)\",\"Primary Industry\n(Target/Issuer)\",Web page\n\
         Acme Analytics,T1,8.2,software analytics firm,Tech,acme.io\n\
         Pumpco,T2,5.1,industrial pump manufacturer,Industrial,\n\
         Broken,T3,,missing multiple,Tech,\n",
    )
    .unwrap();

    let catalog = Catalog::load(&csv_path).unwrap();
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.skipped().len(), 1);

    let provider = VocabProvider::default();
    let embedder = embedder(&provider);
    let mut cache = open_cache(tmp.path());
    let results = MatchService::new(&catalog, &mut cache, &embedder)
        .find_matches(QUERY, 10)
        .unwrap();

    let mut out = vec![];
    export::write_matches(&mut out, &catalog, &results).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("Acme Analytics,T1,8.2,"));
    assert!(lines[2].starts_with("Pumpco,T2,5.1,"));
}

/// Returns a two-wide vector for the first text of a batch and three-wide for the rest.
struct RaggedProvider;

impl EmbeddingProvider for RaggedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok((0..texts.len())
            .map(|i| if i == 0 { vec![1.0, 0.0] } else { vec![1.0, 0.0, 0.0] })
            .collect())
    }

    fn kind(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "ragged"
    }
}

#[test]
fn mixed_vector_widths_leave_cache_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let embedder = Embedder::new(Box::new(RaggedProvider)).with_batch_delay(Duration::ZERO);
    let mut cache = open_cache(tmp.path());
    let catalog = Catalog::from_records(scenario_records());

    let result = MatchService::new(&catalog, &mut cache, &embedder).refresh_index();

    assert!(matches!(
        result,
        Err(MatchError::Cache(CacheError::DimensionMismatch {
            expected: 2,
            got: 3
        }))
    ));
    assert!(cache.is_empty());
    assert_eq!(cache.dimensions(), None);
    assert!(!tmp.path().join(VECTORS_FILE).exists());
}
