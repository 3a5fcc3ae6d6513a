//! Matching service: catalog documents -> embeddings -> ranked matches.
//!
//! One query runs start to finish before the next:
//! - build the composite document for every record
//! - embed records whose cached vector is missing or stale
//! - persist the cache if anything new was embedded
//! - embed the query and rank

use crate::catalog::{Catalog, CatalogRecord};
use crate::semantic::cache::{CacheError, CacheLookup, EmbeddingCache};
use crate::semantic::composite::build_composite;
use crate::semantic::embedder::{EmbedError, Embedder};
use crate::semantic::ranker::{rank, MatchResult, RankError};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Ranking error: {0}")]
    Rank(#[from] RankError),
}

/// What `refresh_index` did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshResult {
    /// Records whose vector was reused
    pub cached: usize,
    /// Records embedded for the first time
    pub embedded: usize,
    /// Records re-embedded because their document changed
    pub refreshed: usize,
    /// Records with an empty document, never embedded
    pub empty: usize,
}

fn document_for(record: &CatalogRecord) -> String {
    build_composite(
        Some(&record.description),
        Some(&record.industry),
        record.scraped_text.as_deref(),
    )
}

pub struct MatchService<'a> {
    catalog: &'a Catalog,
    cache: &'a mut EmbeddingCache,
    embedder: &'a Embedder,
}

impl<'a> MatchService<'a> {
    pub fn new(catalog: &'a Catalog, cache: &'a mut EmbeddingCache, embedder: &'a Embedder) -> Self {
        Self {
            catalog,
            cache,
            embedder,
        }
    }

    /// Make sure every non-empty catalog document has a fresh cached vector.
    ///
    /// Nothing is written to the cache unless every batch succeeds.
    pub fn refresh_index(&mut self) -> Result<RefreshResult, MatchError> {
        let mut result = RefreshResult::default();
        let mut pending_ids = vec![];
        let mut pending_docs = vec![];

        for record in self.catalog.records() {
            let document = document_for(record);

            if document.is_empty() {
                log::debug!("{}: empty document, not embedded", record.id);
                result.empty += 1;
                continue;
            }

            match self.cache.lookup(&record.id, &document) {
                CacheLookup::Hit(_) => {
                    result.cached += 1;
                    continue;
                }
                CacheLookup::Stale => {
                    log::debug!("{}: document changed, re-embedding", record.id);
                    result.refreshed += 1;
                }
                CacheLookup::Miss => result.embedded += 1,
            }

            pending_ids.push(record.id.as_str());
            pending_docs.push(document);
        }

        if pending_docs.is_empty() {
            return Ok(result);
        }

        log::info!(
            "Embedding {} catalog documents ({} cached)",
            pending_docs.len(),
            result.cached
        );

        let vectors = self.embedder.embed(&pending_docs)?;

        // reject the whole run before the first put so the cache stays untouched
        let expected = self
            .cache
            .dimensions()
            .or_else(|| vectors.first().map(Vec::len))
            .unwrap_or_default();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(CacheError::DimensionMismatch {
                expected,
                got: bad.len(),
            }
            .into());
        }

        for ((id, document), vector) in pending_ids.into_iter().zip(&pending_docs).zip(vectors) {
            self.cache.put(id, document, vector)?;
        }
        self.cache.persist_all()?;

        Ok(result)
    }

    /// Rank the catalog against `query`, best match first.
    pub fn find_matches(&mut self, query: &str, top_n: usize) -> Result<Vec<MatchResult>, MatchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MatchError::EmptyQuery);
        }

        let _span = tracing::info_span!("find_matches", top_n).entered();

        self.refresh_index()?;

        if self.catalog.is_empty() {
            return Ok(vec![]);
        }

        let query_vector = self.embedder.embed_one(query)?;

        // refresh_index left a fresh vector for every record with a non-empty document
        let cache = &*self.cache;
        let candidates = self
            .catalog
            .records()
            .iter()
            .filter(|r| !document_for(r).is_empty())
            .filter_map(|r| cache.get(&r.id).map(|v| (r.id.as_str(), v)));

        let results = rank(&query_vector, candidates, top_n)?;
        log::debug!("{} matches for query", results.len());

        Ok(results)
    }
}
