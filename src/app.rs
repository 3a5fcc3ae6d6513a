//! Wiring between config, catalog, scraping and the matching engine.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use homedir::my_home;
use inquire::error::InquireResult;

use crate::catalog::Catalog;
use crate::cli::{CatalogArgs, QueryArgs};
use crate::config::{Config, ProviderKind};
use crate::export;
use crate::scrape::ScrapeStore;
use crate::semantic::{
    feedback, model_id_hash, CsvFeedbackLog, EmbedError, Embedder, EmbeddingCache,
    EmbeddingProvider, FeedbackSession, MatchError, MatchResult, MatchService, OpenAiProvider,
    SessionState, SessionStatus, VectorStorage, FEEDBACK_FILE, VECTORS_FILE,
};
use crate::storage::BackendLocal;

/// Base directory: explicit flag, then $DEALMATCH_BASE_PATH, then ~/.local/share/dealmatch
pub fn resolve_base_path(flag: Option<String>) -> anyhow::Result<String> {
    if let Some(path) = flag {
        return Ok(path);
    }
    if let Ok(path) = std::env::var("DEALMATCH_BASE_PATH") {
        return Ok(path);
    }

    let home = my_home()
        .context("Could not determine home directory")?
        .context("Home directory path is empty")?;
    Ok(format!("{}/.local/share/dealmatch", home.to_string_lossy()))
}

/// Cached embeddings to drop before indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidate {
    Nothing,
    All,
    Ids(Vec<String>),
}

impl Invalidate {
    pub fn new(all: bool, ids: Vec<String>) -> Self {
        match (all, ids.is_empty()) {
            (true, _) => Invalidate::All,
            (false, true) => Invalidate::Nothing,
            (false, false) => Invalidate::Ids(ids),
        }
    }

    /// Drop the selected entries, returning how many were removed.
    fn apply(&self, cache: &mut EmbeddingCache) -> usize {
        match self {
            Invalidate::Nothing => 0,
            Invalidate::All => {
                let dropped = cache.len();
                cache.clear();
                dropped
            }
            Invalidate::Ids(ids) => ids
                .iter()
                .filter(|id| {
                    let dropped = cache.invalidate(id);
                    if !dropped {
                        log::warn!("{id} has no cached embedding");
                    }
                    dropped
                })
                .count(),
        }
    }
}

/// Whether `err` comes from an embedding run stopped by Ctrl-C.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MatchError>(),
        Some(MatchError::Embedding(EmbedError::Cancelled { .. }))
    )
}

pub struct App {
    config: Config,
    store: BackendLocal,
    cancel: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: Config, cancel: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let store = BackendLocal::new(config.base_path())?;
        Ok(Self {
            config,
            store,
            cancel,
        })
    }

    fn base_dir(&self) -> PathBuf {
        self.store.base_dir.clone()
    }

    fn build_provider(&self) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
        let emb = &self.config.embedding;
        match emb.provider {
            ProviderKind::Openai => Ok(Box::new(OpenAiProvider::from_config(emb)?)),
            #[cfg(feature = "local-embeddings")]
            ProviderKind::Local => Ok(Box::new(crate::semantic::LocalProvider::new(
                &emb.model,
                self.base_dir(),
            )?)),
            #[cfg(not(feature = "local-embeddings"))]
            ProviderKind::Local => bail!("built without the local-embeddings feature"),
        }
    }

    fn build_embedder(&self) -> anyhow::Result<Embedder> {
        let emb = &self.config.embedding;
        let embedder = Embedder::new(self.build_provider()?)
            .with_batch_size(emb.batch_size)
            .with_batch_delay(Duration::from_millis(emb.batch_delay_ms))
            .with_cancel_flag(self.cancel.clone())
            .with_progress(true);

        let provider = embedder.provider();
        log::info!("Using {} embeddings, model {}", provider.kind(), provider.model());
        Ok(embedder)
    }

    fn open_cache(&self) -> anyhow::Result<EmbeddingCache> {
        let emb = &self.config.embedding;
        let storage = VectorStorage::new(self.base_dir().join(VECTORS_FILE));
        let cache = EmbeddingCache::open(storage, model_id_hash(emb.provider.as_str(), &emb.model))?;
        Ok(cache)
    }

    /// Load the catalog and attach stored (or freshly scraped) website text.
    fn load_catalog(&self, args: &CatalogArgs, rescrape: bool) -> anyhow::Result<Catalog> {
        let mut catalog = Catalog::load(&args.catalog)
            .with_context(|| format!("failed to load catalog {}", args.catalog.display()))?;

        let mut pages = ScrapeStore::load(&self.store)?;
        log::debug!("{} stored scrape results", pages.len());
        if self.config.scrape.enabled && !args.no_scrape {
            let fetched = pages.refresh(&catalog, &self.config.scrape, rescrape)?;
            if fetched > 0 {
                pages.save(&self.store)?;
            }
        }
        pages.apply(&mut catalog);

        Ok(catalog)
    }

    pub fn index(
        &self,
        args: &CatalogArgs,
        rescrape: bool,
        invalidate: Invalidate,
    ) -> anyhow::Result<()> {
        let catalog = self.load_catalog(args, rescrape)?;
        let embedder = self.build_embedder()?;
        let mut cache = self.open_cache()?;

        let dropped = invalidate.apply(&mut cache);
        if dropped > 0 {
            log::info!("Dropped {dropped} cached embeddings");
        }

        let result = MatchService::new(&catalog, &mut cache, &embedder).refresh_index()?;
        // drops of ids no longer in the catalog leave nothing to embed
        cache.persist_all()?;

        println!(
            "{} records indexed: {} embedded, {} re-embedded, {} cached, {} empty, {} skipped rows",
            catalog.len(),
            result.embedded,
            result.refreshed,
            result.cached,
            result.empty,
            catalog.skipped().len()
        );
        if let Some(dimensions) = cache.dimensions() {
            println!("{} vectors of {dimensions} dimensions cached", cache.len());
        }
        Ok(())
    }

    fn matches(
        &self,
        catalog: &Catalog,
        cache: &mut EmbeddingCache,
        embedder: &Embedder,
        query: &str,
        top: Option<usize>,
    ) -> anyhow::Result<Vec<MatchResult>> {
        let top_n = top.unwrap_or(self.config.matching.top_n);
        let results = MatchService::new(catalog, cache, embedder).find_matches(query, top_n)?;
        Ok(results)
    }

    pub fn search(
        &self,
        catalog_args: &CatalogArgs,
        query_args: &QueryArgs,
        export_path: Option<&Path>,
    ) -> anyhow::Result<()> {
        let query = read_query(query_args)?;
        let catalog = self.load_catalog(catalog_args, false)?;
        let embedder = self.build_embedder()?;
        let mut cache = self.open_cache()?;
        let results = self.matches(&catalog, &mut cache, &embedder, &query, query_args.top)?;

        match export_path {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                export::write_matches(file, &catalog, &results)?;
                println!("{} matches written to {}", results.len(), path.display());
            }
            None => {
                let rows = export::match_rows(&catalog, &results);
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        }

        Ok(())
    }

    pub fn review(&self, catalog_args: &CatalogArgs, query_args: &QueryArgs) -> anyhow::Result<()> {
        let mut query = read_query(query_args)?;
        let catalog = self.load_catalog(catalog_args, false)?;
        let embedder = self.build_embedder()?;
        let mut cache = self.open_cache()?;

        let log = CsvFeedbackLog::new(self.base_dir().join(FEEDBACK_FILE));
        let mut session = FeedbackSession::new(&query, &log);
        let mut state = SessionState::new();
        log::info!("Review session {}", session.id());

        loop {
            let results = self.matches(&catalog, &mut cache, &embedder, &query, query_args.top)?;
            println!(
                "Top matches for \"{}\": {}",
                preview(session.query().trim(), 60),
                results.len()
            );

            let (next_state, quit) = review_matches(&catalog, &session, &results, state)?;
            state = next_state;
            if quit {
                return Ok(());
            }

            if feedback::status(&results, &state) == SessionStatus::Exhausted {
                println!("You've reviewed all matches for this query!");
            }

            let next = inquire::Text::new("Next company profile (empty to quit):").prompt()?;
            if next.trim().is_empty() {
                return Ok(());
            }

            query = next;
            session = session.with_query(&query);
            state = state.for_new_query(self.config.matching.carry_rejections);
            if state.rejected_count() > 0 {
                println!("{} rejected matches stay hidden", state.rejected_count());
            }
        }
    }
}

/// Walk the ranked list until it is exhausted or the reviewer quits.
///
/// Returns the updated state and whether the reviewer asked to quit.
fn review_matches(
    catalog: &Catalog,
    session: &FeedbackSession<'_>,
    results: &[MatchResult],
    mut state: SessionState,
) -> anyhow::Result<(SessionState, bool)> {
    while let Some(candidate) = session.next_candidate(results, &state) {
        let Some(record) = catalog.get(&candidate.id) else {
            log::warn!("{} is not in the catalog, skipping", candidate.id);
            state = session.reject(state, &candidate.id);
            continue;
        };

        println!();
        println!(
            "{} ({}), EV/EBITDA {:.1}x, score {:.3}",
            record.name, record.industry, record.multiple, candidate.score
        );
        println!("  {}", preview(&record.description, 80));

        match inquire::Select::new("Is this a good comparable?", REVIEW_CHOICES.to_vec()).prompt() {
            InquireResult::Ok(CHOICE_ACCEPT) => {
                session.accept(&candidate.id);
                println!("Feedback saved for: {}", record.name);
            }
            InquireResult::Ok(CHOICE_REJECT) => {
                state = session.reject(state, &candidate.id);
                println!("Rejected: {}, showing next best match...", record.name);
            }
            InquireResult::Ok(_) => return Ok((state, true)),
            InquireResult::Err(err) => bail!("An error occurred: {}", err),
        }
    }

    Ok((state, false))
}

const CHOICE_ACCEPT: &str = "Accept";
const CHOICE_REJECT: &str = "Reject";
const CHOICE_QUIT: &str = "Quit";
const REVIEW_CHOICES: [&str; 3] = [CHOICE_ACCEPT, CHOICE_REJECT, CHOICE_QUIT];

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn read_query(args: &QueryArgs) -> anyhow::Result<String> {
    let query = match (&args.query, &args.query_file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => inquire::Text::new("Paste company profile:").prompt()?,
    };

    if query.trim().is_empty() {
        bail!("company profile is empty");
    }
    Ok(query)
}
