//! Website text for catalog records.
//!
//! Fetches the live site first and falls back to web.archive.org. Any failure
//! becomes `ScrapeOutcome::NoText` with the reason kept for logging and retry
//! decisions; for document building both variants collapse to a string.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogRecord};
use crate::config::ScrapeConfig;
use crate::storage::{BackendLocal, StorageManager};

const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

const ARCHIVE_PREFIX: &str = "http://web.archive.org/web/";

pub const SCRAPE_STORE_FILE: &str = "scraped.json";

static BODY_SELECTOR: Lazy<scraper::Selector> =
    Lazy::new(|| scraper::Selector::parse("body").expect("Failed to compile body selector"));

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoTextReason {
    NoWebsite,
    InvalidUrl(String),
    Request(String),
    Status(u16),
    EmptyPage,
}

impl NoTextReason {
    /// Worth trying again on a later run.
    pub fn is_transient(&self) -> bool {
        match self {
            NoTextReason::Request(_) => true,
            NoTextReason::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrapeOutcome {
    Text(String),
    NoText(NoTextReason),
}

impl ScrapeOutcome {
    /// Page text; every `NoText` reason reads as an empty string.
    pub fn text(&self) -> &str {
        match self {
            ScrapeOutcome::Text(text) => text,
            ScrapeOutcome::NoText(_) => "",
        }
    }

}

/// Live and archive URLs for a website reference such as "acme.io" or "https://www.acme.io/".
fn site_urls(website: &str) -> Result<(String, String), NoTextReason> {
    let website = website.trim();
    if website.is_empty() {
        return Err(NoTextReason::NoWebsite);
    }

    let parsed = if website.contains("://") {
        url::Url::parse(website)
    } else {
        url::Url::parse(&format!("https://{website}"))
    }
    .map_err(|e| NoTextReason::InvalidUrl(format!("{website}: {e}")))?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| NoTextReason::InvalidUrl(website.to_string()))?;
    let path = parsed.path().trim_end_matches('/');
    let domain = format!("{host}{path}");

    Ok((format!("https://{domain}"), format!("{ARCHIVE_PREFIX}{domain}")))
}

fn fetch_html(url: &str, timeout: Duration) -> Result<String, NoTextReason> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT_DEFAULT)
        .timeout(timeout)
        .build()
        .map_err(|e| NoTextReason::Request(e.to_string()))?;

    log::debug!("{url}: requesting");
    let resp = client
        .get(url)
        .send()
        .map_err(|e| NoTextReason::Request(e.to_string()))?;

    let status = resp.status();
    if status != StatusCode::OK {
        return Err(NoTextReason::Status(status.as_u16()));
    }

    resp.text().map_err(|e| NoTextReason::Request(e.to_string()))
}

/// Visible text of an HTML page, whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let root = document
        .select(&BODY_SELECTOR)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut parts = vec![];
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .map(|name| matches!(name, "script" | "style" | "noscript" | "template"))
            .unwrap_or(false);

        if !hidden {
            parts.push(&**text);
        }
    }

    WHITESPACE.replace_all(&parts.join(" "), " ").trim().to_string()
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

fn page_text<F>(fetch: &F, url: &str, timeout: Duration, max_chars: usize) -> Result<String, NoTextReason>
where
    F: Fn(&str, Duration) -> Result<String, NoTextReason>,
{
    let text = extract_text(&fetch(url, timeout)?);
    if text.is_empty() {
        return Err(NoTextReason::EmptyPage);
    }
    Ok(truncate_chars(text, max_chars))
}

/// Scrape one website, falling back to the archive.
pub fn scrape_text(website: Option<&str>, config: &ScrapeConfig) -> ScrapeOutcome {
    scrape_with(website, config, fetch_html)
}

/// `scrape_text` over any `fetch(url, timeout) -> html`.
fn scrape_with<F>(website: Option<&str>, config: &ScrapeConfig, fetch: F) -> ScrapeOutcome
where
    F: Fn(&str, Duration) -> Result<String, NoTextReason>,
{
    let (live, archive) = match site_urls(website.unwrap_or_default()) {
        Ok(urls) => urls,
        Err(reason) => return ScrapeOutcome::NoText(reason),
    };

    let live_timeout = Duration::from_secs(config.timeout_secs);
    let live_err = match page_text(&fetch, &live, live_timeout, config.max_text_length) {
        Ok(text) => return ScrapeOutcome::Text(text),
        Err(err) => err,
    };
    log::debug!("{live}: {live_err:?}, trying archive");

    match page_text(
        &fetch,
        &archive,
        Duration::from_secs(config.archive_timeout_secs),
        config.max_text_length,
    ) {
        Ok(text) => ScrapeOutcome::Text(text),
        Err(err) => {
            log::debug!("{archive}: {err:?}");
            ScrapeOutcome::NoText(err)
        }
    }
}

/// Outcome of scraping one website, remembered with the website it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredPage {
    website: Option<String>,
    outcome: ScrapeOutcome,
}

/// Scrape results keyed by transaction id, persisted as JSON.
#[derive(Debug, Default)]
pub struct ScrapeStore {
    pages: HashMap<String, StoredPage>,
}

impl ScrapeStore {
    pub fn load(store: &BackendLocal) -> anyhow::Result<Self> {
        if !store.exists(SCRAPE_STORE_FILE) {
            return Ok(Self::default());
        }

        let pages = match serde_json::from_slice(&store.read(SCRAPE_STORE_FILE)?) {
            Ok(pages) => pages,
            Err(err) => {
                log::warn!("{SCRAPE_STORE_FILE} is malformed, scraping again: {err}");
                HashMap::new()
            }
        };

        Ok(Self { pages })
    }

    pub fn save(&self, store: &BackendLocal) -> anyhow::Result<()> {
        store.write(SCRAPE_STORE_FILE, &serde_json::to_vec(&self.pages)?)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&ScrapeOutcome> {
        self.pages.get(id).map(|p| &p.outcome)
    }

    pub fn insert(&mut self, id: String, website: Option<String>, outcome: ScrapeOutcome) {
        self.pages.insert(id, StoredPage { website, outcome });
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Stored outcome for `record`, if it was scraped from the record's current website.
    fn current(&self, record: &CatalogRecord) -> Option<&ScrapeOutcome> {
        self.pages
            .get(&record.id)
            .filter(|p| p.website == record.website)
            .map(|p| &p.outcome)
    }

    /// Copy stored text onto the matching catalog records.
    pub fn apply(&self, catalog: &mut Catalog) {
        for record in catalog.records_mut() {
            record.scraped_text = self
                .current(record)
                .map(ScrapeOutcome::text)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
        }
    }

    fn needs_scrape(&self, record: &CatalogRecord, rescrape: bool) -> bool {
        if rescrape {
            return true;
        }
        match self.current(record) {
            None => true,
            Some(ScrapeOutcome::NoText(reason)) => reason.is_transient(),
            Some(ScrapeOutcome::Text(_)) => false,
        }
    }

    /// Scrape every record that has no usable stored result, in parallel.
    ///
    /// Returns the number of sites fetched.
    pub fn refresh(
        &mut self,
        catalog: &Catalog,
        config: &ScrapeConfig,
        rescrape: bool,
    ) -> anyhow::Result<usize> {
        let todo: Vec<(&str, Option<&str>)> = catalog
            .records()
            .iter()
            .filter(|r| self.needs_scrape(r, rescrape))
            .map(|r| (r.id.as_str(), r.website.as_deref()))
            .collect();

        if todo.is_empty() {
            return Ok(0);
        }

        log::info!("Scraping {} websites", todo.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .build()?;

        let progress = ProgressBar::new(todo.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("scraping {bar:40} {pos}/{len}") {
            progress.set_style(style);
        }

        let results: Vec<(String, Option<String>, ScrapeOutcome)> = pool.install(|| {
            todo.par_iter()
                .map(|(id, website)| {
                    let outcome = scrape_text(*website, config);
                    progress.inc(1);
                    (id.to_string(), website.map(str::to_string), outcome)
                })
                .collect()
        });
        progress.finish_and_clear();

        let fetched = results.len();
        let with_text = results
            .iter()
            .filter(|(_, _, o)| matches!(o, ScrapeOutcome::Text(_)))
            .count();
        log::info!("Scraped {with_text}/{fetched} websites with text");

        for (id, website, outcome) in results {
            self.insert(id, website, outcome);
        }

        Ok(fetched)
    }
}
