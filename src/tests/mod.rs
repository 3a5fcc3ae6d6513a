mod matching;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::catalog::CatalogRecord;
use crate::semantic::{EmbeddingProvider, ProviderError};

const VOCABULARY: [&str; 9] = [
    "software",
    "analytics",
    "cloud",
    "company",
    "firm",
    "tech",
    "industrial",
    "pump",
    "manufacturer",
];

/// Bag-of-words provider over a fixed vocabulary; counts calls and can be told to fail.
#[derive(Clone, Default)]
pub struct VocabProvider {
    pub calls: Arc<AtomicUsize>,
    pub texts_seen: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

impl VocabProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_seen(&self) -> usize {
        self.texts_seen.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; VOCABULARY.len()];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            if let Some(pos) = VOCABULARY.iter().position(|w| *w == token) {
                vector[pos] += 1.0;
            }
        }
        vector
    }
}

impl EmbeddingProvider for VocabProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Model("service unavailable".to_string()));
        }
        self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn kind(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "vocab"
    }
}

pub fn record(id: &str, description: &str, industry: &str, multiple: f64) -> CatalogRecord {
    CatalogRecord {
        id: id.to_string(),
        name: format!("{id} Corp"),
        description: description.to_string(),
        industry: industry.to_string(),
        multiple,
        website: None,
        scraped_text: None,
    }
}

pub fn scenario_records() -> Vec<CatalogRecord> {
    vec![
        record("T1", "software analytics firm", "Tech", 8.2),
        record("T2", "industrial pump manufacturer", "Industrial", 5.1),
    ]
}
