//! Batched, paced calls to an embedding provider.
//!
//! `embed` splits its input into fixed-size batches, issues one provider call
//! per batch and sleeps between batches to stay under the provider's rate
//! limit. A failing batch fails the whole call; vectors from earlier batches
//! are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::semantic::provider::{EmbeddingProvider, ProviderError};

/// Default number of texts per provider call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default pause between provider calls
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding provider error in batch {batch}: {source}")]
    EmbeddingProviderError {
        batch: usize,
        #[source]
        source: ProviderError,
    },

    #[error("embedding cancelled before batch {batch}")]
    Cancelled { batch: usize },
}

pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    batch_size: usize,
    batch_delay: Duration,
    cancel: Option<Arc<AtomicBool>>,
    show_progress: bool,
}

impl Embedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            cancel: None,
            show_progress: false,
        }
    }

    /// Texts per provider call. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batch_delay(mut self, batch_delay: Duration) -> Self {
        self.batch_delay = batch_delay;
        self
    }

    /// Flag checked before every batch; once set, `embed` stops with `Cancelled`.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Embed `texts`, returning one vector per text in the same order.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let batch_count = texts.len().div_ceil(self.batch_size);
        let progress = self.progress_bar(batch_count);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch, chunk) in texts.chunks(self.batch_size).enumerate() {
            if batch > 0 && !self.batch_delay.is_zero() {
                std::thread::sleep(self.batch_delay);
            }

            if self.is_cancelled() {
                progress.abandon();
                log::warn!("embedding cancelled before batch {batch}/{batch_count}");
                return Err(EmbedError::Cancelled { batch });
            }

            log::debug!(
                "embedding batch {}/{} ({} texts)",
                batch + 1,
                batch_count,
                chunk.len()
            );

            let vectors = self
                .provider
                .embed_batch(chunk)
                .and_then(|vectors| {
                    if vectors.len() == chunk.len() {
                        Ok(vectors)
                    } else {
                        Err(ProviderError::InvalidResponse(format!(
                            "expected {} embeddings, got {}",
                            chunk.len(),
                            vectors.len()
                        )))
                    }
                })
                .map_err(|source| {
                    progress.abandon();
                    log::error!("embedding provider error during batch {batch}: {source}");
                    EmbedError::EmbeddingProviderError { batch, source }
                })?;

            embeddings.extend(vectors);
            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(embeddings)
    }

    /// Embed a single text.
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()])?;
        vectors.pop().ok_or(EmbedError::EmbeddingProviderError {
            batch: 0,
            source: ProviderError::InvalidResponse("no embedding returned".to_string()),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn progress_bar(&self, batch_count: usize) -> ProgressBar {
        if !self.show_progress || batch_count < 2 {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(batch_count as u64);
        if let Ok(style) = ProgressStyle::with_template("embedding {bar:40} {pos}/{len} batches") {
            bar.set_style(style);
        }
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Returns `[batch_no, position_in_batch]` so alignment is checkable.
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        fail_on: Option<usize>,
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                return Err(ProviderError::Model("rate limited".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.parse::<f32>().unwrap_or(-1.0)])
                .collect())
        }

        fn kind(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    fn embedder(fail_on: Option<usize>) -> (Embedder, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            calls: calls.clone(),
            fail_on,
        };
        let embedder = Embedder::new(Box::new(provider))
            .with_batch_size(100)
            .with_batch_delay(Duration::ZERO);
        (embedder, calls)
    }

    fn numbered(count: usize) -> Vec<String> {
        (0..count).map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_batches_and_alignment() {
        let (embedder, calls) = embedder(None);

        let vectors = embedder.embed(&numbered(250)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(vectors.len(), 250);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
    }

    #[test]
    fn test_empty_input_makes_no_calls() {
        let (embedder, calls) = embedder(None);

        let vectors = embedder.embed(&[]).unwrap();

        assert!(vectors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_batch_fails_whole_call() {
        let (embedder, calls) = embedder(Some(1));

        let result = embedder.embed(&numbered(250));

        match result {
            Err(EmbedError::EmbeddingProviderError { batch, .. }) => assert_eq!(batch, 1),
            other => panic!("expected provider error, got {other:?}"),
        }
        // the third batch is never attempted
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_flag_stops_before_next_batch() {
        let (embedder, calls) = embedder(None);
        let cancel = Arc::new(AtomicBool::new(true));
        let embedder = embedder.with_cancel_flag(cancel);

        let result = embedder.embed(&numbered(10));

        assert!(matches!(result, Err(EmbedError::Cancelled { batch: 0 })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let (embedder, calls) = embedder(None);
        let embedder = embedder.with_batch_size(0);

        let vectors = embedder.embed(&numbered(3)).unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_embed_one() {
        let (embedder, _) = embedder(None);
        assert_eq!(embedder.embed_one("7").unwrap(), vec![7.0]);
    }
}
