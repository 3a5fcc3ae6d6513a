//! Reviewer feedback over a ranked match list.
//!
//! The reviewer sees one candidate at a time. Rejecting a candidate hides it
//! for the rest of the session; accepting only records the verdict and the
//! candidate stays eligible. Both verdicts are appended to a `FeedbackLog`.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusty_ulid::Ulid;
use serde::{Deserialize, Serialize};

use crate::semantic::ranker::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
}

/// One immutable feedback record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackObservation {
    pub timestamp: DateTime<Utc>,
    pub session: String,
    pub query: String,
    pub transaction_id: String,
    pub verdict: Verdict,
}

/// Rejected transaction ids for one review session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    rejected: HashSet<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_rejected(&self, id: &str) -> bool {
        self.rejected.contains(id)
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    /// State for the next query: empty, or the current rejections if `carry_over`.
    pub fn for_new_query(self, carry_over: bool) -> Self {
        if carry_over {
            self
        } else {
            Self::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Exhausted,
}

/// Highest-ranked match that has not been rejected.
pub fn next_candidate<'a>(ranked: &'a [MatchResult], state: &SessionState) -> Option<&'a MatchResult> {
    ranked.iter().find(|m| !state.is_rejected(&m.id))
}

pub fn status(ranked: &[MatchResult], state: &SessionState) -> SessionStatus {
    match next_candidate(ranked, state) {
        Some(_) => SessionStatus::Active,
        None => SessionStatus::Exhausted,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only store of feedback observations.
pub trait FeedbackLog {
    fn append(&self, observation: &FeedbackObservation) -> Result<(), FeedbackLogError>;
}

/// Feedback log stored as a CSV file, one row per observation.
pub struct CsvFeedbackLog {
    path: PathBuf,
}

const FEEDBACK_HEADERS: [&str; 5] = ["timestamp", "session", "query", "transaction_id", "verdict"];

impl CsvFeedbackLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read back every stored observation.
    #[cfg(test)]
    pub fn read_all(&self) -> Result<Vec<FeedbackObservation>, FeedbackLogError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let observations = reader
            .deserialize()
            .collect::<Result<Vec<FeedbackObservation>, _>>()?;
        Ok(observations)
    }
}

impl FeedbackLog for CsvFeedbackLog {
    fn append(&self, observation: &FeedbackObservation) -> Result<(), FeedbackLogError> {
        let is_new = !self.path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut csv_wrt = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            csv_wrt.write_record(FEEDBACK_HEADERS)?;
        }
        csv_wrt.serialize(observation)?;
        csv_wrt.flush()?;

        Ok(())
    }
}

/// One reviewer working through the matches for one query.
pub struct FeedbackSession<'a> {
    id: String,
    query: String,
    log: &'a dyn FeedbackLog,
}

impl<'a> FeedbackSession<'a> {
    pub fn new(query: &str, log: &'a dyn FeedbackLog) -> Self {
        Self {
            id: Ulid::generate().to_string(),
            query: query.to_string(),
            log,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Start over with a new query, keeping the session id.
    pub fn with_query(self, query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..self
        }
    }

    pub fn next_candidate<'r>(
        &self,
        ranked: &'r [MatchResult],
        state: &SessionState,
    ) -> Option<&'r MatchResult> {
        next_candidate(ranked, state)
    }

    /// Record an accept. The candidate stays eligible for display.
    pub fn accept(&self, id: &str) -> FeedbackObservation {
        self.record(id, Verdict::Accept)
    }

    /// Record a reject and return the state with `id` excluded.
    pub fn reject(&self, mut state: SessionState, id: &str) -> SessionState {
        self.record(id, Verdict::Reject);
        state.rejected.insert(id.to_string());
        state
    }

    fn record(&self, id: &str, verdict: Verdict) -> FeedbackObservation {
        let observation = FeedbackObservation {
            timestamp: Utc::now(),
            session: self.id.clone(),
            query: self.query.clone(),
            transaction_id: id.to_string(),
            verdict,
        };

        // a lost log line must not block the reviewer
        if let Err(err) = self.log.append(&observation) {
            log::warn!("failed to write feedback for {id}: {err}");
        }

        observation
    }
}
