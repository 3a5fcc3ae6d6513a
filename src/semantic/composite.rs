//! Composite document construction for embedding input.
//!
//! Each catalog record is embedded as one document built from:
//! 1. Business description
//! 2. Industry label
//! 3. Scraped website text
//!
//! Empty components are skipped and the rest are joined with a single space.

use sha2::{Digest, Sha256};

/// Build the composite document for a record.
///
/// Absent inputs are treated as empty strings. Never fails; a record with
/// nothing to say yields an empty document.
pub fn build_composite(
    description: Option<&str>,
    industry: Option<&str>,
    scraped_text: Option<&str>,
) -> String {
    [description, industry, scraped_text]
        .into_iter()
        .map(|part| part.unwrap_or_default())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 fingerprint of a composite document.
///
/// Stored next to each cached embedding so a changed document is detected
/// as stale instead of silently reusing the old vector.
pub fn document_fingerprint(document: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(document.as_bytes());
    hasher.finalize().into()
}
