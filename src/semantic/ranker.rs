//! Cosine similarity ranking of catalog records against a query vector.

use serde::Serialize;

/// Rationale attached to every match.
pub const MATCH_RATIONALE: &str = "semantic + content + industry similarity";

/// A ranked catalog record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Transaction id of the matched record
    pub id: String,
    /// Cosine similarity (-1.0 to 1.0)
    pub score: f32,
    pub rationale: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Dimension mismatch for {id}: query has {expected}, candidate has {got}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        got: usize,
    },
}

/// Rank `candidates` by cosine similarity to `query`, highest first.
///
/// Candidates are expected in catalog order; equal scores keep that order.
/// A zero-norm vector on either side scores 0. Returns at most `top_n` results.
pub fn rank<'a, I>(query: &[f32], candidates: I, top_n: usize) -> Result<Vec<MatchResult>, RankError>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let query_norm = l2_norm(query);

    let mut results = candidates
        .into_iter()
        .map(|(id, embedding)| {
            if embedding.len() != query.len() {
                return Err(RankError::DimensionMismatch {
                    id: id.to_string(),
                    expected: query.len(),
                    got: embedding.len(),
                });
            }

            Ok(MatchResult {
                id: id.to_string(),
                score: cosine_similarity(query, embedding, query_norm),
                rationale: MATCH_RATIONALE,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // stable sort keeps catalog order for ties
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_n);

    Ok(results)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product of the L2-normalized vectors. `query_norm` is precomputed.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    // NaN norms fall through here too
    if !(query_norm > 0.0 && target_norm > 0.0) {
        return 0.0;
    }

    query
        .iter()
        .zip(target)
        .map(|(a, b)| (a / query_norm) * (b / target_norm))
        .sum::<f32>()
        .clamp(-1.0, 1.0)
}
