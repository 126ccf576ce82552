use crate::error::StoreError;
use crate::models::{RetrievedChunk, VectorStoreEntry};

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Scores `entries` (in insertion order) against the query and keeps the best `k`.
pub fn top_k(
    entries: &[VectorStoreEntry],
    query_vector: &[f32],
    k: usize,
) -> Result<Vec<RetrievedChunk>, StoreError> {
    if k == 0 || entries.is_empty() {
        return Ok(Vec::new());
    }

    let expected = entries[0].vector.len();
    if query_vector.len() != expected {
        return Err(StoreError::DimensionMismatch {
            expected,
            found: query_vector.len(),
        });
    }

    let mut scored: Vec<(usize, f32)> = entries
        .iter()
        .enumerate()
        .map(|(position, entry)| (position, cosine_similarity(query_vector, &entry.vector)))
        .collect();

    // sort_by is stable, so ties stay in insertion order
    scored.sort_by(|left, right| right.1.total_cmp(&left.1));

    Ok(scored
        .into_iter()
        .take(k)
        .map(|(position, score)| {
            let entry = &entries[position];
            RetrievedChunk {
                score,
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
            }
        })
        .collect())
}
