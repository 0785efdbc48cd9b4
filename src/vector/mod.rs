//! Vector primitives used by the ranking layer.
//!
//! Stored vectors are kept exactly as the embedding model produced them;
//! normalization happens at query time and is never written back.

/// Scale a vector to unit length.
///
/// A zero vector is returned unchanged, so any similarity computed against it
/// is `0.0`.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    // f64 keeps the sum of squares finite and non-zero across the f32 range.
    let norm = vector.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| (f64::from(*x) / norm) as f32).collect()
    } else {
        vector.to_vec()
    }
}

/// Cosine similarity of two unit vectors.
///
/// Both inputs must already be normalized and of equal length; this is a plain
/// dot product and does not re-normalize. Returns `0.0` when either side is
/// empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    debug_assert_eq!(a.len(), b.len(), "vectors must share a dimensionality");

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
