use litreview_search::vector::{cosine_similarity, normalize};
use proptest::prelude::*;

const TOLERANCE: f32 = 1e-4;

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Vectors with at least one component far enough from zero to normalize.
fn arb_nonzero_vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, 1..64).prop_filter("non-zero vector", |v| norm(v) > 1e-3)
}

proptest! {
    #[test]
    fn normalized_vectors_have_unit_length(v in arb_nonzero_vector()) {
        let n = normalize(&v);
        prop_assert_eq!(n.len(), v.len());
        prop_assert!((norm(&n) - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn unit_length_across_magnitudes(v in arb_nonzero_vector(), exponent in -30i32..30) {
        let scale = 10f32.powi(exponent);
        let scaled: Vec<f32> = v.iter().map(|x| x * scale).collect();
        prop_assume!(scaled.iter().all(|x| x.is_finite()) && scaled.iter().any(|x| *x != 0.0));

        let n = normalize(&scaled);
        prop_assert!((norm(&n) - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn zero_vector_is_unchanged(len in 0usize..64) {
        let zero = vec![0.0f32; len];
        prop_assert_eq!(normalize(&zero), zero);
    }

    #[test]
    fn self_similarity_is_one(v in arb_nonzero_vector()) {
        let a = normalize(&v);
        prop_assert!((cosine_similarity(&a, &a) - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn opposite_similarity_is_minus_one(v in arb_nonzero_vector()) {
        let a = normalize(&v);
        let negated: Vec<f32> = a.iter().map(|x| -x).collect();
        prop_assert!((cosine_similarity(&a, &negated) + 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn similarity_is_bounded_and_symmetric(
        (a, b) in (1usize..32).prop_flat_map(|len| (
            prop::collection::vec(-10.0f32..10.0, len),
            prop::collection::vec(-10.0f32..10.0, len),
        ))
    ) {
        let a = normalize(&a);
        let b = normalize(&b);
        let ab = cosine_similarity(&a, &b);
        prop_assert!(ab <= 1.0 + TOLERANCE && ab >= -1.0 - TOLERANCE);
        prop_assert!((ab - cosine_similarity(&b, &a)).abs() < TOLERANCE);
    }

    #[test]
    fn normalize_is_idempotent(v in arb_nonzero_vector()) {
        let once = normalize(&v);
        let twice = normalize(&once);
        for (x, y) in once.iter().zip(twice.iter()) {
            prop_assert!((x - y).abs() < TOLERANCE);
        }
    }
}
