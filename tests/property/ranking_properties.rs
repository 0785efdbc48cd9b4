use litreview_search::models::{EmbeddingRecord, Metadata};
use litreview_search::ranking::{rank, rank_excluding, RankingOptions};
use litreview_search::vector::{cosine_similarity, normalize};
use proptest::prelude::*;

const DIM: usize = 8;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, DIM)
}

fn arb_records() -> impl Strategy<Value = Vec<EmbeddingRecord>> {
    prop::collection::vec(arb_vector(), 0..40).prop_map(|vectors| {
        vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| EmbeddingRecord::new(format!("passage {}", i), v, Metadata::new()))
            .collect()
    })
}

proptest! {
    #[test]
    fn results_are_sorted_descending(
        query in arb_vector(),
        records in arb_records(),
        top_k in 1usize..20,
        threshold in -1.0f32..1.0,
    ) {
        let results = rank(&query, &records, &RankingOptions::new(top_k, threshold));
        for pair in results.windows(2) {
            prop_assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn results_respect_threshold_and_top_k(
        query in arb_vector(),
        records in arb_records(),
        top_k in 1usize..20,
        threshold in -1.0f32..1.0,
    ) {
        let results = rank(&query, &records, &RankingOptions::new(top_k, threshold));
        prop_assert!(results.len() <= top_k);
        for result in &results {
            prop_assert!(result.similarity > threshold);
            prop_assert_eq!(&result.text, &records[result.index].text);
        }
    }

    #[test]
    fn no_qualifying_record_is_left_out(
        query in arb_vector(),
        records in arb_records(),
        threshold in -1.0f32..1.0,
    ) {
        let results = rank(&query, &records, &RankingOptions::new(records.len() + 1, threshold));
        let q = normalize(&query);
        let expected = records
            .iter()
            .filter(|r| cosine_similarity(&q, &normalize(r.vector.as_deref().unwrap_or(&[]))) > threshold)
            .count();
        prop_assert_eq!(results.len(), expected);
    }

    #[test]
    fn threshold_is_strict(query in arb_vector(), target in arb_vector()) {
        let similarity = cosine_similarity(&normalize(&query), &normalize(&target));
        let records = vec![EmbeddingRecord::new("target", target, Metadata::new())];

        let at_threshold = rank(&query, &records, &RankingOptions::new(10, similarity));
        prop_assert!(at_threshold.is_empty());

        let below = rank(&query, &records, &RankingOptions::new(10, similarity - 1e-3));
        prop_assert_eq!(below.len(), 1);
    }

    #[test]
    fn excluded_record_never_returned(
        query in arb_vector(),
        records in arb_records(),
        excluded in 0usize..40,
    ) {
        let results = rank_excluding(&query, &records, &RankingOptions::new(50, -1.0), Some(excluded));
        prop_assert!(results.iter().all(|r| r.index != excluded));
    }
}
