//! Property tests for vector index search ordering.

use proptest::prelude::*;
use research_chatbot::chunking::{Chunk, ChunkMetadata};
use research_chatbot::embeddings::Embedding;
use research_chatbot::index::{IndexEntry, VectorIndex};

const DIM: usize = 8;

/// A non-zero embedding of the given dimension
fn arb_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim)
        .prop_filter("non-zero embedding", |v| v.iter().any(|x| x.abs() > 1e-3))
}

fn entry(chunk_index: usize, values: Vec<f32>) -> IndexEntry {
    IndexEntry {
        chunk: Chunk {
            text: format!("chunk {}", chunk_index),
            token_count: 2,
            metadata: ChunkMetadata {
                file_name: "doc.pdf".to_string(),
                page_label: Some("1".to_string()),
                chunk_index,
            },
        },
        embedding: Embedding::from(values),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Results are best first, bounded by k, and never invented
    #[test]
    fn search_is_ordered_and_bounded(
        vectors in proptest::collection::vec(arb_embedding(DIM), 1..20),
        query in arb_embedding(DIM),
        k in 0usize..25,
    ) {
        let mut index = VectorIndex::new("test-model");
        let count = vectors.len();
        index
            .add(vectors.into_iter().enumerate().map(|(i, v)| entry(i, v)).collect())
            .unwrap();

        let results = index.search(&query, k).unwrap();

        prop_assert_eq!(results.len(), k.min(count));
        for window in results.windows(2) {
            prop_assert!(
                window[0].score >= window[1].score,
                "results not in descending order: {} < {}",
                window[0].score,
                window[1].score,
            );
        }
        for result in &results {
            prop_assert!(result.score >= -1.0001 && result.score <= 1.0001);
        }
    }

    /// Entries with identical vectors come back in insertion order
    #[test]
    fn ties_keep_insertion_order(
        vector in arb_embedding(DIM),
        copies in 2usize..10,
    ) {
        let mut index = VectorIndex::new("test-model");
        index
            .add((0..copies).map(|i| entry(i, vector.clone())).collect())
            .unwrap();

        let results = index.search(&vector, copies).unwrap();
        let order: Vec<usize> = results
            .iter()
            .map(|result| result.entry.chunk.metadata.chunk_index)
            .collect();
        prop_assert_eq!(order, (0..copies).collect::<Vec<_>>());
    }
}
