//! Property tests for in-memory vector store search ordering and upserts.

use std::collections::HashMap;

use medrag::document::{Chunk, IndexEntry, IndexManifest};
use medrag::inmemory::InMemoryVectorStore;
use medrag::vectorstore::VectorStore;
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate an index entry with a normalized embedding.
fn arb_entry(dim: usize) -> impl Strategy<Value = IndexEntry> {
    ("[a-c]{1,2}", 0usize..4, "[a-z ]{5,30}", arb_normalized_embedding(dim)).prop_map(
        |(document_id, chunk_index, text, embedding)| IndexEntry {
            chunk: Chunk {
                document_id,
                chunk_index,
                start: 0,
                end: text.len(),
                text,
                metadata: HashMap::new(),
            },
            embedding,
        },
    )
}

fn manifest(dim: usize) -> IndexManifest {
    IndexManifest { embedding_model: "test-model".to_string(), dimensions: dim }
}

/// Searching SHALL return results ordered by descending cosine similarity,
/// never more than `top_k`, and never more than the number of distinct keys.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, unique_count, count) = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.write_manifest(&manifest(DIM)).await.unwrap();
                store.upsert(&entries).await.unwrap();

                let unique: std::collections::HashSet<_> =
                    entries.iter().map(|e| e.chunk.key()).collect();
                let results = store.search(&query, top_k).await.unwrap();
                (results, unique.len(), store.count().await.unwrap())
            });

            prop_assert_eq!(count, unique_count);
            prop_assert!(results.len() <= top_k);
            prop_assert_eq!(results.len(), top_k.min(unique_count));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }

        #[test]
        fn upserting_twice_does_not_grow_the_index(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (once, twice) = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.write_manifest(&manifest(DIM)).await.unwrap();
                store.upsert(&entries).await.unwrap();
                let once = store.count().await.unwrap();
                store.upsert(&entries).await.unwrap();
                (once, store.count().await.unwrap())
            });
            prop_assert_eq!(once, twice);
        }
    }
}

#[tokio::test]
async fn equal_scores_keep_insertion_order() {
    let store = InMemoryVectorStore::new();
    store.write_manifest(&manifest(2)).await.unwrap();
    let entry = |doc: &str| IndexEntry {
        chunk: Chunk {
            document_id: doc.to_string(),
            chunk_index: 0,
            start: 0,
            end: 1,
            text: doc.to_string(),
            metadata: HashMap::new(),
        },
        embedding: vec![1.0, 0.0],
    };
    for doc in ["first", "second", "third"] {
        store.upsert(&[entry(doc)]).await.unwrap();
    }
    // Overwriting keeps the original position.
    store.upsert(&[entry("first")]).await.unwrap();

    let results = store.search(&[1.0, 0.0], 3).await.unwrap();
    let order: Vec<_> = results.iter().map(|r| r.entry.chunk.document_id.as_str()).collect();
    assert_eq!(order, ["first", "second", "third"]);
}

#[tokio::test]
async fn empty_index_searches_to_nothing() {
    let store = InMemoryVectorStore::new();
    assert!(store.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(store.distinct_documents().await.unwrap(), 0);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let store = InMemoryVectorStore::new();
    store.write_manifest(&manifest(3)).await.unwrap();
    let entry = IndexEntry {
        chunk: Chunk {
            document_id: "d".into(),
            chunk_index: 0,
            start: 0,
            end: 1,
            text: "x".into(),
            metadata: HashMap::new(),
        },
        embedding: vec![1.0, 0.0],
    };
    assert!(matches!(
        store.upsert(&[entry]).await,
        Err(medrag::RagError::InvalidConfiguration(_))
    ));
}

fn chunk_entry(doc: &str, index: usize, embedding: Vec<f32>) -> IndexEntry {
    IndexEntry {
        chunk: Chunk {
            document_id: doc.to_string(),
            chunk_index: index,
            start: index,
            end: index + 1,
            text: format!("{doc}:{index}"),
            metadata: HashMap::new(),
        },
        embedding,
    }
}

#[tokio::test]
async fn nan_entries_do_not_break_search() {
    let store = InMemoryVectorStore::new();
    let entries: Vec<_> = (0..40)
        .map(|i| {
            let embedding = if i % 3 == 0 { vec![f32::NAN, 1.0] } else { vec![1.0, i as f32 / 40.0] };
            chunk_entry("d", i, embedding)
        })
        .collect();
    store.upsert(&entries).await.unwrap();

    let results = store.search(&[1.0, 0.0], 40).await.unwrap();
    assert_eq!(results.len(), 40);
    assert!(!results[0].score.is_nan());
    assert!(results.iter().skip_while(|r| !r.score.is_nan()).all(|r| r.score.is_nan()));
}

#[tokio::test]
async fn replacing_a_document_drops_its_missing_chunks() {
    let store = InMemoryVectorStore::new();
    store.write_manifest(&manifest(2)).await.unwrap();
    store
        .upsert(&[
            chunk_entry("A", 0, vec![1.0, 0.0]),
            chunk_entry("A", 1, vec![1.0, 0.0]),
            chunk_entry("A", 2, vec![1.0, 0.0]),
            chunk_entry("B", 0, vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

    store.replace_document("A", &[chunk_entry("A", 0, vec![0.0, 1.0])]).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 2);
    let results = store.search(&[1.0, 0.0], 10).await.unwrap();
    let keys: Vec<_> =
        results.iter().map(|r| (r.entry.chunk.document_id.as_str(), r.entry.chunk.chunk_index)).collect();
    assert_eq!(keys, [("B", 0), ("A", 0)]);
}

#[tokio::test]
async fn replacing_with_foreign_entries_is_rejected() {
    let store = InMemoryVectorStore::new();
    assert!(matches!(
        store.replace_document("A", &[chunk_entry("B", 0, vec![1.0])]).await,
        Err(medrag::RagError::InvalidInput(_))
    ));
}
