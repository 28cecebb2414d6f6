//! End-to-end tests of ingestion and question answering with deterministic
//! stand-ins for the embedding model and the LLM.

use std::sync::Arc;
use std::time::Duration;

use medrag::mock::{HashingEmbeddingProvider, InMemorySource, MockTextGenerator};
use medrag::prompt::DEFAULT_TEMPLATE;
use medrag::{
    Document, GenerationOptions, InMemoryVectorStore, JsonFileSource, MedicalRag, MedragConfig,
    RagError, TextGenerator, TranslationFallback, VectorStore,
};

const DIMS: usize = 256;

fn doc(id: &str, title: &str, text: &str) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        venue: "Journal of Tests".to_string(),
        published: "2024-01".to_string(),
        text: text.to_string(),
        authors: vec!["Tanaka H".to_string()],
        ..Default::default()
    }
}

fn corpus() -> Vec<Document> {
    vec![
        doc("PMID100", "Fracture healing", "Bone fracture healing in children depends on age and nutrition."),
        doc(
            "PMIDX",
            "Managing condition X",
            "The treatment for condition X is daily low-dose therapy with drug Y, which reduced relapse.",
        ),
        doc("PMID200", "Sleep and memory", "Sleep deprivation impairs memory consolidation in adults."),
        doc("PMID300", "Influenza vaccines", "Seasonal influenza vaccination lowers hospital admissions."),
    ]
}

fn build(
    config: MedragConfig,
    llm: Arc<MockTextGenerator>,
    store: Arc<dyn VectorStore>,
    source: Option<Arc<InMemorySource>>,
) -> MedicalRag {
    let mut builder = MedicalRag::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbeddingProvider::new(DIMS)))
        .llm(llm)
        .vector_store(store);
    if let Some(source) = source {
        builder = builder.source(source);
    }
    builder.build().unwrap()
}

fn answering_llm(answer: &'static str) -> Arc<MockTextGenerator> {
    Arc::new(MockTextGenerator::fixed(answer))
}

#[tokio::test]
async fn one_document_of_1200_characters_makes_three_entries() {
    let config = MedragConfig::builder().chunk_size(500).chunk_overlap(50).build().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let rag = build(config, answering_llm("unused"), store.clone(), None);

    let text = "abcdefghij".repeat(120);
    let report = rag.ingestion().ingest_documents(&[doc("PMID1", "Long", &text)]).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.chunks_written, 3);
    assert_eq!(store.count().await.unwrap(), 3);

    let results = store.search(&[1.0; DIMS], 10).await.unwrap();
    let mut indices: Vec<_> = results.iter().map(|r| r.entry.chunk.chunk_index).collect();
    indices.sort_unstable();
    assert_eq!(indices, [0, 1, 2]);
}

#[tokio::test]
async fn reingesting_is_idempotent() {
    let store = Arc::new(InMemoryVectorStore::new());
    let rag = build(MedragConfig::default(), answering_llm("unused"), store.clone(), None);

    rag.ingestion().ingest_documents(&corpus()).await.unwrap();
    let once = store.count().await.unwrap();
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    assert_eq!(store.count().await.unwrap(), once);
    let status = rag.status().await.unwrap();
    assert_eq!(status.entries, once);
    assert_eq!(status.documents, 4);
    assert_eq!(status.manifest.unwrap().embedding_model, format!("hashing-bow-{DIMS}"));
}

#[tokio::test]
async fn shrinking_reingest_leaves_no_stale_chunks() {
    let config = MedragConfig::builder().chunk_size(500).chunk_overlap(50).build().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let rag = build(config, answering_llm("unused"), store.clone(), None);

    let original = "abcdefghij".repeat(120);
    rag.ingestion().ingest_documents(&[doc("PMID1", "Long", &original)]).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    let report =
        rag.ingestion().ingest_documents(&[doc("PMID1", "Long", "corrected text")]).await.unwrap();
    assert_eq!(report.chunks_written, 1);
    assert_eq!(store.count().await.unwrap(), 1);

    let results = store.search(&[1.0; DIMS], 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.chunk.chunk_index, 0);
    assert_eq!(results[0].entry.chunk.text, "corrected text");
}

#[tokio::test]
async fn relevant_passage_is_retrieved_and_cited() {
    let store = Arc::new(InMemoryVectorStore::new());
    let llm = answering_llm("Condition X is treated with daily low-dose drug Y [PMIDX].");
    let rag = build(MedragConfig::default(), llm.clone(), store, None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let question = "What is the treatment for condition X?";
    let retrieval = rag.retriever().retrieve(question, 3).await.unwrap();
    assert!(retrieval.hits.iter().any(|h| h.entry.chunk.document_id == "PMIDX"));

    let response = rag.ask(question).await.unwrap();
    assert!(!response.no_evidence);
    assert!(!response.degraded);
    assert_eq!(response.search_query, question);
    assert!(response.citations.iter().any(|c| c.document_id == "PMIDX"));
    assert_eq!(response.citations[0].document_id, "PMIDX");
    assert_eq!(response.citations[0].title, "Managing condition X");
    assert_eq!(response.citations[0].authors, ["Tanaka H"]);

    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("PMID: PMIDX | Managing condition X"));
    assert!(prompt.contains(&format!("Question: {question}")));
}

#[tokio::test]
async fn empty_index_answers_without_evidence_or_model_call() {
    let llm = answering_llm("fabricated answer citing PMID999");
    let rag = build(MedragConfig::default(), llm.clone(), Arc::new(InMemoryVectorStore::new()), None);

    let response = rag.ask("What is the treatment for condition X?").await.unwrap();

    assert!(response.no_evidence);
    assert!(response.citations.is_empty());
    assert_eq!(response.answer, medrag::NO_EVIDENCE_ANSWER);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn prompt_budget_drops_lowest_ranked_passages_first() {
    let budget = 2_000;
    let config = MedragConfig::builder()
        .similarity_threshold(-1.0)
        .prompt_budget(budget)
        .build()
        .unwrap();
    let llm = answering_llm("Summary of the passages.");
    let rag = build(config, llm.clone(), Arc::new(InMemoryVectorStore::new()), None);

    let documents: Vec<Document> = (0..10)
        .map(|i| {
            let filler = "Hypertension outcomes were measured in a cohort study. ".repeat(4 + i);
            doc(&format!("PMID{i}"), &format!("Hypertension cohort {i}"), &filler)
        })
        .collect();
    rag.ingestion().ingest_documents(&documents).await.unwrap();

    let question = "hypertension cohort outcomes";
    let retrieval = rag.retriever().retrieve(question, 10).await.unwrap();
    assert_eq!(retrieval.hits.len(), 10);

    let response = rag.ask_with_top_k(question, 10).await.unwrap();
    assert!(response.dropped_passages > 0);
    assert!(!response.citations.is_empty());
    assert_eq!(response.citations.len() + response.dropped_passages, 10);

    // The kept passages are the best-ranked prefix of the retrieval.
    for (citation, hit) in response.citations.iter().zip(&retrieval.hits) {
        assert_eq!(citation.document_id, hit.entry.chunk.document_id);
        assert_eq!(citation.chunk_index, hit.entry.chunk.chunk_index);
    }

    let prompt = &llm.prompts()[0];
    assert!(prompt.chars().count() <= budget);
    let instructions = DEFAULT_TEMPLATE.split("{context}").next().unwrap().replace("{language}", "Japanese");
    assert!(prompt.starts_with(&instructions));
    assert!(prompt.ends_with(&format!("Question: {question}\n\nAnswer:")));
}

#[tokio::test]
async fn index_built_with_another_model_is_rejected() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let rag = build(MedragConfig::default(), answering_llm("unused"), store.clone(), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let other = MedicalRag::builder()
        .config(MedragConfig::default())
        .embedding_provider(Arc::new(HashingEmbeddingProvider::new(DIMS).with_model_id("other-model")))
        .llm(answering_llm("unused"))
        .vector_store(store)
        .build()
        .unwrap();

    let err = other.ask("What is the treatment for condition X?").await.unwrap_err();
    assert!(matches!(err, RagError::ModelMismatch { ref indexed, ref active }
        if indexed == &format!("hashing-bow-{DIMS}") && active == "other-model"));
    assert!(err.is_fatal());

    let err = other.ingestion().ingest_documents(&corpus()).await.unwrap_err();
    assert!(matches!(err, RagError::ModelMismatch { .. }));
}

#[tokio::test]
async fn index_of_another_dimension_is_a_configuration_error() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let rag = build(MedragConfig::default(), answering_llm("unused"), store.clone(), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let llm = answering_llm("unused");
    let narrower = MedicalRag::builder()
        .config(MedragConfig::default())
        .embedding_provider(Arc::new(
            HashingEmbeddingProvider::new(DIMS / 2).with_model_id(format!("hashing-bow-{DIMS}")),
        ))
        .llm(llm.clone())
        .vector_store(store)
        .build()
        .unwrap();

    let err = narrower.ask("What is the treatment for condition X?").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidConfiguration(_)), "got {err}");
    assert!(err.is_fatal());
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn threshold_can_be_set_per_question() {
    let llm = answering_llm("Drug Y [PMIDX].");
    let rag = build(MedragConfig::default(), llm.clone(), Arc::new(InMemoryVectorStore::new()), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();
    let question = "What is the treatment for condition X?";

    let strict = rag.ask_with(question, 3, Some(0.99)).await.unwrap();
    assert!(strict.no_evidence);
    assert!(llm.prompts().is_empty());

    let lenient = rag.ask_with(question, 3, Some(-1.0)).await.unwrap();
    assert_eq!(lenient.citations.len(), 3);
    assert_eq!(lenient.citations[0].document_id, "PMIDX");

    assert!(matches!(
        rag.ask_with(question, 3, Some(2.0)).await,
        Err(RagError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn fetch_failures_are_reported_and_the_batch_continues() {
    let store = Arc::new(InMemoryVectorStore::new());
    let source = Arc::new(InMemorySource::new(corpus()));
    let rag = build(MedragConfig::default(), answering_llm("unused"), store.clone(), Some(source));

    let ids: Vec<String> = ["PMID100", "PMID-MISSING", "PMIDX"].iter().map(|s| s.to_string()).collect();
    let report = rag.ingestion().ingest_batch(&ids).await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "PMID-MISSING");
    assert_eq!(store.distinct_documents().await.unwrap(), 2);
    assert_eq!(report.chunks_written, store.count().await.unwrap());
}

fn translating_llm(translation: Option<&'static str>) -> Arc<MockTextGenerator> {
    Arc::new(MockTextGenerator::from_fn(move |prompt| {
        if prompt.starts_with("Translate this") {
            translation.map(str::to_string).ok_or_else(|| RagError::ServiceUnreachable {
                service: "Ollama".into(),
                message: "connection refused".into(),
            })
        } else {
            Ok("Drug Y is the treatment [PMIDX].".to_string())
        }
    }))
}

#[tokio::test]
async fn non_ascii_questions_are_translated_before_search() {
    let llm = translating_llm(Some("What is the treatment for condition X?\nExplanation: literal."));
    let rag = build(MedragConfig::default(), llm.clone(), Arc::new(InMemoryVectorStore::new()), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let question = "疾患Xの治療法は何ですか？";
    let response = rag.ask(question).await.unwrap();

    assert_eq!(response.question, question);
    assert_eq!(response.search_query, "What is the treatment for condition X?");
    assert_eq!(response.citations[0].document_id, "PMIDX");
    // The prompt carries the original question, not the translation.
    let prompts = llm.prompts();
    assert!(prompts[1].contains(&format!("Question: {question}")));
}

/// Answers every prompt, taking a while over translations.
struct SlowTranslator;

#[async_trait::async_trait]
impl TextGenerator for SlowTranslator {
    fn name(&self) -> &str {
        "slow-translator"
    }

    async fn generate_text(&self, prompt: &str, _options: &GenerationOptions) -> medrag::Result<String> {
        if prompt.starts_with("Translate this") {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok("What is the treatment for condition X?".to_string())
        } else {
            Ok("Drug Y [PMIDX].".to_string())
        }
    }
}

#[tokio::test]
async fn translation_time_is_reported_apart_from_search() {
    let rag = MedicalRag::builder()
        .config(MedragConfig::default())
        .embedding_provider(Arc::new(HashingEmbeddingProvider::new(DIMS)))
        .llm(Arc::new(SlowTranslator))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .build()
        .unwrap();
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let translated = rag.ask("疾患Xの治療法は何ですか？").await.unwrap();
    assert!(translated.translation_ms >= 40, "{}", translated.translation_ms);
    assert!(translated.total_ms >= translated.translation_ms + translated.search_ms);

    let untranslated = rag.ask("What is the treatment for condition X?").await.unwrap();
    assert_eq!(untranslated.translation_ms, 0);
}

#[tokio::test]
async fn translation_failure_aborts_under_the_default_policy() {
    let llm = translating_llm(None);
    let rag = build(MedragConfig::default(), llm.clone(), Arc::new(InMemoryVectorStore::new()), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let err = rag.ask("疾患Xの治療法は何ですか？").await.unwrap_err();
    assert!(matches!(err, RagError::TranslationUnavailable(_)));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn translation_failure_degrades_under_the_fallback_policy() {
    let config = MedragConfig::builder()
        .translation_fallback(TranslationFallback::UseOriginal)
        .similarity_threshold(-1.0)
        .build()
        .unwrap();
    let rag = build(config, translating_llm(None), Arc::new(InMemoryVectorStore::new()), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let question = "疾患Xの治療法は何ですか？";
    let response = rag.ask(question).await.unwrap();
    assert!(response.degraded);
    assert_eq!(response.search_query, question);
}

#[tokio::test]
async fn generation_failure_surfaces_without_a_partial_answer() {
    let llm = Arc::new(MockTextGenerator::from_fn(|_| {
        Err(RagError::LlmError { backend: "Ollama".into(), message: "model not loaded".into() })
    }));
    let rag = build(MedragConfig::default(), llm, Arc::new(InMemoryVectorStore::new()), None);
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let err = rag.ask("What is the treatment for condition X?").await.unwrap_err();
    assert!(matches!(err, RagError::GenerationUnavailable(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_questions_share_one_index() {
    let rag = Arc::new(build(
        MedragConfig::default(),
        answering_llm("Drug Y [PMIDX]."),
        Arc::new(InMemoryVectorStore::new()),
        None,
    ));
    rag.ingestion().ingest_documents(&corpus()).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let rag = rag.clone();
            tokio::spawn(async move { rag.ask("What is the treatment for condition X?").await })
        })
        .collect();
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.citations[0].document_id, "PMIDX");
    }
}

#[tokio::test]
async fn article_dump_can_be_ingested_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("articles.json");
    let dump = serde_json::json!({
        "articles": [
            {
                "pmid": "31000001",
                "title": "Metformin in type 2 DM",
                "abstract": "Metformin remains first-line therapy for type 2 DM.",
                "authors": ["Suzuki A"],
                "journal": "Diabetes Care",
                "publication_date": "2019-04",
                "mesh_terms": ["Diabetes Mellitus, Type 2", "Metformin"]
            }
        ]
    });
    std::fs::write(&path, dump.to_string()).unwrap();

    let source = JsonFileSource::load(&path, true).await.unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let rag = MedicalRag::builder()
        .config(MedragConfig::default())
        .embedding_provider(Arc::new(HashingEmbeddingProvider::new(DIMS)))
        .llm(answering_llm("Metformin [PMID: 31000001]."))
        .vector_store(store.clone())
        .source(Arc::new(source))
        .build()
        .unwrap();

    let report = rag.ingestion().ingest_all().await.unwrap();
    assert_eq!(report.processed, 1);
    assert!(report.failed.is_empty());

    let response = rag.ask("first-line therapy for type 2 diabetes").await.unwrap();
    assert_eq!(response.citations[0].document_id, "31000001");
    assert_eq!(response.citations[0].venue, "Diabetes Care");
}
