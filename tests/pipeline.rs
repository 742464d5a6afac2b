mod common;

use std::{
    fs,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use common::*;
use sales_agent_rag_webapp::{
    chunker::ChunkerConfig,
    ingest::DirectoryLoader,
    prompt::Persona,
    rag::RetrievalAnswerer,
    vector_store::{self, IndexSource, VectorIndex},
    RagError,
};

fn answerer(
    corpus: &std::path::Path,
    index_path: &std::path::Path,
    embedder: Arc<BagOfWordsEmbedder>,
    generator: Arc<RecordingGenerator>,
) -> RetrievalAnswerer {
    RetrievalAnswerer::new(
        settings(index_path),
        DirectoryLoader::with_default_readers(corpus),
        Persona::default(),
        embedder,
        generator,
    )
}

#[tokio::test]
async fn top_chunk_for_price_question_is_the_price_sentence() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let embedder = BagOfWordsEmbedder::new();

    let index = vector_store::resolve_index(
        &store.path().join("Data.index"),
        &DirectoryLoader::with_default_readers(corpus.path()),
        &ChunkerConfig::default(),
        embedder.as_ref(),
        8,
    )
    .await
    .unwrap()
    .into_index();

    let results = index
        .query("What is the price of the Laptop Pro 15?", 3, embedder.as_ref())
        .await
        .unwrap();
    assert_eq!(results[0].0.text, LAPTOP);
    assert_eq!(results[0].0.document_id, "laptop.txt");
    assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[tokio::test]
async fn retrieved_context_reaches_the_model_in_order() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let generator = RecordingGenerator::new();
    let rag = answerer(
        corpus.path(),
        &store.path().join("Data.index"),
        BagOfWordsEmbedder::new(),
        generator.clone(),
    );

    let question = "What is the price of the Laptop Pro 15?";
    let answer = rag.answer(question).await.unwrap();
    assert!(!answer.is_empty());

    let prompt = &generator.prompts()[0];
    assert_eq!(prompt.user, question);
    assert!(prompt.system.starts_with("You are a virtual sales representative"));
    let context = prompt.system.split("based on the below context:\n").nth(1).unwrap();
    assert!(context.starts_with(LAPTOP));
}

#[tokio::test]
async fn index_is_built_once_and_persisted() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let index_path = store.path().join("Data.index");
    let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let rag = RetrievalAnswerer::new(
        settings(&index_path),
        DirectoryLoader::new(corpus.path()).with_reader(CountingReader {
            reads: reads.clone(),
        }),
        Persona::default(),
        BagOfWordsEmbedder::new(),
        RecordingGenerator::new(),
    );
    assert!(!index_path.exists());
    assert!(!rag.index_status().ready);

    rag.answer("Do you sell laptops?").await.unwrap();
    assert!(index_path.is_dir());
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    rag.answer("And headphones?").await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 3, "corpus must not be re-read");
    assert_eq!(rag.index_status().chunks, 3);

    // Un proceso nuevo carga el índice de disco sin leer el corpus.
    let restarted = RetrievalAnswerer::new(
        settings(&index_path),
        DirectoryLoader::new(corpus.path()).with_reader(CountingReader {
            reads: reads.clone(),
        }),
        Persona::default(),
        BagOfWordsEmbedder::new(),
        RecordingGenerator::new(),
    );
    restarted.warm_up().await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 3);
    assert_eq!(restarted.index_status().chunks, 3);
}

#[tokio::test]
async fn two_questions_produce_two_ordered_turns() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let rag = answerer(
        corpus.path(),
        &store.path().join("Data.index"),
        BagOfWordsEmbedder::new(),
        RecordingGenerator::new(),
    );

    rag.answer("What is the price of the Laptop Pro 15?").await.unwrap();
    rag.answer("How long does the headphone battery last?").await.unwrap();

    let turns = rag.history();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].question, "What is the price of the Laptop Pro 15?");
    assert_eq!(turns[1].question, "How long does the headphone battery last?");
    assert!(turns.iter().all(|t| !t.question.is_empty() && !t.answer.is_empty()));
    assert!(turns[0].sequence < turns[1].sequence);
}

#[tokio::test]
async fn embedding_failure_at_query_time_leaves_history_untouched() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let embedder = BagOfWordsEmbedder::new();
    let generator = RecordingGenerator::new();
    let rag = answerer(
        corpus.path(),
        &store.path().join("Data.index"),
        embedder.clone(),
        generator.clone(),
    );

    rag.answer("Laptop price?").await.unwrap();
    assert_eq!(rag.history().len(), 1);

    embedder.start_failing();
    let err = rag.answer("Headphones price?").await.unwrap_err();
    assert!(matches!(err, RagError::Generation(_)), "got {err:?}");
    assert_eq!(rag.history().len(), 1);
    assert_eq!(generator.prompts().len(), 1);
}

#[tokio::test]
async fn failed_build_is_not_persisted_and_can_be_retried() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let index_path = store.path().join("Data.index");
    let embedder = BagOfWordsEmbedder::new();
    embedder.start_failing();
    let rag = answerer(corpus.path(), &index_path, embedder.clone(), RecordingGenerator::new());

    let err = rag.answer("anything").await.unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)), "got {err:?}");
    assert!(!index_path.exists());
    assert!(rag.history().is_empty());

    embedder.fail.store(false, Ordering::SeqCst);
    rag.answer("anything").await.unwrap();
    assert!(index_path.exists());
}

#[tokio::test]
async fn corrupt_index_is_rebuilt_from_corpus() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let index_path = store.path().join("Data.index");
    fs::create_dir_all(&index_path).unwrap();
    fs::write(index_path.join("args.json"), b"garbage").unwrap();
    let embedder = BagOfWordsEmbedder::new();

    let source = vector_store::resolve_index(
        &index_path,
        &DirectoryLoader::with_default_readers(corpus.path()),
        &ChunkerConfig::default(),
        embedder.as_ref(),
        8,
    )
    .await
    .unwrap();
    assert!(source.is_built());
    let rebuilt = source.into_index();

    let reloaded = VectorIndex::load(&index_path, embedder.as_ref()).unwrap();
    assert_eq!(reloaded, rebuilt);

    let again = vector_store::resolve_index(
        &index_path,
        &DirectoryLoader::with_default_readers(corpus.path()),
        &ChunkerConfig::default(),
        embedder.as_ref(),
        8,
    )
    .await
    .unwrap();
    assert!(matches!(again, IndexSource::Loaded(_)));
}

#[tokio::test]
async fn stray_file_at_index_path_is_replaced_by_a_rebuilt_index() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let index_path = store.path().join("Data.index");
    fs::write(&index_path, b"stale").unwrap();
    let embedder = BagOfWordsEmbedder::new();

    let source = vector_store::resolve_index(
        &index_path,
        &DirectoryLoader::with_default_readers(corpus.path()),
        &ChunkerConfig::default(),
        embedder.as_ref(),
        8,
    )
    .await
    .unwrap();
    assert!(source.is_built());
    assert!(index_path.is_dir());

    let calls = embedder.calls.load(Ordering::SeqCst);
    let again = vector_store::resolve_index(
        &index_path,
        &DirectoryLoader::with_default_readers(corpus.path()),
        &ChunkerConfig::default(),
        embedder.as_ref(),
        8,
    )
    .await
    .unwrap();
    assert!(matches!(again, IndexSource::Loaded(_)));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn missing_corpus_is_an_ingestion_error() {
    let store = tempfile::tempdir().unwrap();
    let rag = answerer(
        &store.path().join("no-such-dir"),
        &store.path().join("Data.index"),
        BagOfWordsEmbedder::new(),
        RecordingGenerator::new(),
    );
    let err = rag.answer("hello").await.unwrap_err();
    assert!(matches!(err, RagError::Ingestion(_)), "got {err:?}");
}

#[tokio::test]
async fn empty_index_still_answers_with_empty_context() {
    let corpus = tempfile::tempdir().unwrap();
    fs::write(corpus.path().join("image.png"), b"\x89PNG").unwrap();
    let store = tempfile::tempdir().unwrap();
    let generator = RecordingGenerator::new();
    let rag = answerer(
        corpus.path(),
        &store.path().join("Data.index"),
        BagOfWordsEmbedder::new(),
        generator.clone(),
    );

    let answer = rag.answer("").await.unwrap();
    assert!(!answer.is_empty());
    assert!(generator.prompts()[0].system.ends_with("context:\n"));
    assert_eq!(rag.history().len(), 1);
}

#[tokio::test]
async fn slow_model_times_out_as_generation_error() {
    let store = tempfile::tempdir().unwrap();
    let mut cfg = settings(&store.path().join("Data.index"));
    cfg.generation_timeout = Duration::from_millis(20);
    let rag = RetrievalAnswerer::new(
        cfg,
        DirectoryLoader::new(store.path()),
        Persona::default(),
        BagOfWordsEmbedder::new(),
        RecordingGenerator::slow(Duration::from_millis(500)),
    )
    .with_index(VectorIndex::empty(DIMS));

    let err = rag.answer("hello?").await.unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));
    assert!(rag.history().is_empty());
}

#[tokio::test]
async fn transient_generation_failure_is_retried() {
    let store = tempfile::tempdir().unwrap();
    let mut cfg = settings(&store.path().join("Data.index"));
    cfg.generation_retries = 1;
    let generator = RecordingGenerator::flaky(1);
    let rag = RetrievalAnswerer::new(
        cfg,
        DirectoryLoader::new(store.path()),
        Persona::default(),
        BagOfWordsEmbedder::new(),
        generator.clone(),
    )
    .with_index(VectorIndex::empty(DIMS));

    rag.answer("hello?").await.unwrap();
    assert_eq!(generator.prompts().len(), 1);
    assert_eq!(rag.history().len(), 1);
}

#[tokio::test]
async fn concurrent_questions_share_one_index() {
    let corpus = tempfile::tempdir().unwrap();
    write_catalog(corpus.path());
    let store = tempfile::tempdir().unwrap();
    let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let rag = Arc::new(RetrievalAnswerer::new(
        settings(&store.path().join("Data.index")),
        DirectoryLoader::new(corpus.path()).with_reader(CountingReader {
            reads: reads.clone(),
        }),
        Persona::default(),
        BagOfWordsEmbedder::new(),
        RecordingGenerator::new(),
    ));

    let (a, b) = tokio::join!(rag.answer("laptop?"), rag.answer("speaker?"));
    a.unwrap();
    b.unwrap();

    assert_eq!(reads.load(Ordering::SeqCst), 3);
    let turns = rag.history();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].sequence < turns[1].sequence);
}

#[test]
fn querying_a_fresh_empty_index_never_errors() {
    let embedder = BagOfWordsEmbedder::new();
    embedder.start_failing();
    let index = VectorIndex::empty(DIMS);
    let results = tokio_test::block_on(index.query("anything", 4, embedder.as_ref())).unwrap();
    assert!(results.is_empty());
}
