use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ragdoc_core::config::{Config, IndexSettings, Settings};
use ragdoc_core::prompt::{PromptTemplate, DEFAULT_TEMPLATE};
use ragdoc_core::traits::VectorIndex;
use ragdoc_core::types::{Chunk, IndexDescriptor, RetrievalResult};
use ragdoc_core::{Error, Result};
use ragdoc_generate::ECHO_COMPLETION;
use ragdoc_pipeline::{document_names, Pipeline, UploadOutcome};
use ragdoc_vector::MemoryIndex;
use tempfile::TempDir;

fn settings(docs: &Path) -> Settings {
    let dir = docs.to_string_lossy().to_string();
    Settings {
        documents_dir: dir.clone(),
        models_dir: dir,
        pipeline: Config {
            index: IndexSettings { uri: "memory://".into(), api_key: Some("secret".into()), region: None },
            embedding_model: "hash:64".into(),
            generation_model: "echo".into(),
            index_name: "docs".into(),
            template: DEFAULT_TEMPLATE.into(),
        },
        ..Settings::default()
    }
}

fn write_corpus(dir: &Path) {
    std::fs::write(
        dir.join("trusts.txt"),
        "A living trust holds assets for beneficiaries during the grantor's life.\n\n\
         A will takes effect only at death and passes through probate.",
    )
    .unwrap();
    std::fs::write(
        dir.join("garden.txt"),
        "Tomatoes need full sun and regular watering.\n\nCompost improves soil structure.",
    )
    .unwrap();
}

fn lance_settings(tmp: &Path) -> Settings {
    let docs = tmp.join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    let mut settings = settings(&docs);
    settings.pipeline.index = IndexSettings {
        uri: tmp.join("lancedb").to_string_lossy().to_string(),
        api_key: None,
        region: None,
    };
    settings
}

/// In-memory index whose bulk loads can be made to fail.
#[derive(Default)]
struct FailingLoads {
    inner: MemoryIndex,
    fail: AtomicBool,
}

#[async_trait]
impl VectorIndex for FailingLoads {
    async fn list(&self) -> Result<BTreeSet<String>> {
        self.inner.list().await
    }
    async fn drop_index(&self, name: &str) -> Result<()> {
        self.inner.drop_index(name).await
    }
    async fn create(&self, descriptor: &IndexDescriptor) -> Result<()> {
        self.inner.create(descriptor).await
    }
    async fn describe(&self, name: &str) -> Result<Option<IndexDescriptor>> {
        self.inner.describe(name).await
    }
    async fn load(&self, name: &str, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::backend("load", "disk full"));
        }
        self.inner.load(name, chunks, embeddings).await
    }
    async fn search(&self, name: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        self.inner.search(name, vector, k).await
    }
    async fn count(&self, name: &str) -> Result<usize> {
        self.inner.count(name).await
    }
    async fn set_active(&self, logical: &str, physical: &str) -> Result<()> {
        self.inner.set_active(logical, physical).await
    }
    async fn active(&self, logical: &str) -> Result<Option<String>> {
        self.inner.active(logical).await
    }
}

async fn failing_pipeline(docs: &Path) -> (Pipeline, Arc<FailingLoads>) {
    let index = Arc::new(FailingLoads::default());
    let service: Arc<dyn VectorIndex> = index.clone();
    let pipeline = Pipeline::initialize_with_index(settings(docs), service).await.unwrap();
    (pipeline, index)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn end_to_end_thousand_character_document() {
    let tmp = TempDir::new().unwrap();
    let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    std::fs::write(tmp.path().join("long.txt"), &text).unwrap();

    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();
    let status = pipeline.status();
    assert_eq!(status.version, 1);
    assert_eq!(status.chunks, 3);
    assert_eq!(status.index_table, "docs__g1");
    assert_eq!(status.config.index.api_key.as_deref(), Some("****"));

    let hits = pipeline.retrieve("abcdefghij", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);
    let lens: Vec<usize> = hits.iter().map(|h| h.chunk.text.chars().count()).collect();
    assert!(lens.iter().all(|&l| l <= 384));

    let answer = pipeline.ask("What comes after the letter m?").await.unwrap();
    assert_eq!(answer.response, ECHO_COMPLETION);
    assert!(!answer.response.starts_with(&PromptTemplate::preamble()));
    assert!(!answer.truncated);
}

#[tokio::test]
async fn retrieval_returns_min_of_k_and_corpus_sorted() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();

    let hits = pipeline.retrieve("living trust beneficiaries", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].chunk.doc_name, "trusts");

    let all = pipeline.retrieve("anything", 50).await.unwrap();
    assert_eq!(all.len(), pipeline.status().chunks);
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn duplicate_upload_is_rejected_without_changes() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();

    let first = pipeline.add_document("notes", b"%PDF-1.4 not really").await.unwrap();
    assert!(matches!(first, UploadOutcome::Indexed(ref r) if r.version == 2));
    assert!(tmp.path().join("notes.pdf").exists());

    let before = (pipeline.status().version, pipeline.list_documents().unwrap());
    let err = pipeline.add_document("notes", b"%PDF-1.4 again").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!((pipeline.status().version, pipeline.list_documents().unwrap()), before);
    assert_eq!(std::fs::read(tmp.path().join("notes.pdf")).unwrap(), b"%PDF-1.4 not really");
}

#[tokio::test]
async fn upload_names_must_be_plain() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();
    for name in ["", "  ", "../escape", "a/b", ".hidden"] {
        let err = pipeline.add_document(name, b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{name:?}");
    }
    let err = pipeline.add_document("empty", b"").await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert_eq!(pipeline.status().version, 1);
}

#[tokio::test]
async fn template_without_question_keeps_previous_config() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();
    let before = pipeline.config();

    let bad = Config { template: "Context: {{ context }}\nAnswer:".into(), ..before.clone() };
    let err = pipeline.set_config(bad).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(pipeline.config(), before);
    assert_eq!(pipeline.status().version, 1);
}

#[tokio::test]
async fn template_change_publishes_without_rebuilding() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();

    let new = Config { template: "Q: {{ question }}\nUse: {{ context }}\nA:".into(), ..pipeline.config() };
    pipeline.set_config(new.clone()).await.unwrap();

    let status = pipeline.status();
    assert_eq!(status.version, 2);
    assert_eq!(status.index_table, "docs__g1");
    assert_eq!(pipeline.config(), new);
    let answer = pipeline.ask("What is a will?").await.unwrap();
    assert_eq!(answer.response, ECHO_COMPLETION);
}

#[tokio::test]
async fn embedding_change_rebuilds_and_drops_old_generation() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();

    let new = Config { embedding_model: "hash:32".into(), ..pipeline.config() };
    pipeline.set_config(new).await.unwrap();
    settle().await;

    let snap = pipeline.snapshot();
    assert_eq!(snap.index.table(), "docs__g2");
    assert_eq!(snap.index.descriptor().dimension, 32);
    let tables: Vec<String> = snap.index_service.list().await.unwrap().into_iter().collect();
    assert_eq!(tables, vec!["docs__g2".to_string()]);
    assert_eq!(snap.index_service.active("docs").await.unwrap().as_deref(), Some("docs__g2"));
    assert_eq!(pipeline.retrieve("compost soil", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_model_load_rolls_back() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();
    let before = pipeline.config();

    let new = Config { embedding_model: "models/does-not-exist".into(), ..before.clone() };
    let err = pipeline.set_config(new).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let new = Config { generation_model: "llm/missing.gguf".into(), ..before.clone() };
    assert!(pipeline.set_config(new).await.is_err());

    assert_eq!(pipeline.config(), before);
    assert_eq!(pipeline.status().version, 1);
    assert!(!pipeline.retrieve("will probate", 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn newer_ingest_supersedes_older_one() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();

    let (older, newer) = tokio::join!(pipeline.ingest(), pipeline.ingest());
    assert!(matches!(older, Err(Error::Superseded)));
    let report = newer.unwrap();
    assert_eq!(report.version, 2);
    settle().await;

    let snap = pipeline.snapshot();
    let tables: Vec<String> = snap.index_service.list().await.unwrap().into_iter().collect();
    assert_eq!(tables, vec![snap.index.table().to_string()]);
}

#[tokio::test]
async fn superseded_upload_is_deferred() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();

    let (upload, ingest) = tokio::join!(pipeline.add_document("late", b"%PDF-1.4"), pipeline.ingest());
    assert_eq!(upload.unwrap(), UploadOutcome::Deferred);
    ingest.unwrap();
    assert!(pipeline.list_documents().unwrap().contains(&"late.pdf".to_string()));
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();
    assert!(matches!(pipeline.ask("   ").await, Err(Error::InvalidConfig(_))));
    // empty corpus still answers, from no context
    assert_eq!(pipeline.ask("anything?").await.unwrap().response, ECHO_COMPLETION);
}

#[tokio::test]
async fn failed_upload_ingest_removes_the_file() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let (pipeline, index) = failing_pipeline(tmp.path()).await;
    let before = pipeline.list_documents().unwrap();

    index.fail.store(true, Ordering::SeqCst);
    let err = pipeline.add_document("notes", b"%PDF-1.4 body").await.unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(pipeline.list_documents().unwrap(), before);
    assert!(!tmp.path().join("notes.pdf").exists());
    assert_eq!(pipeline.status().version, 1);
    assert!(!pipeline.retrieve("compost soil", 1).await.unwrap().is_empty());

    index.fail.store(false, Ordering::SeqCst);
    let retry = pipeline.add_document("notes", b"%PDF-1.4 body").await.unwrap();
    assert!(matches!(retry, UploadOutcome::Indexed(ref r) if r.version == 2));
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_generation_serving() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let (pipeline, index) = failing_pipeline(tmp.path()).await;
    let before = pipeline.config();
    index.fail.store(true, Ordering::SeqCst);

    assert!(matches!(pipeline.ingest().await, Err(Error::Backend(_))));
    let new = Config { embedding_model: "hash:32".into(), ..before.clone() };
    assert!(matches!(pipeline.set_config(new).await, Err(Error::Backend(_))));
    settle().await;

    let status = pipeline.status();
    assert_eq!(status.version, 1);
    assert_eq!(status.index_table, "docs__g1");
    assert!(!status.rebuilding);
    assert_eq!(pipeline.config(), before);
    let tables: Vec<String> = index.list().await.unwrap().into_iter().collect();
    assert_eq!(tables, vec!["docs__g1".to_string()]);
    let hits = pipeline.retrieve("living trust", 1).await.unwrap();
    assert_eq!(hits[0].chunk.doc_name, "trusts");
}

#[tokio::test]
async fn credential_change_on_same_store_keeps_serving_when_rebuild_fails() {
    let tmp = TempDir::new().unwrap();
    let settings = lance_settings(tmp.path());
    write_corpus(&settings.documents_path());
    let pipeline = Pipeline::initialize(settings.clone()).await.unwrap();
    assert_eq!(pipeline.status().index_table, "docs__g1");

    std::fs::remove_dir_all(settings.documents_path()).unwrap();
    let mut new = pipeline.config();
    new.index.api_key = Some("rotated".into());
    let err = pipeline.set_config(new).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert_eq!(pipeline.status().index_table, "docs__g1");
    let hits = pipeline.retrieve("living trust beneficiaries", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.doc_name, "trusts");
}

#[tokio::test]
async fn credential_change_on_same_store_publishes_new_generation() {
    let tmp = TempDir::new().unwrap();
    let settings = lance_settings(tmp.path());
    write_corpus(&settings.documents_path());
    let pipeline = Pipeline::initialize(settings).await.unwrap();
    let reader = pipeline.snapshot();

    let mut new = pipeline.config();
    new.index.api_key = Some("rotated".into());
    pipeline.set_config(new).await.unwrap();

    assert_eq!(pipeline.status().index_table, "docs__g2");
    assert_eq!(pipeline.retrieve("compost soil", 1).await.unwrap()[0].chunk.doc_name, "garden");
    // a reader holding the old snapshot still gets answers from it
    let hits = reader.index.query("living trust", 1).await.unwrap();
    assert_eq!(hits[0].chunk.doc_name, "trusts");
}

#[tokio::test]
async fn document_names_match_pipeline_listing() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let pipeline = Pipeline::initialize(settings(tmp.path())).await.unwrap();
    let names = document_names(tmp.path()).unwrap();
    assert_eq!(names, vec!["garden.txt".to_string(), "trusts.txt".to_string()]);
    assert_eq!(pipeline.list_documents().unwrap(), names);
}
