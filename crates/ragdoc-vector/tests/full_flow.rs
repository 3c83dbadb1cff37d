use std::sync::Arc;

use ragdoc_core::config::IndexSettings;
use ragdoc_core::data_processor::{ChunkingConfig, DataProcessor};
use ragdoc_core::traits::{Embedder, VectorIndex};
use ragdoc_core::types::{IndexDescriptor, Metric};
use ragdoc_core::Error;
use ragdoc_embed::HashEmbedder;
use ragdoc_vector::{generation_table, open_index, Generation, IndexHandle, LanceIndex};
use tempfile::TempDir;

fn settings(tmp: &TempDir) -> IndexSettings {
    IndexSettings { uri: tmp.path().join("lancedb").to_string_lossy().to_string(), ..IndexSettings::default() }
}

fn write_corpus(dir: &std::path::Path) {
    std::fs::write(dir.join("fire.txt"), "Fire safety: keep an extinguisher near the stove.\n\nNever leave a fire unattended.").unwrap();
    std::fs::write(dir.join("water.txt"), "Store drinking water in clean sealed containers.\n\nRotate stored water every six months.").unwrap();
    std::fs::write(dir.join("garden.txt"), "Plant tomatoes after the last frost.\n\nCompost improves garden soil.").unwrap();
}

#[tokio::test]
async fn lancedb_full_flow() {
    let corpus = TempDir::new().unwrap();
    write_corpus(corpus.path());
    let chunks = DataProcessor::new(ChunkingConfig::default()).unwrap().process_directory(corpus.path()).unwrap();
    assert!(!chunks.is_empty());

    let embedder = Arc::new(HashEmbedder::new(256));
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).unwrap();

    let db = TempDir::new().unwrap();
    let index: Arc<dyn VectorIndex> = Arc::new(LanceIndex::connect(&settings(&db)).await.unwrap());
    let table = generation_table("docs", 1);
    let descriptor = IndexDescriptor::new(&table, embedder.dim());
    index.create(&descriptor).await.unwrap();
    index.load(&table, &chunks, &vectors).await.unwrap();
    index.set_active("docs", &table).await.unwrap();

    assert_eq!(index.describe(&table).await.unwrap(), Some(descriptor.clone()));
    assert_eq!(index.active("docs").await.unwrap().as_deref(), Some(table.as_str()));
    assert!(index.list().await.unwrap().contains(&table));
    assert!(!index.list().await.unwrap().contains("meta"));

    let handle = IndexHandle::new(Arc::new(Generation::new(Arc::clone(&index), table.clone())), descriptor, embedder);
    handle.verify(chunks.len(), Some(vectors[0].as_slice())).await.unwrap();

    let hits = handle.query("fire extinguisher stove", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].chunk.doc_name, "fire");
    assert!(!hits[0].chunk.text.trim().is_empty());

    let all = handle.query("anything", 100).await.unwrap();
    assert_eq!(all.len(), chunks.len());
}

#[tokio::test]
async fn lance_load_replaces_and_drop_is_idempotent() {
    let db = TempDir::new().unwrap();
    let index = LanceIndex::connect(&settings(&db)).await.unwrap();
    let embedder = HashEmbedder::new(8);
    let corpus = TempDir::new().unwrap();
    write_corpus(corpus.path());
    let chunks = DataProcessor::new(ChunkingConfig::default()).unwrap().process_directory(corpus.path()).unwrap();
    let vectors = embedder.embed_batch(&chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>()).unwrap();

    index.create(&IndexDescriptor::new("t", 8).with_metric(Metric::L2)).await.unwrap();
    index.load("t", &chunks, &vectors).await.unwrap();
    index.load("t", &chunks[..1], &vectors[..1]).await.unwrap();
    assert_eq!(index.count("t").await.unwrap(), 1);

    let err = index.create(&IndexDescriptor::new("t", 16)).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 16 }));
    let err = index.search("t", &[0.0; 4], 1).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 4 }));

    index.drop_index("t").await.unwrap();
    index.drop_index("t").await.unwrap();
    assert_eq!(index.describe("t").await.unwrap(), None);
    assert!(matches!(index.search("t", &[0.0; 8], 1).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn memory_uri_selects_in_process_index() {
    let settings = IndexSettings { uri: "memory://".into(), ..IndexSettings::default() };
    let index = open_index(&settings).await.unwrap();
    index.create(&IndexDescriptor::new("m", 3)).await.unwrap();
    assert_eq!(index.count("m").await.unwrap(), 0);
    assert!(index.search("m", &[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
}
