use std::path::Path;

use ragdoc_core::Error;
use ragdoc_embed::{load_embedder, HashEmbedder};
use ragdoc_core::traits::Embedder;

#[test]
fn hash_embedder_shapes_and_determinism() {
    let embedder = load_embedder("hash:64", Path::new(".")).expect("embedder");
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 64);
    assert_eq!(embedder.dim(), 64);
    assert_eq!(embedder.embedder_id(), "hash:d64");

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn shared_words_score_higher() {
    let e = HashEmbedder::new(256);
    let q = e.embed("what is a living trust").unwrap();
    let near = e.embed("a living trust holds assets").unwrap();
    let far = e.embed("photosynthesis converts sunlight").unwrap();
    let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    assert!(dot(&q, &near) > dot(&q, &far));
}

#[test]
fn bad_hash_dimension_is_invalid_config() {
    for id in ["hash:abc", "hash:0"] {
        let err = load_embedder(id, Path::new(".")).err().expect("should fail");
        assert!(matches!(err, Error::InvalidConfig(_)), "{id}");
    }
}

#[test]
fn missing_model_directory_is_not_found() {
    let tmp = tempfile::TempDir::new().unwrap();
    let err = load_embedder("no-such-model", tmp.path()).err().expect("should fail");
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn directory_without_weights_fails_to_load() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("empty-model")).unwrap();
    let err = load_embedder("empty-model", tmp.path()).err().expect("should fail");
    assert!(matches!(err, Error::Backend(_)));
}
