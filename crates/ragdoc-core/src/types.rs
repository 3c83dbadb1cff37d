//! Domain types shared by the ingester, the vector index and the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// A source file found by the ingestion scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// File stem, used as the stable document identity.
    pub name: String,
    pub path: PathBuf,
    pub page_count: usize,
}

/// One page of extracted text. Plain-text files are a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    pub text: String,
}

/// A bounded span of source text, the unit of embedding and retrieval.
///
/// - `id`: `"{doc_name}:{page}:{chunk_index}"`
/// - `doc_name`/`doc_path`: provenance of the source document
/// - `page`: 1-based page the span was cut from
/// - `chunk_index`: position within the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_name: String,
    pub doc_path: String,
    pub page: usize,
    pub chunk_index: usize,
    pub text: String,
}

impl Chunk {
    pub fn new(doc: &Document, page: usize, chunk_index: usize, text: String) -> Self {
        Self {
            id: format!("{}:{}:{}", doc.name, page, chunk_index),
            doc_name: doc.name.clone(),
            doc_path: doc.path.to_string_lossy().to_string(),
            page,
            chunk_index,
            text,
        }
    }
}

/// A retrieved chunk. `score` is a similarity: higher is always better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Up to k chunks, sorted by non-increasing similarity.
pub type RetrievalResult = Vec<ScoredChunk>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
    Dot,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
            Metric::Dot => "dot",
        }
    }

    /// Similarity of two vectors under this metric, higher is closer.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Metric::Dot => dot,
            Metric::Cosine => {
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
            }
            Metric::L2 => -a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>(),
        }
    }

    /// Converts a distance reported by a vector store into a similarity.
    pub fn similarity_from_distance(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine | Metric::Dot => 1.0 - distance,
            Metric::L2 => -distance,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            "dot" | "dotproduct" => Ok(Metric::Dot),
            other => Err(Error::InvalidConfig(format!("unknown similarity metric '{}'", other))),
        }
    }
}

/// Shape of a named index. `dimension` must equal the embedder's output size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub metric: Metric,
    pub dimension: usize,
    pub shards: u32,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self { name: name.into(), metric: Metric::Cosine, dimension, shards: 1 }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_is_one_for_parallel_vectors() {
        let s = Metric::Cosine.similarity(&[1.0, 2.0], &[2.0, 4.0]);
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_similarity_orders_closer_vectors_higher() {
        let q = [0.0, 0.0];
        assert!(Metric::L2.similarity(&q, &[1.0, 0.0]) > Metric::L2.similarity(&q, &[3.0, 0.0]));
    }

    #[test]
    fn metric_parses_case_insensitively() {
        assert_eq!("COSINE".parse::<Metric>().unwrap(), Metric::Cosine);
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
