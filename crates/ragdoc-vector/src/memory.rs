use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use ragdoc_core::traits::VectorIndex;
use ragdoc_core::types::{Chunk, IndexDescriptor, RetrievalResult, ScoredChunk};
use ragdoc_core::{Error, Result};

use crate::lance::check_rows;

/// URI selecting the in-process index.
pub const MEMORY_URI: &str = "memory://";

struct MemoryTable {
    descriptor: IndexDescriptor,
    rows: Vec<(Chunk, Vec<f32>)>,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    active: HashMap<String, String>,
}

/// Brute-force index held in process memory. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn list(&self) -> Result<BTreeSet<String>> {
        Ok(self.state().tables.keys().cloned().collect())
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        self.state().tables.remove(name);
        Ok(())
    }

    async fn create(&self, descriptor: &IndexDescriptor) -> Result<()> {
        let mut state = self.state();
        if let Some(existing) = state.tables.get(&descriptor.name) {
            if existing.descriptor.dimension != descriptor.dimension {
                return Err(Error::DimensionMismatch {
                    expected: existing.descriptor.dimension,
                    actual: descriptor.dimension,
                });
            }
            return Ok(());
        }
        state.tables.insert(
            descriptor.name.clone(),
            MemoryTable { descriptor: descriptor.clone(), rows: Vec::new() },
        );
        Ok(())
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexDescriptor>> {
        Ok(self.state().tables.get(name).map(|t| t.descriptor.clone()))
    }

    async fn load(&self, name: &str, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        let mut state = self.state();
        let table = state
            .tables
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("index '{}'", name)))?;
        check_rows(&table.descriptor, chunks, embeddings)?;
        table.rows = chunks.iter().cloned().zip(embeddings.iter().cloned()).collect();
        Ok(())
    }

    async fn search(&self, name: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        let state = self.state();
        let table = state
            .tables
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("index '{}'", name)))?;
        if vector.len() != table.descriptor.dimension {
            return Err(Error::DimensionMismatch { expected: table.descriptor.dimension, actual: vector.len() });
        }
        let metric = table.descriptor.metric;
        let mut hits: Vec<ScoredChunk> = table
            .rows
            .iter()
            .map(|(chunk, v)| ScoredChunk { chunk: chunk.clone(), score: metric.similarity(vector, v) })
            .collect();
        // stable: ties keep load order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, name: &str) -> Result<usize> {
        self.state()
            .tables
            .get(name)
            .map(|t| t.rows.len())
            .ok_or_else(|| Error::NotFound(format!("index '{}'", name)))
    }

    async fn set_active(&self, logical: &str, physical: &str) -> Result<()> {
        self.state().active.insert(logical.to_string(), physical.to_string());
        Ok(())
    }

    async fn active(&self, logical: &str) -> Result<Option<String>> {
        Ok(self.state().active.get(logical).cloned())
    }
}
