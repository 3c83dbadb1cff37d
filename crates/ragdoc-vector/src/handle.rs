//! Index generations and the handle used to query the published one.
//!
//! A logical index `docs` is served by physical tables `docs__g1`,
//! `docs__g2`, ... Each rebuild loads a fresh generation; the previous one is
//! retired and dropped once the last snapshot holding it goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ragdoc_core::config::GENERATION_MARKER;
use ragdoc_core::traits::{Embedder, VectorIndex};
use ragdoc_core::types::{IndexDescriptor, RetrievalResult};
use ragdoc_core::{Error, Result};

pub fn generation_table(logical: &str, version: u64) -> String {
    format!("{}{}{}", logical, GENERATION_MARKER, version)
}

/// Splits `docs__g7` into `("docs", 7)`.
pub fn parse_generation(table: &str) -> Option<(&str, u64)> {
    let (logical, version) = table.rsplit_once(GENERATION_MARKER)?;
    let version = version.parse().ok()?;
    Some((logical, version))
}

/// Drops every generation of `logical` not listed in `keep`.
pub async fn collect_stale_generations(index: &dyn VectorIndex, logical: &str, keep: &[&str]) -> Result<usize> {
    let mut dropped = 0;
    for table in index.list().await? {
        let stale = matches!(parse_generation(&table), Some((name, _)) if name == logical)
            && !keep.contains(&table.as_str());
        if stale {
            index.drop_index(&table).await?;
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::info!(index = logical, dropped, "removed stale index generations");
    }
    Ok(dropped)
}

/// Ownership token for one physical table.
pub struct Generation {
    index: Arc<dyn VectorIndex>,
    table: String,
    retired: AtomicBool,
}

impl Generation {
    pub fn new(index: Arc<dyn VectorIndex>, table: String) -> Self {
        Self { index, table, retired: AtomicBool::new(false) }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Marks the table for removal when the last reference is dropped.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        let index = Arc::clone(&self.index);
        let table = std::mem::take(&mut self.table);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    match index.drop_index(&table).await {
                        Ok(()) => tracing::info!(table = %table, "dropped retired generation"),
                        Err(error) => tracing::warn!(table = %table, %error, "failed to drop retired generation"),
                    }
                });
            }
            Err(_) => tracing::warn!(table = %table, "no runtime to drop retired generation; left for startup cleanup"),
        }
    }
}

/// A loaded, verified index generation plus the embedder that produced it.
#[derive(Clone)]
pub struct IndexHandle {
    generation: Arc<Generation>,
    descriptor: IndexDescriptor,
    embedder: Arc<dyn Embedder>,
}

impl IndexHandle {
    pub fn new(generation: Arc<Generation>, descriptor: IndexDescriptor, embedder: Arc<dyn Embedder>) -> Self {
        Self { generation, descriptor, embedder }
    }

    pub fn table(&self) -> &str {
        self.generation.table()
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn retire(&self) {
        self.generation.retire();
    }

    /// Embeds `text` with this generation's embedder and searches it.
    pub async fn query(&self, text: &str, k: usize) -> Result<RetrievalResult> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::backend("embedding task", e))??;
        self.generation.index.search(self.table(), &vector, k).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.generation.index.count(self.table()).await
    }

    /// Checks the row count and, for a non-empty index, that `probe` finds something.
    pub async fn verify(&self, expected_rows: usize, probe: Option<&[f32]>) -> Result<()> {
        let rows = self.count().await?;
        if rows != expected_rows {
            return Err(Error::backend(
                "index verification",
                format!("{} holds {} rows, expected {}", self.table(), rows, expected_rows),
            ));
        }
        if let (true, Some(vector)) = (expected_rows > 0, probe) {
            let hits = self.generation.index.search(self.table(), vector, 1).await?;
            if hits.is_empty() {
                return Err(Error::backend("index verification", format!("probe query on {} returned nothing", self.table())));
            }
        }
        Ok(())
    }
}
