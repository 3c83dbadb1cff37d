use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ragdoc_core::data_processor::DataProcessor;
use ragdoc_core::traits::{Embedder, VectorIndex};
use ragdoc_core::types::{IndexDescriptor, Metric};
use ragdoc_core::{Error, Result};
use ragdoc_vector::{generation_table, Generation, IndexHandle};

/// Everything needed to build one index generation from the documents directory.
pub(crate) struct BuildJob<'a> {
    pub processor: Arc<DataProcessor>,
    pub documents_dir: PathBuf,
    pub metric: Metric,
    pub index: &'a Arc<dyn VectorIndex>,
    pub embedder: &'a Arc<dyn Embedder>,
    pub logical: &'a str,
    pub version: u64,
    /// Latest ingest ticket and ours; absent for rebuilds that cannot be cancelled.
    pub ticket: Option<(&'a AtomicU64, u64)>,
}

impl BuildJob<'_> {
    fn check_superseded(&self) -> Result<()> {
        match self.ticket {
            Some((latest, mine)) if latest.load(Ordering::SeqCst) != mine => Err(Error::Superseded),
            _ => Ok(()),
        }
    }

    /// Builds, verifies and activates a fresh generation. On any failure the
    /// partially built table is dropped and the error returned.
    pub async fn run(self) -> Result<(IndexHandle, usize)> {
        let table = generation_table(self.logical, self.version);
        match self.build(&table).await {
            Ok(built) => Ok(built),
            Err(error) => {
                tracing::warn!(table = %table, %error, "rebuild aborted");
                if let Err(drop_error) = self.index.drop_index(&table).await {
                    tracing::warn!(table = %table, error = %drop_error, "failed to drop partial generation");
                }
                Err(error)
            }
        }
    }

    async fn build(&self, table: &str) -> Result<(IndexHandle, usize)> {
        let start = Instant::now();
        let processor = Arc::clone(&self.processor);
        let dir = self.documents_dir.clone();
        let chunks = tokio::task::spawn_blocking(move || processor.process_directory(&dir))
            .await
            .map_err(|e| Error::backend("ingest task", e))??;
        self.check_superseded()?;

        let embedder = Arc::clone(self.embedder);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| Error::backend("embedding task", e))??;
        self.check_superseded()?;

        let descriptor = IndexDescriptor::new(table, self.embedder.dim()).with_metric(self.metric);
        self.index.drop_index(table).await?;
        self.index.create(&descriptor).await?;
        self.index.load(table, &chunks, &embeddings).await?;

        let generation = Arc::new(Generation::new(Arc::clone(self.index), table.to_string()));
        let handle = IndexHandle::new(generation, descriptor, Arc::clone(self.embedder));
        handle.verify(chunks.len(), embeddings.first().map(Vec::as_slice)).await?;
        self.check_superseded()?;

        self.index.set_active(self.logical, table).await?;
        tracing::info!(
            table = %table,
            chunks = chunks.len(),
            embedder = %self.embedder.embedder_id(),
            ms = start.elapsed().as_millis() as u64,
            "index generation ready"
        );
        Ok((handle, chunks.len()))
    }
}
