//! Vector index services: LanceDB on disk or remote, and an in-memory store.

use std::sync::Arc;

use ragdoc_core::config::IndexSettings;
use ragdoc_core::traits::VectorIndex;
use ragdoc_core::Result;

mod handle;
mod lance;
mod memory;
pub mod schema;
pub mod table;

pub use handle::{collect_stale_generations, generation_table, parse_generation, Generation, IndexHandle};
pub use lance::LanceIndex;
pub use memory::{MemoryIndex, MEMORY_URI};

/// Opens the index service named by `settings.uri`.
pub async fn open_index(settings: &IndexSettings) -> Result<Arc<dyn VectorIndex>> {
    if settings.uri == MEMORY_URI {
        tracing::info!("using in-memory vector index");
        return Ok(Arc::new(MemoryIndex::new()));
    }
    Ok(Arc::new(LanceIndex::connect(settings).await?))
}
