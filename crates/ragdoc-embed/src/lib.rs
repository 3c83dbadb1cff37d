//! Embedding models behind the `ragdoc_core::traits::Embedder` seam.

use std::path::Path;
use std::sync::Arc;

use ragdoc_core::config::{resolve_with_base, HASH_EMBEDDER_PREFIX};
use ragdoc_core::traits::Embedder;
use ragdoc_core::{Error, Result};

mod bert;
mod device;
mod hash;
mod pool;
mod tokenize;

pub use bert::BertEmbedder;
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_on_device;

/// Resolve a model id to a loaded embedder.
///
/// `hash:<dim>` selects the deterministic [`HashEmbedder`]. Anything else is a
/// model directory, absolute or relative to `models_dir`.
pub fn load_embedder(model_id: &str, models_dir: &Path) -> Result<Arc<dyn Embedder>> {
    if let Some(dim) = model_id.strip_prefix(HASH_EMBEDDER_PREFIX) {
        let dim: usize = dim
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("bad hash embedder dimension in '{}'", model_id)))?;
        if dim == 0 {
            return Err(Error::InvalidConfig("hash embedder dimension must be positive".into()));
        }
        return Ok(Arc::new(HashEmbedder::new(dim)));
    }

    let dir = resolve_with_base(models_dir, model_id);
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("embedding model '{}' ({})", model_id, dir.display())));
    }
    Ok(Arc::new(BertEmbedder::load(&dir)?))
}
