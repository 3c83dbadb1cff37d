//! Local text generation: the GGUF llama backend, the echo test backend,
//! context fitting and answer extraction.

use std::path::Path;
use std::sync::Arc;

use ragdoc_core::config::{resolve_with_base, GenerationSettings, ECHO_GENERATOR};
use ragdoc_core::prompt::PromptTemplate;
use ragdoc_core::traits::{GenerationRequest, Generator};
use ragdoc_core::types::ScoredChunk;
use ragdoc_core::{Error, Result};

mod answer;
mod device;
mod echo;
mod fit;
mod llama;

pub use answer::extract_answer;
pub use echo::{EchoGenerator, ECHO_COMPLETION};
pub use fit::{fit_context, FittedPrompt};
pub use llama::LlamaGenerator;

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub raw: String,
    pub answer: String,
    pub truncated: bool,
    pub context_used: Vec<ScoredChunk>,
    pub prompt_tokens: usize,
}

/// `echo` selects [`EchoGenerator`]; anything else is a GGUF file path,
/// absolute or relative to `models_dir`. Blocks while the model loads.
pub fn load_generator(model_id: &str, models_dir: &Path, settings: &GenerationSettings) -> Result<Arc<dyn Generator>> {
    if model_id == ECHO_GENERATOR {
        let generator = match settings.context_window {
            Some(window) => EchoGenerator::with_context_window(window),
            None => EchoGenerator::new(),
        };
        return Ok(Arc::new(generator));
    }
    let path = resolve_with_base(models_dir, model_id);
    if !path.is_file() {
        return Err(Error::NotFound(format!("generation model '{}' ({})", model_id, path.display())));
    }
    Ok(Arc::new(LlamaGenerator::load(&path, settings)?))
}

/// Fits the retrieved context into the window, generates, and strips the
/// echoed prompt. Generation runs on the blocking pool.
pub async fn generate_answer(
    generator: Arc<dyn Generator>,
    template: &PromptTemplate,
    chunks: &[ScoredChunk],
    question: &str,
    settings: &GenerationSettings,
) -> Result<GenerationResult> {
    let window = settings.context_window.unwrap_or_else(|| generator.context_window());
    let fitted = fit_context(template, chunks, question, generator.as_ref(), settings.max_output_tokens, window)?;
    let request = GenerationRequest {
        prompt: fitted.prompt.clone(),
        max_output_tokens: settings.max_output_tokens,
        stop: settings.stop.clone(),
    };
    let raw = tokio::task::spawn_blocking(move || generator.generate(&request))
        .await
        .map_err(|e| Error::backend("generation task", e))??;
    let answer = extract_answer(&fitted.prompt, &raw)?;
    Ok(GenerationResult {
        raw,
        answer,
        truncated: fitted.truncated,
        context_used: fitted.used,
        prompt_tokens: fitted.prompt_tokens,
    })
}
