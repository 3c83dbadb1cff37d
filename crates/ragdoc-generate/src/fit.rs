use ragdoc_core::prompt::PromptTemplate;
use ragdoc_core::traits::Generator;
use ragdoc_core::types::ScoredChunk;
use ragdoc_core::{Error, Result};

/// A rendered prompt that leaves room for `max_output_tokens`.
#[derive(Debug, Clone)]
pub struct FittedPrompt {
    pub prompt: String,
    /// Chunks that made it into the prompt, in retrieval order.
    pub used: Vec<ScoredChunk>,
    pub truncated: bool,
    pub prompt_tokens: usize,
}

/// Renders the prompt, dropping the lowest-similarity chunks until
/// `prompt_tokens + max_output_tokens <= context_window`.
pub fn fit_context(
    template: &PromptTemplate,
    chunks: &[ScoredChunk],
    question: &str,
    generator: &dyn Generator,
    max_output_tokens: usize,
    context_window: usize,
) -> Result<FittedPrompt> {
    let mut used: Vec<ScoredChunk> = chunks.to_vec();
    loop {
        let prompt = template.render_chunks(&used, question)?;
        let prompt_tokens = generator.count_tokens(&prompt)?;
        if prompt_tokens + max_output_tokens <= context_window {
            let truncated = used.len() < chunks.len();
            if truncated {
                tracing::debug!(kept = used.len(), retrieved = chunks.len(), "context truncated to fit window");
            }
            return Ok(FittedPrompt { prompt, used, truncated, prompt_tokens });
        }
        if used.is_empty() {
            return Err(Error::ContextOverflow {
                prompt_tokens: prompt_tokens + max_output_tokens,
                limit: context_window,
            });
        }
        used.remove(lowest_score(&used));
    }
}

// last of the minima, so ties drop the later-retrieved chunk
fn lowest_score(chunks: &[ScoredChunk]) -> usize {
    let mut lowest = 0;
    for (i, c) in chunks.iter().enumerate() {
        if c.score <= chunks[lowest].score {
            lowest = i;
        }
    }
    lowest
}
