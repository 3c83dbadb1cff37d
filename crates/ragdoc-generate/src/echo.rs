use ragdoc_core::config::ECHO_GENERATOR;
use ragdoc_core::traits::{GenerationRequest, Generator};
use ragdoc_core::Result;

pub const ECHO_COMPLETION: &str = " Based on the context above, here is the answer.";

const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Test generator: echoes the prompt followed by a canned completion.
/// Tokens are whitespace-separated words.
pub struct EchoGenerator {
    context_window: usize,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self { context_window: DEFAULT_CONTEXT_WINDOW }
    }

    pub fn with_context_window(context_window: usize) -> Self {
        Self { context_window }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for EchoGenerator {
    fn model_id(&self) -> &str { ECHO_GENERATOR }
    fn context_window(&self) -> usize { self.context_window }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let words: Vec<&str> = ECHO_COMPLETION.split_whitespace().take(request.max_output_tokens).collect();
        let mut completion = if words.is_empty() { String::new() } else { format!(" {}", words.join(" ")) };
        if let Some(cut) = request.stop.iter().filter_map(|s| completion.find(s.as_str())).min() {
            completion.truncate(cut);
        }
        Ok(format!("{}{}", request.prompt, completion))
    }
}
