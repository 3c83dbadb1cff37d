//! Prompt assembly: fixed system preamble followed by a configurable
//! instruction template with `{{ context }}` and `{{ question }}` slots.

use minijinja::{context, Environment, UndefinedBehavior};

use crate::error::{Error, Result};
use crate::types::ScoredChunk;

pub const SYSTEM_INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
If the context is relevant to the question, answer the question while incorporating the context into your answer.";
pub const B_SYS: &str = "<>\n";
pub const E_SYS: &str = "\n<>\n\n";

pub const DEFAULT_TEMPLATE: &str = "\n{{ context }}\nQuestion: {{ question }}\nAnswer: \n";

/// Joins retrieved chunk texts in retrieval order.
pub const CONTEXT_SEPARATOR: &str = " \n ";

const REQUIRED_PLACEHOLDERS: [&str; 2] = ["context", "question"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    /// Parses and checks the template. Both placeholders must be referenced.
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let env = environment();
        let tmpl = env
            .template_from_str(&source)
            .map_err(|e| Error::TemplateError(e.to_string()))?;
        let declared = tmpl.undeclared_variables(false);
        let missing: Vec<&str> = REQUIRED_PLACEHOLDERS
            .iter()
            .copied()
            .filter(|p| !declared.contains(*p))
            .collect();
        if !missing.is_empty() {
            return Err(Error::TemplateError(format!("missing placeholder(s): {}", missing.join(", "))));
        }
        // Surfaces references to any other variable, which strict mode rejects.
        tmpl.render(context! { context => "", question => "" })
            .map_err(|e| Error::TemplateError(e.to_string()))?;
        Ok(Self { source })
    }

    pub fn source(&self) -> &str { &self.source }

    pub fn preamble() -> String {
        format!("{}{}{}", B_SYS, SYSTEM_INSTRUCTIONS, E_SYS)
    }

    /// Preamble plus the rendered instruction template.
    pub fn render(&self, context_text: &str, question: &str) -> Result<String> {
        let env = environment();
        let body = env
            .template_from_str(&self.source)
            .and_then(|t| t.render(context! { context => context_text, question => question }))
            .map_err(|e| Error::TemplateError(e.to_string()))?;
        Ok(format!("{}{}", Self::preamble(), body))
    }

    pub fn render_chunks(&self, chunks: &[ScoredChunk], question: &str) -> Result<String> {
        self.render(&join_context(chunks), question)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { source: DEFAULT_TEMPLATE.to_string() }
    }
}

pub fn join_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}
