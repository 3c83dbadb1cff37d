use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Prompt of {prompt_tokens} tokens does not fit a context window of {limit}")]
    ContextOverflow { prompt_tokens: usize, limit: usize },

    #[error("Template error: {0}")]
    TemplateError(String),

    /// The generator's output did not start with the prompt it was sent.
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A newer rebuild was requested while this one was in flight.
    #[error("Superseded by a newer request")]
    Superseded,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl Error {
    pub fn backend<E: std::fmt::Display>(context: &str, err: E) -> Self {
        Error::Backend(anyhow::anyhow!("{}: {}", context, err))
    }

    /// True for errors caused by the caller's input rather than infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::TemplateError(_) | Error::AlreadyExists(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
