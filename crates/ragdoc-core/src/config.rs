//! Configuration: the runtime pipeline `Config` and the process `Settings`.
//!
//! Settings are loaded with Figment: built-in defaults, then `config.toml`,
//! then `config.<env>.toml` (`RUST_ENV`, default `dev`), then `APP_*` env
//! vars where `__` separates nested keys (`APP_PIPELINE__INDEX_NAME=docs`).
//! Paths accept `~` and `${VAR}`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::data_processor::ChunkingConfig;
use crate::error::{Error, Result};
use crate::prompt::{PromptTemplate, DEFAULT_TEMPLATE};
use crate::types::Metric;

/// Model id selecting the deterministic hashing embedder, e.g. `hash:384`.
pub const HASH_EMBEDDER_PREFIX: &str = "hash:";
/// Model id selecting the echo generator.
pub const ECHO_GENERATOR: &str = "echo";
/// Separates a logical index name from its generation number.
pub const GENERATION_MARKER: &str = "__g";

/// Placeholder shown instead of credentials.
pub const REDACTED: &str = "****";

/// Where the vector index lives and how to authenticate to it.
///
/// `uri` is a local LanceDB directory, a remote `db://` URI, or `memory://`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub uri: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { uri: "index/lancedb".to_string(), api_key: None, region: None }
    }
}

/// The reconfigurable part of the pipeline. Replaced wholesale on `set_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub index: IndexSettings,
    pub embedding_model: String,
    pub generation_model: String,
    pub index_name: String,
    pub template: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: IndexSettings::default(),
            embedding_model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            generation_model: "llm/model/ggml-model-q4_k.gguf".to_string(),
            index_name: "chatbotpdfs".to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("embedding_model", &self.embedding_model),
            ("generation_model", &self.generation_model),
            ("index_name", &self.index_name),
            ("index.uri", &self.index.uri),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{} must not be empty", field)));
            }
        }
        validate_index_name(&self.index_name)?;
        self.prompt_template()
            .map_err(|e| Error::InvalidConfig(format!("template: {}", e)))?;
        Ok(())
    }

    pub fn prompt_template(&self) -> Result<PromptTemplate> {
        PromptTemplate::new(self.template.clone())
    }

    /// Copy safe to hand to clients: credentials are masked.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        if out.index.api_key.is_some() {
            out.index.api_key = Some(REDACTED.to_string());
        }
        out
    }

    /// Puts back credentials a client echoed in redacted form.
    pub fn restore_redacted(mut self, current: &Config) -> Self {
        if self.index.api_key.as_deref() == Some(REDACTED) {
            self.index.api_key = current.index.api_key.clone();
        }
        self
    }

    /// True when switching from `self` to `other` invalidates stored vectors.
    pub fn needs_rebuild(&self, other: &Config) -> bool {
        self.embedding_model != other.embedding_model
            || self.index_name != other.index_name
            || self.index != other.index
    }
}

fn validate_index_name(name: &str) -> Result<()> {
    let ok_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok_chars {
        return Err(Error::InvalidConfig(format!(
            "index_name '{}' may only contain ASCII letters, digits, '_' and '-'",
            name
        )));
    }
    if name.contains(GENERATION_MARKER) || name == crate::META_TABLE {
        return Err(Error::InvalidConfig(format!("index_name '{}' is reserved", name)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub metric: Metric,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { k: 4, metric: Metric::Cosine }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_output_tokens: usize,
    pub stop: Vec<String>,
    pub temperature: f64,
    pub seed: u64,
    /// Overrides the context window reported by the model.
    pub context_window: Option<usize>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: 500,
            stop: vec!["Q:".to_string()],
            temperature: 0.8,
            seed: 299_792_458,
            context_window: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub documents_dir: String,
    pub models_dir: String,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
    pub server: ServerSettings,
    pub pipeline: Config,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            documents_dir: "data".to_string(),
            models_dir: ".".to_string(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalSettings::default(),
            generation: GenerationSettings::default(),
            server: ServerSettings::default(),
            pipeline: Config::default(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::from_figment(Self::figment(&env_name), &env_name)
    }

    pub fn figment(env_name: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn from_figment(figment: Figment, env_name: &str) -> Result<Self> {
        let settings: Settings = figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate_for_env(env_name)?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> Result<()> {
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            return Err(Error::InvalidConfig("chunking.overlap_chars must be smaller than max_chars".into()));
        }
        if self.retrieval.k == 0 {
            return Err(Error::InvalidConfig("retrieval.k must be positive".into()));
        }
        self.pipeline.validate()?;
        if matches!(env, "prod" | "production") {
            let p = &self.pipeline;
            if p.embedding_model.starts_with(HASH_EMBEDDER_PREFIX) || p.generation_model == ECHO_GENERATOR {
                return Err(Error::InvalidConfig("development models are not allowed in production".into()));
            }
        }
        Ok(())
    }

    pub fn documents_path(&self) -> PathBuf {
        expand_path(&self.documents_dir)
    }

    pub fn models_path(&self) -> PathBuf {
        expand_path(&self.models_dir)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
