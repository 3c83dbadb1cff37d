//! The RAG pipeline: owns the published snapshot of components and index
//! generation, and serializes everything that replaces it.
//!
//! Readers take one snapshot per request and keep it for the whole request.
//! Writers (`set_config`, `ingest`, `add_document`) run one at a time; a
//! failed writer leaves the previous snapshot in place.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Mutex;

use ragdoc_core::config::{Config, Settings};
use ragdoc_core::data_processor::{list_document_files, DataProcessor};
use ragdoc_core::prompt::PromptTemplate;
use ragdoc_core::traits::{Embedder, Generator, VectorIndex};
use ragdoc_core::types::{RetrievalResult, ScoredChunk};
use ragdoc_core::{Error, Result};
use ragdoc_embed::load_embedder;
use ragdoc_generate::{generate_answer, load_generator};
use ragdoc_vector::{collect_stale_generations, open_index, IndexHandle};

mod rebuild;

use rebuild::BuildJob;

/// Extension given to uploaded documents.
pub const UPLOAD_EXTENSION: &str = "pdf";

/// One published, internally consistent state of the pipeline.
pub struct Snapshot {
    pub version: u64,
    pub config: Config,
    pub template: PromptTemplate,
    pub generator: Arc<dyn Generator>,
    pub index_service: Arc<dyn VectorIndex>,
    pub index: IndexHandle,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub version: u64,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadOutcome {
    Indexed(IngestReport),
    /// Stored, but a newer ingest took over indexing it.
    Deferred,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub response: String,
    pub truncated: bool,
    pub sources: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub version: u64,
    pub ready: bool,
    pub rebuilding: bool,
    pub chunks: usize,
    pub index_table: String,
    pub config: Config,
}

pub struct Pipeline {
    settings: Settings,
    processor: Arc<DataProcessor>,
    current: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    latest_ticket: AtomicU64,
    rebuilding: AtomicBool,
}

impl Pipeline {
    /// Loads models, clears stale index generations and runs the first full
    /// ingest. The pipeline only exists once all of that succeeded.
    pub async fn initialize(settings: Settings) -> Result<Self> {
        settings.pipeline.validate()?;
        let index_service = open_index(&settings.pipeline.index).await?;
        Self::initialize_with_index(settings, index_service).await
    }

    /// Like [`Pipeline::initialize`], serving from an already opened index
    /// service. A later change of `index` settings reopens through `open_index`.
    pub async fn initialize_with_index(settings: Settings, index_service: Arc<dyn VectorIndex>) -> Result<Self> {
        let config = settings.pipeline.clone();
        config.validate()?;
        let template = config.prompt_template()?;
        let processor = Arc::new(DataProcessor::new(settings.chunking)?);
        tracing::info!(config = ?config.redacted(), "initializing pipeline");
        let documents_dir = settings.documents_path();
        if !documents_dir.exists() {
            tracing::info!(dir = %documents_dir.display(), "creating documents directory");
            std::fs::create_dir_all(&documents_dir)?;
        }

        let embedder = load_embedder_blocking(&config.embedding_model, &settings).await?;
        let generator = load_generator_blocking(&config.generation_model, &settings).await?;
        collect_stale_generations(index_service.as_ref(), &config.index_name, &[]).await?;

        let version = 1;
        let (index, chunk_count) = BuildJob {
            processor: Arc::clone(&processor),
            documents_dir,
            metric: settings.retrieval.metric,
            index: &index_service,
            embedder: &embedder,
            logical: &config.index_name,
            version,
            ticket: None,
        }
        .run()
        .await?;

        let snapshot = Snapshot { version, config, template, generator, index_service, index, chunk_count };
        tracing::info!(version, chunks = chunk_count, "pipeline ready");
        Ok(Self {
            settings,
            processor,
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
            latest_ticket: AtomicU64::new(0),
            rebuilding: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn config(&self) -> Config {
        self.current.load().config.clone()
    }

    pub fn status(&self) -> PipelineStatus {
        let snap = self.current.load();
        PipelineStatus {
            version: snap.version,
            ready: true,
            rebuilding: self.rebuilding.load(Ordering::SeqCst),
            chunks: snap.chunk_count,
            index_table: snap.index.table().to_string(),
            config: snap.config.redacted(),
        }
    }

    /// Replaces the whole configuration. Components are reloaded only when
    /// their ids change; the index is rebuilt only when stored vectors would
    /// no longer match. Returns the newly active config.
    pub async fn set_config(&self, new: Config) -> Result<Config> {
        new.validate()?;
        let template = new.prompt_template()?;

        let _writer = self.writer.lock().await;
        let cur = self.current.load_full();
        if new == cur.config {
            return Ok(new);
        }
        tracing::info!(config = ?new.redacted(), "applying configuration");

        let embedder = if new.embedding_model != cur.config.embedding_model {
            load_embedder_blocking(&new.embedding_model, &self.settings).await?
        } else {
            Arc::clone(cur.index.embedder())
        };
        let generator = if new.generation_model != cur.config.generation_model {
            load_generator_blocking(&new.generation_model, &self.settings).await?
        } else {
            Arc::clone(&cur.generator)
        };
        let index_service = if new.index != cur.config.index {
            open_index(&new.index).await?
        } else {
            Arc::clone(&cur.index_service)
        };

        let version = cur.version + 1;
        let rebuild = cur.config.needs_rebuild(&new);
        let (index, chunk_count) = if rebuild {
            let _flag = RebuildFlag::raise(&self.rebuilding);
            self.build_job(&index_service, &embedder, &new.index_name, version, None).run().await?
        } else {
            (cur.index.clone(), cur.chunk_count)
        };

        let published = index.table().to_string();
        self.publish(Snapshot {
            version,
            config: new.clone(),
            template,
            generator,
            index_service: Arc::clone(&index_service),
            index,
            chunk_count,
        });

        // Leftover generations of this name in the selected store. The
        // previous table is kept; its retirement drops it once unreferenced.
        if rebuild && (new.index != cur.config.index || new.index_name != cur.config.index_name) {
            let keep = [published.as_str(), cur.index.table()];
            if let Err(error) = collect_stale_generations(index_service.as_ref(), &new.index_name, &keep).await {
                tracing::warn!(index = %new.index_name, %error, "failed to remove stale generations");
            }
        }
        Ok(new)
    }

    /// Full re-ingest of the documents directory into a fresh generation.
    /// Fails with `Superseded` if a newer ingest was requested meanwhile.
    pub async fn ingest(&self) -> Result<IngestReport> {
        let ticket = self.take_ticket();
        let _writer = self.writer.lock().await;
        self.ingest_locked(ticket).await
    }

    /// Caller holds the writer lock.
    async fn ingest_locked(&self, ticket: u64) -> Result<IngestReport> {
        if self.latest_ticket.load(Ordering::SeqCst) != ticket {
            return Err(Error::Superseded);
        }
        let _flag = RebuildFlag::raise(&self.rebuilding);

        let cur = self.current.load_full();
        let version = cur.version + 1;
        let (index, chunk_count) = self
            .build_job(
                &cur.index_service,
                cur.index.embedder(),
                &cur.config.index_name,
                version,
                Some((&self.latest_ticket, ticket)),
            )
            .run()
            .await?;

        self.publish(Snapshot {
            version,
            config: cur.config.clone(),
            template: cur.template.clone(),
            generator: Arc::clone(&cur.generator),
            index_service: Arc::clone(&cur.index_service),
            index,
            chunk_count,
        });
        Ok(IngestReport { version, chunks: chunk_count })
    }

    /// Stores `<documents_dir>/<filename>.pdf` and re-ingests the directory.
    /// If that ingest fails the stored file is removed again.
    pub async fn add_document(&self, filename: &str, bytes: &[u8]) -> Result<UploadOutcome> {
        let path = self.upload_path(filename)?;
        if bytes.is_empty() {
            return Err(Error::InvalidConfig(format!("upload '{}' is empty", filename)));
        }
        if path.exists() {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        let _writer = self.writer.lock().await;
        std::fs::create_dir_all(self.settings.documents_path())?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::AlreadyExists(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let written = file.write_all(bytes);
        drop(file);
        if let Err(error) = written {
            remove_upload(&path);
            return Err(error.into());
        }
        tracing::info!(path = %path.display(), bytes = bytes.len(), "stored upload");

        // Ticket taken after the file exists: whoever supersedes us will index it.
        let ticket = self.take_ticket();
        match self.ingest_locked(ticket).await {
            Ok(report) => Ok(UploadOutcome::Indexed(report)),
            Err(Error::Superseded) => Ok(UploadOutcome::Deferred),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ingest failed, removing upload");
                remove_upload(&path);
                Err(error)
            }
        }
    }

    /// Sorted file names of the ingestible documents.
    pub fn list_documents(&self) -> Result<Vec<String>> {
        document_names(&self.settings.documents_path())
    }

    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        let snap = self.current.load_full();
        snap.index.query(question, k).await
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(Error::InvalidConfig("question must not be empty".into()));
        }
        let snap = self.current.load_full();
        let hits = snap.index.query(question, self.settings.retrieval.k).await?;
        let result = generate_answer(
            Arc::clone(&snap.generator),
            &snap.template,
            &hits,
            question,
            &self.settings.generation,
        )
        .await?;
        tracing::debug!(version = snap.version, prompt_tokens = result.prompt_tokens, truncated = result.truncated, "answered");
        Ok(Answer { response: result.answer, truncated: result.truncated, sources: result.context_used })
    }

    fn take_ticket(&self) -> u64 {
        self.latest_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn build_job<'a>(
        &'a self,
        index: &'a Arc<dyn VectorIndex>,
        embedder: &'a Arc<dyn Embedder>,
        logical: &'a str,
        version: u64,
        ticket: Option<(&'a AtomicU64, u64)>,
    ) -> BuildJob<'a> {
        BuildJob {
            processor: Arc::clone(&self.processor),
            documents_dir: self.settings.documents_path(),
            metric: self.settings.retrieval.metric,
            index,
            embedder,
            logical,
            version,
            ticket,
        }
    }

    fn publish(&self, snapshot: Snapshot) {
        let version = snapshot.version;
        let previous = self.current.swap(Arc::new(snapshot));
        let current = self.current.load();
        if previous.index.table() != current.index.table() {
            previous.index.retire();
        }
        tracing::info!(version, table = %current.index.table(), "published snapshot");
    }

    fn upload_path(&self, filename: &str) -> Result<PathBuf> {
        let name = filename.trim();
        let stem = name
            .strip_suffix(".pdf")
            .or_else(|| name.strip_suffix(".PDF"))
            .unwrap_or(name);
        let path_like = stem.contains(['/', '\\', '\0']) || stem.starts_with('.') || stem == "..";
        if stem.is_empty() || path_like {
            return Err(Error::InvalidConfig(format!("invalid document name '{}'", filename)));
        }
        Ok(self.settings.documents_path().join(format!("{}.{}", stem, UPLOAD_EXTENSION)))
    }
}

/// File names under `dir` that an ingest would pick up, relative to `dir`.
pub fn document_names(dir: &Path) -> Result<Vec<String>> {
    let files = list_document_files(dir)?;
    Ok(files
        .iter()
        .map(|p| p.strip_prefix(dir).unwrap_or(p).to_string_lossy().to_string())
        .collect())
}

fn remove_upload(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), %error, "failed to remove upload");
    }
}

struct RebuildFlag<'a>(&'a AtomicBool);

impl<'a> RebuildFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RebuildFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn load_embedder_blocking(model_id: &str, settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let model_id = model_id.to_string();
    let models_dir = settings.models_path();
    tokio::task::spawn_blocking(move || load_embedder(&model_id, &models_dir))
        .await
        .map_err(|e| Error::backend("embedder load task", e))?
}

async fn load_generator_blocking(model_id: &str, settings: &Settings) -> Result<Arc<dyn Generator>> {
    let model_id = model_id.to_string();
    let models_dir = settings.models_path();
    let generation = settings.generation.clone();
    tokio::task::spawn_blocking(move || load_generator(&model_id, &models_dir, &generation))
        .await
        .map_err(|e| Error::backend("generator load task", e))?
}
