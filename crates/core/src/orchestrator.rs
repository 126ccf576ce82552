use crate::chunking::ChunkingConfig;
use crate::config::RagConfig;
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::error::{AskError, ConfigError, IngestError, StartupError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::ingest::{load_uploads, IngestionPipeline, IngestionReport};
use crate::llm::{build_prompt, ChatClient, ChatModel, OllamaChatClient};
use crate::models::{HealthStatus, QaTurn, UploadedDocument};
use crate::ocr::{OcrEngine, OcrFallback, PageRasterizer, PdftoppmRasterizer, TesseractOcr};
use crate::retriever::Retriever;
use crate::session::SessionLog;
use crate::stores::DiskVectorStore;
use crate::traits::VectorStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// The pluggable collaborators behind the service.
#[derive(Clone)]
pub struct Backends {
    pub extractor: Arc<dyn PdfExtractor>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub ocr_engine: Arc<dyn OcrEngine>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatClient>,
}

impl Backends {
    /// lopdf extraction, poppler + tesseract OCR, Ollama embeddings and chat.
    pub fn local(config: &RagConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            extractor: Arc::new(LopdfExtractor),
            rasterizer: Arc::new(PdftoppmRasterizer::default()),
            ocr_engine: Arc::new(TesseractOcr::default()),
            embedder: Arc::new(OllamaEmbedder::new(config)?),
            chat: Arc::new(OllamaChatClient::new(config)?),
        })
    }
}

pub struct RagService {
    store: Arc<DiskVectorStore>,
    ingestion: IngestionPipeline,
    retriever: Retriever,
    chat: Arc<dyn ChatClient>,
    sessions: SessionLog,
}

impl RagService {
    pub async fn open(config: RagConfig, backends: Backends) -> Result<Self, StartupError> {
        config.validate()?;

        let store = Arc::new(
            DiskVectorStore::open(&config.persist_dir, backends.embedder.model_name()).await?,
        );
        let ocr = OcrFallback::new(backends.rasterizer, backends.ocr_engine, config.ocr_dpi);
        let ingestion = IngestionPipeline::new(
            backends.extractor,
            ocr,
            backends.embedder.clone(),
            store.clone(),
            ChunkingConfig::from(&config),
            config.persist_policy,
        );
        let retriever = Retriever::new(backends.embedder, store.clone(), config.top_k);

        info!(
            persist_dir = %config.persist_dir.display(),
            top_k = config.top_k,
            "rag service ready"
        );

        Ok(Self {
            store,
            ingestion,
            retriever,
            chat: backends.chat,
            sessions: SessionLog::with_limit(config.session_history_limit),
        })
    }

    /// Number of uploaded files that contributed at least one chunk.
    pub async fn ingest(&self, uploads: Vec<UploadedDocument>) -> Result<usize, IngestError> {
        Ok(self.ingest_with_report(uploads).await?.ingested)
    }

    pub async fn ingest_with_report(
        &self,
        uploads: Vec<UploadedDocument>,
    ) -> Result<IngestionReport, IngestError> {
        self.ingestion.ingest(uploads).await
    }

    /// Reads `paths` (folders are walked for PDFs) and ingests what could be read.
    /// Files that cannot be read land in the report's skipped list.
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> Result<IngestionReport, IngestError> {
        let loaded = load_uploads(paths)?;
        let mut report = self.ingest_with_report(loaded.uploads).await?;
        report.skipped.splice(0..0, loaded.unreadable);
        Ok(report)
    }

    /// Answers `question` from retrieved context. The session log only changes on success.
    pub async fn ask(&self, session_id: &str, question: &str, model: &str) -> Result<String, AskError> {
        let model: ChatModel = model.parse()?;
        self.ask_model(session_id, question, model).await
    }

    pub async fn ask_model(
        &self,
        session_id: &str,
        question: &str,
        model: ChatModel,
    ) -> Result<String, AskError> {
        let hits = self.retriever.retrieve(question).await?;
        let context: Vec<&str> = hits.iter().map(|hit| hit.text.as_str()).collect();
        let prompt = build_prompt(&context, question);

        let answer = self.chat.complete(model, &prompt).await.map_err(|e| {
            error!(session_id, %model, error = %e, "answer generation failed");
            e
        })?;

        self.sessions.record(session_id, question, &answer).await;
        info!(session_id, %model, context_chunks = hits.len(), "question answered");
        Ok(answer)
    }

    pub async fn history(&self, session_id: &str) -> Vec<QaTurn> {
        self.sessions.history(session_id).await
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::ok()
    }

    pub async fn entry_count(&self) -> usize {
        self.store.len().await
    }
}
