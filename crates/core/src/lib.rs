pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod retriever;
pub mod session;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_page, chunk_pages, split_text, ChunkingConfig};
pub use config::{PersistPolicy, RagConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    AskError, ConfigError, EmbeddingError, ExtractionError, GenerationError, IngestError, OcrError,
    StartupError, StoreError, UnsupportedModelError,
};
pub use extractor::{ExtractedDocument, LopdfExtractor, PdfExtractor};
pub use ingest::{
    discover_pdf_files, load_uploads, IngestStage, IngestionPipeline, IngestionReport,
    LoadedUploads, SkippedDocument,
};
pub use llm::{build_prompt, ChatClient, ChatModel, OllamaChatClient};
pub use models::{
    Chunk, ChunkMetadata, ExtractionMethod, HealthStatus, Page, QaTurn, RetrievedChunk,
    UploadedDocument, VectorStoreEntry,
};
pub use ocr::{
    MultimodalOcr, OcrEndpointConfig, OcrEngine, OcrFallback, PageRasterizer, PdftoppmRasterizer,
    RasterDocument, TesseractOcr,
};
pub use orchestrator::{Backends, RagService};
pub use retriever::Retriever;
pub use session::SessionLog;
pub use stores::DiskVectorStore;
pub use traits::VectorStore;
