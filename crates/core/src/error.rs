use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),
}

impl From<lopdf::Error> for ExtractionError {
    fn from(value: lopdf::Error) -> Self {
        Self::PdfParse(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open document for rasterization: {0}")]
    Open(String),

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    Multimodal(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding count {returned} does not match input count {expected}")]
    CountMismatch { expected: usize, returned: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {found} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("failed to persist store to {path}: {details}")]
    Persist { path: String, details: String },
}

#[derive(Debug, Error)]
#[error("model '{requested}' not supported; choose one of: {}", .supported.join(", "))]
pub struct UnsupportedModelError {
    pub requested: String,
    pub supported: Vec<&'static str>,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{model} returned {status}: {details}")]
    BackendResponse {
        model: String,
        status: String,
        details: String,
    },

    #[error("{model} returned an empty answer")]
    EmptyAnswer { model: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModelError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
