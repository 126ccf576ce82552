use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "granite-embedding:278m";
pub const DEFAULT_PERSIST_DIR: &str = "db/vectors";
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_OCR_DPI: u32 = 200;
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// When the vector store is flushed to disk during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistPolicy {
    /// Once, after every file of the batch has been processed.
    #[default]
    EndOfBatch,
    /// After each successfully ingested file, and once more at the end.
    PerFile,
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub ollama_url: String,
    pub embedding_model: String,
    pub persist_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub ocr_dpi: u32,
    pub top_k: usize,
    pub request_timeout: Duration,
    pub persist_policy: PersistPolicy,
    pub session_history_limit: Option<usize>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            persist_dir: PathBuf::from(DEFAULT_PERSIST_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            ocr_dpi: DEFAULT_OCR_DPI,
            top_k: DEFAULT_TOP_K,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            persist_policy: PersistPolicy::default(),
            session_history_limit: None,
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be greater than zero".to_string()));
        }
        if self.ocr_dpi == 0 {
            return Err(ConfigError::Invalid("ocr_dpi must be greater than zero".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.session_history_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "session_history_limit must be greater than zero when set".to_string(),
            ));
        }
        self.base_url()?;
        Ok(())
    }

    /// Ollama base URL with a trailing slash so `join` appends instead of replacing.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let trimmed = self.ollama_url.trim().trim_end_matches('/');
        Ok(Url::parse(&format!("{trimmed}/"))?)
    }

    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?)
    }
}
