use crate::error::OcrError;
use crate::extractor::count_pages;
use crate::models::{ExtractionMethod, Page};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    // The handle owns the resources tied to the document and releases them on drop.
    async fn open(&self, path: &Path) -> Result<Box<dyn RasterDocument>, OcrError>;
}

#[async_trait]
pub trait RasterDocument: Send + Sync {
    fn page_count(&self) -> u32;

    async fn render_page(&self, index: u32, dpi: u32) -> Result<Vec<u8>, OcrError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, png: &[u8]) -> Result<Vec<String>, OcrError>;
}

#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    pub binary: PathBuf,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
        }
    }
}

struct PdftoppmDocument {
    binary: PathBuf,
    source: PathBuf,
    page_count: u32,
    scratch: TempDir,
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn open(&self, path: &Path) -> Result<Box<dyn RasterDocument>, OcrError> {
        let owned_path = path.to_path_buf();
        let page_count = tokio::task::spawn_blocking(move || count_pages(&owned_path))
            .await
            .map_err(|error| OcrError::Open(error.to_string()))?
            .map_err(|error| OcrError::Open(error.to_string()))?;
        let scratch = tempfile::Builder::new().prefix("docqa-raster").tempdir()?;
        Ok(Box::new(PdftoppmDocument {
            binary: self.binary.clone(),
            source: path.to_path_buf(),
            page_count,
            scratch,
        }))
    }
}

#[async_trait]
impl RasterDocument for PdftoppmDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    async fn render_page(&self, index: u32, dpi: u32) -> Result<Vec<u8>, OcrError> {
        if index >= self.page_count {
            return Err(OcrError::PageOutOfRange {
                page: index,
                page_count: self.page_count,
            });
        }

        let page_no = (index + 1).to_string();
        let prefix = self.scratch.path().join(format!("page-{page_no}"));
        let output = Command::new(&self.binary)
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_no)
            .arg("-l")
            .arg(&page_no)
            .arg("-png")
            .arg("-singlefile")
            .arg(&self.source)
            .arg(&prefix)
            .output()
            .await?;

        if !output.status.success() {
            return Err(OcrError::Tool {
                tool: "pdftoppm",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let image_path = prefix.with_extension("png");
        let png = tokio::fs::read(&image_path).await?;
        tokio::fs::remove_file(&image_path).await?;
        Ok(png)
    }
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: PathBuf,
    pub language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, png: &[u8]) -> Result<Vec<String>, OcrError> {
        let image = tempfile::Builder::new()
            .prefix("docqa-ocr")
            .suffix(".png")
            .tempfile()?;
        tokio::fs::write(image.path(), png).await?;

        let output = Command::new(&self.binary)
            .arg(image.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .await?;

        if !output.status.success() {
            return Err(OcrError::Tool {
                tool: "tesseract",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(non_empty_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct MultimodalOcrRequest<'a> {
    image_base64: String,
    mime_type: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct MultimodalOcrResponse {
    #[serde(default)]
    lines: Option<Vec<String>>,
    #[serde(default)]
    text: Option<String>,
}

pub struct MultimodalOcr {
    client: Client,
    config: OcrEndpointConfig,
}

impl MultimodalOcr {
    pub fn new(client: Client, config: OcrEndpointConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl OcrEngine for MultimodalOcr {
    async fn recognize(&self, png: &[u8]) -> Result<Vec<String>, OcrError> {
        let payload = MultimodalOcrRequest {
            image_base64: STANDARD.encode(png),
            mime_type: "image/png",
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(OcrError::Multimodal(format!(
                "request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: MultimodalOcrResponse = response.json().await?;
        payload_to_lines(payload)
    }
}

fn payload_to_lines(payload: MultimodalOcrResponse) -> Result<Vec<String>, OcrError> {
    if let Some(lines) = payload.lines {
        return Ok(lines
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect());
    }

    if let Some(text) = payload.text {
        return Ok(non_empty_lines(&text));
    }

    Err(OcrError::Multimodal(
        "response carried neither `lines` nor `text`".to_string(),
    ))
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct OcrFallback {
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn OcrEngine>,
    dpi: u32,
}

impl OcrFallback {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, engine: Arc<dyn OcrEngine>, dpi: u32) -> Self {
        Self {
            rasterizer,
            engine,
            dpi,
        }
    }

    /// One page per source page. A page that fails to render or recognize comes back
    /// with empty text so page indices stay aligned with the document.
    pub async fn recognize_document(&self, path: &Path, source: &str) -> Result<Vec<Page>, OcrError> {
        let document = self.rasterizer.open(path).await?;
        let page_count = document.page_count();
        let mut pages = Vec::with_capacity(page_count as usize);

        for index in 0..page_count {
            let text = match self.recognize_page(document.as_ref(), index).await {
                Ok(text) => text,
                Err(error) => {
                    warn!(source, page = index, %error, "ocr failed for page");
                    String::new()
                }
            };
            debug!(source, page = index, chars = text.len(), "ocr page done");
            pages.push(Page {
                index,
                text,
                source: source.to_string(),
                method: ExtractionMethod::Ocr,
            });
        }

        drop(document);
        info!(source, pages = pages.len(), "ocr fallback finished");
        Ok(pages)
    }

    async fn recognize_page(&self, document: &dyn RasterDocument, index: u32) -> Result<String, OcrError> {
        let png = document.render_page(index, self.dpi).await?;
        let lines = self.engine.recognize(&png).await?;
        Ok(lines.join("\n").trim().to_string())
    }
}
