use crate::error::ExtractionError;
use crate::models::{ExtractionMethod, Page};
use lopdf::Document;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub pages: Vec<Page>,
}

impl ExtractedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// True when at least one page has non-whitespace text.
    pub fn has_usable_text(&self) -> bool {
        self.pages.iter().any(|page| !page.text.trim().is_empty())
    }
}

pub trait PdfExtractor: Send + Sync {
    /// Returns one page per source page, in document order, keeping empty pages.
    fn extract_pages(&self, path: &Path, source: &str) -> Result<ExtractedDocument, ExtractionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path, source: &str) -> Result<ExtractedDocument, ExtractionError> {
        let document = Document::load(path)?;

        let mut pages = Vec::new();
        for (index, (page_no, _page_id)) in document.get_pages().into_iter().enumerate() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(source, page = page_no, %error, "page text extraction failed");
                    String::new()
                }
            };

            pages.push(Page {
                index: index as u32,
                text,
                source: source.to_string(),
                method: ExtractionMethod::Native,
            });
        }

        Ok(ExtractedDocument { pages })
    }
}

/// Page count without extracting text, used to size the OCR pass.
pub fn count_pages(path: &Path) -> Result<u32, ExtractionError> {
    let document = Document::load(path)?;
    Ok(document.get_pages().len() as u32)
}
