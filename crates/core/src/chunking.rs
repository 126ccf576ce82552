use crate::config::RagConfig;
use crate::models::{Chunk, ChunkMetadata, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<&RagConfig> for ChunkingConfig {
    fn from(value: &RagConfig) -> Self {
        Self {
            max_chars: value.chunk_size,
            overlap_chars: value.chunk_overlap,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&RagConfig::default())
    }
}

impl ChunkingConfig {
    fn step(&self) -> usize {
        self.max_chars.saturating_sub(self.overlap_chars).max(1)
    }
}

/// Sliding character window over `text`. Windows start every `max - overlap` chars,
/// so neighbours share exactly `overlap` chars; the last window may be shorter.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || config.max_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + config.max_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start += config.step();
    }

    pieces
}

pub fn chunk_page(page: &Page, config: ChunkingConfig) -> Vec<Chunk> {
    split_text(&page.text, config)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            text,
            metadata: ChunkMetadata {
                source: page.source.clone(),
                page: page.index,
                chunk_index: index as u32,
                method: page.method,
            },
        })
        .collect()
}

pub fn chunk_pages(pages: &[Page], config: ChunkingConfig) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| chunk_page(page, config))
        .collect()
}
