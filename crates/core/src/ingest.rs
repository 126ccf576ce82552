use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::config::PersistPolicy;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::models::{Chunk, UploadedDocument, VectorStoreEntry};
use crate::ocr::OcrFallback;
use crate::traits::VectorStore;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Default)]
pub struct LoadedUploads {
    pub uploads: Vec<UploadedDocument>,
    pub unreadable: Vec<SkippedDocument>,
}

/// Reads the given files, expanding directories to the PDFs beneath them. A file that
/// cannot be read is reported as skipped at the extract stage and the rest still load.
pub fn load_uploads(paths: &[PathBuf]) -> Result<LoadedUploads, IngestError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover_pdf_files(path));
        } else {
            files.push(path.clone());
        }
    }

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(
            "no files to ingest".to_string(),
        ));
    }

    let mut loaded = LoadedUploads::default();
    for path in files {
        match UploadedDocument::from_path(&path) {
            Ok(upload) => loaded.uploads.push(upload),
            Err(error) => {
                warn!(file = %path.display(), %error, "cannot read upload");
                loaded.unreadable.push(SkippedDocument {
                    filename: path.display().to_string(),
                    stage: IngestStage::Extract,
                    reason: error.to_string(),
                });
            }
        }
    }
    Ok(loaded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestStage {
    Extract,
    OcrFallback,
    Chunk,
    EmbedAndStore,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Extract => "extract",
            IngestStage::OcrFallback => "ocr_fallback",
            IngestStage::Chunk => "chunk",
            IngestStage::EmbedAndStore => "embed_and_store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub filename: String,
    pub stage: IngestStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    /// Files that contributed at least one chunk.
    pub ingested: usize,
    pub chunks_added: usize,
    pub skipped: Vec<SkippedDocument>,
}

pub struct IngestionPipeline {
    extractor: Arc<dyn PdfExtractor>,
    ocr: OcrFallback,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunking: ChunkingConfig,
    persist_policy: PersistPolicy,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        ocr: OcrFallback,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chunking: ChunkingConfig,
        persist_policy: PersistPolicy,
    ) -> Self {
        Self {
            extractor,
            ocr,
            embedder,
            store,
            chunking,
            persist_policy,
        }
    }

    /// Ingests files one after another. A file that fails is recorded in the report and
    /// the batch moves on; only a failed flush of the store aborts the call.
    pub async fn ingest(&self, uploads: Vec<UploadedDocument>) -> Result<IngestionReport, IngestError> {
        let mut report = IngestionReport::default();

        for upload in &uploads {
            match self.ingest_one(upload).await {
                Ok(added) => {
                    info!(file = %upload.filename, chunks = added, "document ingested");
                    report.ingested += 1;
                    report.chunks_added += added;
                    if self.persist_policy == PersistPolicy::PerFile {
                        self.store.persist().await?;
                    }
                }
                Err(skipped) => {
                    warn!(
                        file = %skipped.filename,
                        stage = %skipped.stage,
                        reason = %skipped.reason,
                        "document skipped"
                    );
                    report.skipped.push(skipped);
                }
            }
        }

        self.store.persist().await?;
        info!(
            files = uploads.len(),
            ingested = report.ingested,
            chunks = report.chunks_added,
            "ingestion batch finished"
        );
        Ok(report)
    }

    async fn ingest_one(&self, upload: &UploadedDocument) -> Result<usize, SkippedDocument> {
        let staged = stage_upload(upload)
            .map_err(|error| skipped(upload, IngestStage::Extract, error))?;

        let outcome = self.process(staged.path(), upload).await;

        if let Err(error) = staged.close() {
            warn!(file = %upload.filename, %error, "failed to remove temporary upload");
        }
        outcome
    }

    async fn process(&self, path: &Path, upload: &UploadedDocument) -> Result<usize, SkippedDocument> {
        let source = upload.filename.as_str();

        let extractor = self.extractor.clone();
        let owned_path = path.to_path_buf();
        let owned_source = source.to_string();
        let extracted = tokio::task::spawn_blocking(move || {
            extractor.extract_pages(&owned_path, &owned_source)
        })
        .await
        .map_err(|error| skipped(upload, IngestStage::Extract, error))?
        .map_err(|error| skipped(upload, IngestStage::Extract, error))?;
        debug!(file = source, pages = extracted.page_count(), "native extraction done");

        let pages = if extracted.has_usable_text() {
            extracted.pages
        } else {
            info!(file = source, pages = extracted.page_count(), "no native text, falling back to ocr");
            self.ocr
                .recognize_document(path, source)
                .await
                .map_err(|error| skipped(upload, IngestStage::OcrFallback, error))?
        };

        let chunks = chunk_pages(&pages, self.chunking);
        debug!(file = source, chunks = chunks.len(), "split into chunks");
        if chunks.is_empty() {
            return Err(skipped(upload, IngestStage::Chunk, "no text to chunk"));
        }

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|error| skipped(upload, IngestStage::EmbedAndStore, error))?;
        if vectors.len() != chunks.len() {
            return Err(skipped(
                upload,
                IngestStage::EmbedAndStore,
                format!("{} embeddings for {} chunks", vectors.len(), chunks.len()),
            ));
        }

        let count = chunks.len();
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| build_entry(chunk, vector))
            .collect();
        self.store
            .add(entries)
            .await
            .map_err(|error| skipped(upload, IngestStage::EmbedAndStore, error))?;

        Ok(count)
    }
}

fn stage_upload(upload: &UploadedDocument) -> std::io::Result<NamedTempFile> {
    let mut staged = tempfile::Builder::new()
        .prefix("docqa-upload")
        .suffix(&upload.suffix())
        .tempfile()?;
    staged.write_all(&upload.bytes)?;
    staged.flush()?;
    Ok(staged)
}

fn skipped(upload: &UploadedDocument, stage: IngestStage, reason: impl ToString) -> SkippedDocument {
    SkippedDocument {
        filename: upload.filename.clone(),
        stage,
        reason: reason.to_string(),
    }
}

fn build_entry(chunk: Chunk, vector: Vec<f32>) -> VectorStoreEntry {
    VectorStoreEntry {
        id: uuid::Uuid::new_v4().to_string(),
        vector,
        content_hash: content_hash(&chunk.text),
        text: chunk.text,
        metadata: chunk.metadata,
        ingested_at: Utc::now(),
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}


#[cfg(test)]
mod tests {
    use super::fakes::FlakyEmbedder;
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::fixtures::write_pdf;
    use crate::extractor::LopdfExtractor;
    use crate::ocr::fakes::{FakeRasterizer, ScriptedOcr};
    use crate::error::{ExtractionError, StoreError};
    use crate::extractor::ExtractedDocument;
    use crate::models::RetrievedChunk;
    use crate::stores::DiskVectorStore;
    use async_trait::async_trait;
    use std::fs::{self, File};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Remembers every path it was asked to extract.
    #[derive(Default)]
    struct PathRecordingExtractor {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl PdfExtractor for PathRecordingExtractor {
        fn extract_pages(&self, path: &Path, source: &str) -> Result<ExtractedDocument, ExtractionError> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            LopdfExtractor.extract_pages(path, source)
        }
    }

    /// Counts flushes and, before each add, how many entries are already on disk.
    struct FlushWatchingStore {
        inner: Arc<DiskVectorStore>,
        persists: AtomicUsize,
        on_disk_before_add: tokio::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VectorStore for FlushWatchingStore {
        async fn add(&self, entries: Vec<VectorStoreEntry>) -> Result<(), StoreError> {
            let on_disk = DiskVectorStore::open(self.inner.dir(), "char-trigram").await?;
            self.on_disk_before_add.lock().await.push(on_disk.len().await);
            self.inner.add(entries).await
        }

        async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
            self.inner.search(query_vector, k).await
        }

        async fn persist(&self) -> Result<(), StoreError> {
            self.persists.fetch_add(1, Ordering::SeqCst);
            self.inner.persist().await
        }

        async fn len(&self) -> usize {
            self.inner.len().await
        }
    }

    fn pdf_upload(dir: &TempDir, name: &str, pages: &[Option<&str>]) -> Result<UploadedDocument, Box<dyn std::error::Error>> {
        let path = dir.path().join(name);
        write_pdf(&path, pages)?;
        Ok(UploadedDocument::from_path(&path)?)
    }

    struct Harness {
        pipeline: IngestionPipeline,
        store: Arc<DiskVectorStore>,
        ocr_calls: Arc<std::sync::atomic::AtomicUsize>,
        _db: TempDir,
    }

    async fn harness(
        embedder: Arc<dyn Embedder>,
        ocr_pages: u32,
        ocr_lines: Vec<Option<Vec<String>>>,
        policy: PersistPolicy,
    ) -> Result<Harness, Box<dyn std::error::Error>> {
        let db = tempdir()?;
        let store = Arc::new(DiskVectorStore::open(db.path(), embedder.model_name()).await?);
        let engine = Arc::new(ScriptedOcr {
            lines_per_page: ocr_lines,
            ..ScriptedOcr::default()
        });
        let ocr_calls = engine.calls.clone();
        let rasterizer = Arc::new(FakeRasterizer {
            page_count: ocr_pages,
            ..FakeRasterizer::default()
        });
        let pipeline = IngestionPipeline::new(
            Arc::new(LopdfExtractor),
            OcrFallback::new(rasterizer, engine, 200),
            embedder,
            store.clone(),
            ChunkingConfig::default(),
            policy,
        );
        Ok(Harness {
            pipeline,
            store,
            ocr_calls,
            _db: db,
        })
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn load_uploads_rejects_empty_input() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = load_uploads(&[dir.path().to_path_buf()]);
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn content_hash_is_reproducible() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }

    #[tokio::test]
    async fn native_text_skips_ocr() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let h = harness(Arc::new(CharacterNgramEmbedder::default()), 1, Vec::new(), PersistPolicy::EndOfBatch).await?;
        let upload = pdf_upload(&files, "rebates.pdf", &[Some("Rebate offers: 10% off for members.")])?;

        let report = h.pipeline.ingest(vec![upload]).await?;

        assert_eq!(report.ingested, 1);
        assert_eq!(h.ocr_calls.load(Ordering::SeqCst), 0);
        let entries = h.store.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].text.contains("Rebate offers"));
        assert_eq!(entries[0].metadata.source, "rebates.pdf");
        assert_eq!(entries[0].metadata.page, 0);
        Ok(())
    }

    #[tokio::test]
    async fn image_only_pdf_runs_ocr_once_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let h = harness(
            Arc::new(CharacterNgramEmbedder::default()),
            2,
            vec![Some(vec!["Warranty: 2 years.".to_string()]), None],
            PersistPolicy::EndOfBatch,
        )
        .await?;
        let upload = pdf_upload(&files, "scan.pdf", &[None, None])?;

        let report = h.pipeline.ingest(vec![upload]).await?;

        assert_eq!(report.ingested, 1);
        assert_eq!(h.ocr_calls.load(Ordering::SeqCst), 2);
        let entries = h.store.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Warranty: 2 years.");
        assert_eq!(entries[0].metadata.method, crate::models::ExtractionMethod::Ocr);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_and_empty_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let h = harness(Arc::new(CharacterNgramEmbedder::default()), 0, Vec::new(), PersistPolicy::EndOfBatch).await?;
        let broken = UploadedDocument::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec());
        let empty = pdf_upload(&files, "empty.pdf", &[])?;

        let report = h.pipeline.ingest(vec![broken, empty]).await?;

        assert_eq!(report.ingested, 0);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].stage, IngestStage::Extract);
        assert_eq!(report.skipped[1].stage, IngestStage::Chunk);
        assert!(h.store.is_empty().await);
        assert!(h.store.path().exists(), "store is persisted even when nothing was added");
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_skips_only_that_file() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let h = harness(Arc::new(FlakyEmbedder { poison: "POISON" }), 1, Vec::new(), PersistPolicy::EndOfBatch).await?;
        let good = pdf_upload(&files, "good.pdf", &[Some("Fine content")])?;
        let bad = pdf_upload(&files, "bad.pdf", &[Some("POISON content")])?;
        let also_good = pdf_upload(&files, "also-good.pdf", &[Some("More fine content")])?;

        let report = h.pipeline.ingest(vec![good, bad, also_good]).await?;

        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].filename, "bad.pdf");
        assert_eq!(report.skipped[0].stage, IngestStage::EmbedAndStore);
        assert_eq!(h.store.len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_duplicates_entries() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let h = harness(Arc::new(CharacterNgramEmbedder::default()), 1, Vec::new(), PersistPolicy::EndOfBatch).await?;
        let upload = pdf_upload(&files, "rebates.pdf", &[Some("Rebate offers: 10% off for members.")])?;

        h.pipeline.ingest(vec![upload.clone()]).await?;
        h.pipeline.ingest(vec![upload]).await?;

        let entries = h.store.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content_hash, entries[1].content_hash);
        assert_ne!(entries[0].id, entries[1].id);
        Ok(())
    }

    #[tokio::test]
    async fn entries_survive_reopen_after_batch() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let h = harness(Arc::new(CharacterNgramEmbedder::default()), 1, Vec::new(), PersistPolicy::PerFile).await?;
        let upload = pdf_upload(&files, "rebates.pdf", &[Some("Rebate offers: 10% off for members.")])?;

        h.pipeline.ingest(vec![upload]).await?;

        let reopened = DiskVectorStore::open(h.store.dir(), "char-trigram").await?;
        assert_eq!(reopened.len().await, 1);
        Ok(())
    }

    #[test]
    fn load_uploads_keeps_readable_files_next_to_missing_ones() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let good = dir.path().join("good.pdf");
        write_pdf(&good, &[Some("Rebate offers: 10% off for members.")])?;
        let missing = dir.path().join("missing.pdf");

        let loaded = load_uploads(&[good, missing])?;

        assert_eq!(loaded.uploads.len(), 1);
        assert_eq!(loaded.uploads[0].filename, "good.pdf");
        assert_eq!(loaded.unreadable.len(), 1);
        assert_eq!(loaded.unreadable[0].stage, IngestStage::Extract);
        assert!(loaded.unreadable[0].filename.ends_with("missing.pdf"));
        Ok(())
    }

    async fn flushes_during_batch(
        policy: PersistPolicy,
    ) -> Result<(Vec<usize>, usize), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let db = tempdir()?;
        let store = Arc::new(FlushWatchingStore {
            inner: Arc::new(DiskVectorStore::open(db.path(), "char-trigram").await?),
            persists: AtomicUsize::new(0),
            on_disk_before_add: tokio::sync::Mutex::new(Vec::new()),
        });
        let pipeline = IngestionPipeline::new(
            Arc::new(LopdfExtractor),
            OcrFallback::new(Arc::new(FakeRasterizer::default()), Arc::new(ScriptedOcr::default()), 200),
            Arc::new(CharacterNgramEmbedder::default()),
            store.clone(),
            ChunkingConfig::default(),
            policy,
        );
        let first = pdf_upload(&files, "first.pdf", &[Some("Rebate offers: 10% off for members.")])?;
        let second = pdf_upload(&files, "second.pdf", &[Some("Warranty: 2 years on all parts.")])?;

        let report = pipeline.ingest(vec![first, second]).await?;
        assert_eq!(report.ingested, 2);

        let on_disk = store.on_disk_before_add.lock().await.clone();
        Ok((on_disk, store.persists.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn per_file_policy_flushes_before_the_next_file() -> Result<(), Box<dyn std::error::Error>> {
        let (on_disk, persists) = flushes_during_batch(PersistPolicy::PerFile).await?;
        assert_eq!(on_disk, vec![0, 1]);
        assert_eq!(persists, 3);
        Ok(())
    }

    #[tokio::test]
    async fn end_of_batch_policy_flushes_once() -> Result<(), Box<dyn std::error::Error>> {
        let (on_disk, persists) = flushes_during_batch(PersistPolicy::EndOfBatch).await?;
        assert_eq!(on_disk, vec![0, 0]);
        assert_eq!(persists, 1);
        Ok(())
    }

    #[tokio::test]
    async fn staged_uploads_are_removed_whatever_the_outcome() -> Result<(), Box<dyn std::error::Error>> {
        let files = tempdir()?;
        let db = tempdir()?;
        let extractor = Arc::new(PathRecordingExtractor::default());
        let store = Arc::new(DiskVectorStore::open(db.path(), "char-trigram").await?);
        let pipeline = IngestionPipeline::new(
            extractor.clone(),
            OcrFallback::new(Arc::new(FakeRasterizer::default()), Arc::new(ScriptedOcr::default()), 200),
            Arc::new(CharacterNgramEmbedder::default()),
            store,
            ChunkingConfig::default(),
            PersistPolicy::EndOfBatch,
        );
        let broken = UploadedDocument::new("broken.pdf", b"not a pdf".to_vec());
        let good = pdf_upload(&files, "good.pdf", &[Some("Fine content")])?;

        let report = pipeline.ingest(vec![broken, good]).await?;
        assert_eq!(report.ingested, 1);
        assert_eq!(report.skipped[0].stage, IngestStage::Extract);

        let seen = extractor.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        for path in &seen {
            let name = path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default();
            assert!(name.starts_with("docqa-upload"), "{name}");
            assert!(name.ends_with(".pdf"), "{name}");
            assert!(!path.exists(), "{} was left behind", path.display());
        }
        Ok(())
    }
}
