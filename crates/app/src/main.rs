use chrono::Utc;
use clap::{Parser, Subcommand};
use docqa_core::config::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_MODEL, DEFAULT_OCR_DPI,
    DEFAULT_OLLAMA_URL, DEFAULT_PERSIST_DIR, DEFAULT_TOP_K,
};
use docqa_core::{
    Backends, CharacterNgramEmbedder, MultimodalOcr, OcrEndpointConfig,
    PersistPolicy, RagConfig, RagService,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ollama base URL used for embeddings and chat
    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Embedding model identifier
    #[arg(long, env = "DOCQA_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Use the offline character-trigram embedder instead of Ollama
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,

    /// Directory holding the persisted vector store
    #[arg(long, env = "DOCQA_PERSIST_DIR", default_value = DEFAULT_PERSIST_DIR)]
    persist_dir: PathBuf,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Resolution used to rasterize pages for OCR
    #[arg(long, default_value_t = DEFAULT_OCR_DPI)]
    ocr_dpi: u32,

    /// Number of chunks retrieved per question
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Timeout for each call to the model server, in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Flush the vector store after every ingested file instead of once per batch
    #[arg(long, default_value_t = false)]
    persist_each_file: bool,

    /// Keep at most this many turns per chat session
    #[arg(long)]
    history_limit: Option<usize>,

    /// Multimodal OCR endpoint; when set it replaces tesseract
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer token for the multimodal OCR endpoint
    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDF files (directories are searched recursively).
    Ingest {
        /// Files or folders to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask one question against the ingested documents.
    Ask {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        question: String,
        /// One of: deepseek-r1, gemma, llama3
        #[arg(long, default_value = "llama3")]
        model: String,
    },
    /// Interactive question loop; `/history` prints the session log, `/quit` exits.
    Chat {
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long, default_value = "llama3")]
        model: String,
    },
    /// Print the question/answer history recorded by this process.
    History {
        #[arg(long)]
        session_id: String,
    },
    /// Report service health.
    Health,
}

impl Cli {
    fn rag_config(&self) -> RagConfig {
        RagConfig {
            ollama_url: self.ollama_url.clone(),
            embedding_model: self.embedding_model.clone(),
            persist_dir: self.persist_dir.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            ocr_dpi: self.ocr_dpi,
            top_k: self.top_k,
            request_timeout: Duration::from_secs(self.timeout_secs),
            persist_policy: if self.persist_each_file {
                PersistPolicy::PerFile
            } else {
                PersistPolicy::EndOfBatch
            },
            session_history_limit: self.history_limit,
        }
    }

    fn backends(&self, config: &RagConfig) -> anyhow::Result<Backends> {
        let mut backends = Backends::local(config)?;
        if self.offline_embeddings {
            backends.embedder = Arc::new(CharacterNgramEmbedder::default());
        }
        if let Some(endpoint) = self.ocr_endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            let api_key = self
                .ocr_api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string);
            backends.ocr_engine = Arc::new(MultimodalOcr::new(
                config.http_client()?,
                OcrEndpointConfig {
                    endpoint: endpoint.to_string(),
                    api_key,
                },
            ));
        }
        Ok(backends)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Command::Health = cli.command {
        println!("{}", json!({ "status": "ok" }));
        return Ok(());
    }

    let config = cli.rag_config();
    let backends = cli.backends(&config)?;
    let service = RagService::open(config, backends).await?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    match cli.command {
        Command::Ingest { paths } => {
            let report = service.ingest_paths(&paths).await?;

            for skipped in &report.skipped {
                warn!(
                    file = %skipped.filename,
                    stage = %skipped.stage,
                    reason = %skipped.reason,
                    "skipped document"
                );
            }
            info!(
                ingested = report.ingested,
                chunks = report.chunks_added,
                entries = service.entry_count().await,
                "vector store updated"
            );

            println!(
                "{}",
                json!({ "message": format!("Successfully ingested {} documents.", report.ingested) })
            );
        }
        Command::Ask {
            session_id,
            question,
            model,
        } => {
            let answer = service.ask(&session_id, &question, &model).await?;
            println!("{}", json!({ "answer": answer }));
        }
        Command::Chat { session_id, model } => {
            let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat_loop(&service, &session_id, &model).await?;
        }
        Command::History { session_id } => {
            let history = service.history(&session_id).await;
            println!("{}", json!({ "history": history }));
        }
        Command::Health => println!("{}", serde_json::to_string(&service.health())?),
    }

    Ok(())
}

async fn chat_loop(service: &RagService, session_id: &str, model: &str) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(format!("session {session_id}; /history to review, /quit to leave\n").as_bytes())
        .await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();

        match question {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                let history = service.history(session_id).await;
                let rendered = serde_json::to_string_pretty(&json!({ "history": history }))?;
                stdout.write_all(format!("{rendered}\n").as_bytes()).await?;
            }
            _ => match service.ask(session_id, question, model).await {
                Ok(answer) => stdout.write_all(format!("{answer}\n").as_bytes()).await?,
                Err(error) => {
                    warn!(%error, "question failed");
                    stdout.write_all(format!("error: {error}\n").as_bytes()).await?;
                }
            },
        }
    }

    Ok(())
}
