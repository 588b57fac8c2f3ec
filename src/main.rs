use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use research_chatbot::cli::{run_chat_loop, ChatMode};
use research_chatbot::config::Config;
use research_chatbot::embeddings::EmbeddingClient;
use research_chatbot::gemini::GeminiClient;
use research_chatbot::index::VectorIndex;
use research_chatbot::indexer::{load_index, persist_index, Indexer};
use research_chatbot::llm::LanguageModel;
use research_chatbot::rag::RagEngine;
use research_chatbot::server::{self, AppState};

/// Ask questions about your PDFs, answered by Gemini with page citations
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory scanned for documents (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding the persisted index (overrides PERSIST_DIR)
    #[arg(long, global = true)]
    persist_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the indexed documents in the terminal (default)
    Chat {
        /// Answer each question on its own, without conversation memory
        #[arg(long)]
        stateless: bool,

        /// Rebuild the index even if a persisted one exists
        #[arg(long)]
        reindex: bool,
    },
    /// Rebuild the index from the data directory and persist it
    Index,
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    // Load configuration from environment
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = args.persist_dir {
        config.persist_dir = dir;
    }
    info!("Using configuration {:?}", config);

    let gemini = Arc::new(GeminiClient::new(&config).context("Failed to initialize Gemini client")?);
    let embedder: Arc<dyn EmbeddingClient> = gemini.clone();
    let llm: Arc<dyn LanguageModel> = gemini;

    match args.command.unwrap_or(Command::Chat {
        stateless: false,
        reindex: false,
    }) {
        Command::Chat { stateless, reindex } => {
            if !config.data_dir.exists() {
                std::fs::create_dir_all(&config.data_dir).with_context(|| {
                    format!("Failed to create {}", config.data_dir.display())
                })?;
                println!(
                    "Created '{}'. Put your PDFs there and run again.",
                    config.data_dir.display()
                );
                return Ok(());
            }

            let index = if reindex {
                build_index(&config, embedder.clone()).await?
            } else {
                match load_index(config.persist_dir.clone())
                    .await
                    .context("Failed to load index")?
                {
                    Some(index) => {
                        info!(
                            "Loaded index with {} chunks from {}",
                            index.len(),
                            config.persist_dir.display()
                        );
                        if index.embedding_model() != embedder.model() {
                            warn!(
                                "Index was built with {}, run with --reindex to use {}",
                                index.embedding_model(),
                                embedder.model()
                            );
                        }
                        Arc::new(index)
                    }
                    None => build_index(&config, embedder.clone()).await?,
                }
            };

            let engine = RagEngine::new(&config, embedder, llm, Some(index));
            let mode = if stateless {
                ChatMode::Stateless
            } else {
                ChatMode::Context
            };

            let stdin = std::io::stdin();
            run_chat_loop(&engine, mode, stdin.lock(), std::io::stdout())
                .await
                .context("Error in chat loop")?;
        }
        Command::Index => {
            let index = build_index(&config, embedder).await?;
            println!(
                "Indexed {} chunks into {}",
                index.len(),
                config.persist_dir.display()
            );
        }
        Command::Serve { addr } => {
            let index = load_index(config.persist_dir.clone())
                .await
                .context("Failed to load index")?;
            match &index {
                Some(index) => info!("Loaded index with {} chunks", index.len()),
                None => info!("No index yet, waiting for an upload"),
            }

            let state = AppState::new(config, embedder, llm, index);
            server::serve(addr, state)
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}

/// Build the index from the data directory and persist it
async fn build_index(
    config: &Config,
    embedder: Arc<dyn EmbeddingClient>,
) -> Result<Arc<VectorIndex>> {
    info!("Indexing documents in {}", config.data_dir.display());

    let indexer = Indexer::new(config, embedder);
    let index = Arc::new(
        indexer
            .index_directory(&config.data_dir)
            .await
            .with_context(|| format!("Failed to index {}", config.data_dir.display()))?,
    );

    persist_index(index.clone(), config.persist_dir.clone())
        .await
        .context("Failed to persist index")?;
    info!("Persisted index to {}", config.persist_dir.display());

    Ok(index)
}
