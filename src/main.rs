use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::info;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use docqa::config::Settings;
use docqa::database::open_index;
use docqa::openai::OpenAiClient;
use docqa::rag::{write_answer, BatchReport, RagEngine};
use docqa::session::ChatSession;

/// Ask questions about PDF, DOCX and text documents using OpenAI embeddings and a vector index
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process documents and add them to the index
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Process every supported document under a directory
    IngestDir { dir: PathBuf },
    /// Ask a single question
    Ask { question: String },
    /// Start an interactive question session
    Chat,
    /// Show the indexed passages most relevant to a query
    Search { query: String },
    /// Summarize the indexed documents
    Summarize,
    /// Show what the index holds
    Info,
    /// Remove every indexed document
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    // Load configuration from environment
    let settings = Settings::from_env().context("Failed to load configuration")?;

    let index = open_index(&settings.backend).context("Failed to open vector index")?;
    let client =
        Arc::new(OpenAiClient::from_settings(&settings).context("Failed to create OpenAI client")?);

    // Initialize RAG engine
    let rag_engine = RagEngine::new(settings, client.clone(), client, index)
        .context("Failed to initialize RAG engine")?;

    match args.command {
        Command::Ingest { files } => {
            info!("Processing {} files", files.len());
            let report = rag_engine
                .ingest_files(&files)
                .await
                .context("Failed to process documents")?;
            print_report(&report);
        }
        Command::IngestDir { dir } => {
            info!("Processing directory: {}", dir.display());
            let report = rag_engine
                .ingest_directory(&dir)
                .await
                .context("Failed to process directory")?;
            print_report(&report);
        }
        Command::Ask { question } => {
            let mut session = ChatSession::new();
            let answer = rag_engine
                .ask(&mut session, &question)
                .await
                .context("Failed to answer question")?;
            write_answer(&mut io::stdout(), &answer)?;
        }
        Command::Chat => {
            // Enter interactive Q&A loop
            let mut session = ChatSession::new();
            rag_engine
                .run_chat_loop(&mut session, io::stdin().lock(), io::stdout())
                .await
                .context("Error in query loop")?;
        }
        Command::Search { query } => {
            let results = rag_engine
                .search(&query)
                .await
                .context("Search failed")?;
            if results.is_empty() {
                println!("No relevant results found");
            } else {
                println!("Found {} relevant sections:", results.len());
                for (i, hit) in results.hits.iter().enumerate() {
                    println!(
                        "\nResult {} - {} ({}, score {:.3})",
                        i + 1,
                        hit.chunk.document_name,
                        hit.chunk.locator,
                        hit.score
                    );
                    println!("{}", hit.chunk.text);
                }
            }
        }
        Command::Summarize => {
            let info = rag_engine.index_info().await?;
            if info.chunk_count == 0 {
                println!("Please upload and process some documents first");
                return Ok(());
            }
            let answer = rag_engine
                .summarize()
                .await
                .context("Failed to summarize documents")?;
            println!("Document Summary:");
            write_answer(&mut io::stdout(), &answer)?;
        }
        Command::Info => {
            let info = rag_engine
                .index_info()
                .await
                .context("Failed to read index information")?;
            println!("Backend: {}", info.backend);
            println!("Location: {}", info.location);
            println!("Indexed chunks: {}", info.chunk_count);
        }
        Command::Clear => {
            rag_engine
                .clear_index()
                .await
                .context("Failed to clear index")?;
            println!("Index cleared");
        }
    }

    Ok(())
}

fn print_report(report: &BatchReport) {
    for ingested in &report.ingested {
        println!("Processed {} ({} chunks)", ingested.name, ingested.chunks);
    }
    for path in &report.skipped {
        println!("Skipped unsupported file {}", path.display());
    }
    for (path, err) in &report.failures {
        println!("Rejected {}: {}", path.display(), err);
    }
    println!(
        "{} documents processed, {} chunks indexed, {} rejected",
        report.ingested.len(),
        report.total_chunks(),
        report.failures.len()
    );
}
