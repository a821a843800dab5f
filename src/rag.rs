use crate::answer::{Answer, AnswerComposer, ChatModel};
use crate::chunking::Chunker;
use crate::config::Settings;
use crate::database::{IndexInfo, IndexRecord, VectorIndex};
use crate::document::{check_upload, resolve_format, Document};
use crate::embeddings::{embed_in_batches, Embedder};
use crate::error::{RagError, Result};
use crate::retrieval::{RetrievalResult, Retriever};
use crate::session::ChatSession;
use log::{error, info, warn};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Prompt sent by the summarize action
pub const SUMMARY_PROMPT: &str =
    "Please provide a summary of the main topics and key information in the uploaded documents.";

pub const SAMPLE_QUESTIONS: [&str; 5] = [
    "What are the main topics covered in these documents?",
    "Can you summarize the key findings?",
    "What are the important dates mentioned?",
    "Who are the main people or organizations mentioned?",
    "What are the recommendations or conclusions?",
];

/// Outcome of ingesting one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub name: String,
    pub chunks: usize,
}

/// Outcome of ingesting several files
#[derive(Debug, Default)]
pub struct BatchReport {
    pub ingested: Vec<IngestReport>,
    /// Files rejected for their format, size or content
    pub failures: Vec<(PathBuf, RagError)>,
    /// Files passed over during a directory walk because of their extension
    pub skipped: Vec<PathBuf>,
}

impl BatchReport {
    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|r| r.chunks).sum()
    }
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine {
    settings: Settings,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    index: Box<dyn VectorIndex>,
}

impl RagEngine {
    /// Create a new RAG engine
    pub fn new(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        index: Box<dyn VectorIndex>,
    ) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap)?;

        Ok(RagEngine {
            settings,
            chunker,
            embedder,
            chat,
            index,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process a file: chunk it, generate embeddings, and store them in the index.
    ///
    /// Format and size are checked before the file is parsed, and the index
    /// is only touched once every chunk has an embedding. Chunks from an
    /// earlier ingestion of the same document are replaced.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        let format = resolve_format(path, &self.settings.supported_formats)?;
        let size_bytes = check_upload(path, self.settings.max_file_size_bytes())?;

        let document = Document::load(path, format, size_bytes)?;

        // Split content into chunks
        let chunks = self.chunker.chunk(&document);
        info!("Split {} into {} chunks", document.name, chunks.len());

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.settings.embedding_batch_size,
        )
        .await?;

        let records = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexRecord { chunk, embedding })
            .collect::<Vec<_>>();
        // Chunks of an earlier version would otherwise outlive the new text
        let replaced = self.index.remove_document(&document.document_id).await?;
        if replaced > 0 {
            info!("Replacing {} chunks of {}", replaced, document.name);
        }
        let stored = self.index.add(records).await?;

        info!("Indexed {} chunks from {}", stored, document.name);
        Ok(IngestReport {
            document_id: document.document_id,
            name: document.name,
            chunks: stored,
        })
    }

    /// Ingest each file in turn.
    ///
    /// A file that fails on its own is recorded and the rest still run;
    /// service and index failures stop the batch.
    pub async fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for path in paths {
            self.ingest_into(path.as_ref(), &mut report).await?;
        }
        Ok(report)
    }

    /// Walk a directory recursively and ingest every supported file
    pub async fn ingest_directory(&self, dir: &Path) -> Result<BatchReport> {
        if !dir.is_dir() {
            return Err(RagError::DirectoryNotFound(dir.to_path_buf()));
        }

        let mut report = BatchReport::default();
        let files: Vec<PathBuf> = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();

        if files.is_empty() {
            warn!("No files found in {}", dir.display());
        }

        for path in files {
            if resolve_format(&path, &self.settings.supported_formats).is_err() {
                info!("Skipping unsupported file {}", path.display());
                report.skipped.push(path);
                continue;
            }
            self.ingest_into(&path, &mut report).await?;
        }

        info!(
            "Ingested {} files ({} chunks), {} failed, {} skipped",
            report.ingested.len(),
            report.total_chunks(),
            report.failures.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn ingest_into(&self, path: &Path, report: &mut BatchReport) -> Result<()> {
        match self.ingest_file(path).await {
            Ok(ingested) => report.ingested.push(ingested),
            Err(e) if e.is_per_file() => {
                error!("{}", e);
                report.failures.push((path.to_path_buf(), e));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Retrieve the chunks most relevant to `query` without generating an answer
    pub async fn search(&self, query: &str) -> Result<RetrievalResult> {
        self.retriever().retrieve(query).await
    }

    /// Answer a question and record the turn in `session`
    pub async fn ask(&self, session: &mut ChatSession, question: &str) -> Result<Answer> {
        let retrieved = self.search(question).await?;
        let composer = AnswerComposer::new(self.chat.as_ref(), &self.settings);
        let answer = composer
            .compose(
                question,
                &retrieved,
                session.recent(self.settings.history_turns),
            )
            .await?;

        session.record(question, &answer);
        Ok(answer)
    }

    /// Summarize the indexed documents through the regular question pipeline
    pub async fn summarize(&self) -> Result<Answer> {
        self.ask(&mut ChatSession::new(), SUMMARY_PROMPT).await
    }

    pub async fn index_info(&self) -> Result<IndexInfo> {
        self.index.info().await
    }

    /// Remove every indexed chunk
    pub async fn clear_index(&self) -> Result<()> {
        self.index.clear().await
    }

    fn retriever(&self) -> Retriever<'_> {
        Retriever::from_settings(self.embedder.as_ref(), self.index.as_ref(), &self.settings)
    }

    /// Run an interactive question loop until `exit` or end of input.
    ///
    /// `/clear` forgets the conversation and `/samples` lists example
    /// questions. A failed question is reported and the loop carries on.
    pub async fn run_chat_loop<R, W>(
        &self,
        session: &mut ChatSession,
        mut input: R,
        mut output: W,
    ) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        writeln!(
            output,
            "Ready to answer questions about the indexed documents. Type 'exit' to quit."
        )?;

        let mut buffer = String::new();
        loop {
            write!(output, "\nYour question: ")?;
            output.flush()?;

            buffer.clear();
            if input.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }

            match question.to_lowercase().as_str() {
                "exit" => {
                    writeln!(output, "Goodbye!")?;
                    break;
                }
                "/clear" => {
                    session.clear();
                    writeln!(output, "Conversation cleared.")?;
                    continue;
                }
                "/samples" => {
                    writeln!(output, "Try asking:")?;
                    for sample in SAMPLE_QUESTIONS {
                        writeln!(output, "  - {}", sample)?;
                    }
                    continue;
                }
                _ => {}
            }

            match self.ask(session, question).await {
                Ok(answer) => write_answer(&mut output, &answer)?,
                Err(e) => {
                    error!("Failed to answer question: {}", e);
                    writeln!(output, "Error: {}", e)?;
                }
            }
        }

        Ok(())
    }
}

/// Print an answer followed by its sources
pub fn write_answer<W: Write>(output: &mut W, answer: &Answer) -> std::io::Result<()> {
    writeln!(output, "\n{}", answer.text)?;
    if !answer.citations.is_empty() {
        writeln!(output, "\nSources:")?;
        for citation in &answer.citations {
            writeln!(
                output,
                "  [{}] {} ({})",
                citation.marker, citation.document_name, citation.locator
            )?;
        }
    }
    Ok(())
}
