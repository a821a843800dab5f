use crate::document::{Document, Locator};
use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

/// Preferred split points, strongest first
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "? ", "! ", " "];

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// `{document_id}#{index}`, stable across re-ingestion
    pub chunk_id: String,
    /// Unique identifier for the document this chunk belongs to
    pub document_id: String,
    /// File name of the owning document, for citations
    pub document_name: String,
    pub index: usize,
    /// Byte offsets of this chunk in the original document
    pub start: usize,
    pub end: usize,
    pub locator: Locator,
    /// The actual text content of this chunk
    pub text: String,
}

/// Splits documents into overlapping windows of at most `chunk_size` characters.
///
/// Every chunk after the first starts exactly `overlap` characters before the
/// previous one ends, and the last chunk ends at the end of the text. Within
/// each window the split point is pulled back to the strongest separator found
/// in the second half of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Chunker {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split a document into chunks
    pub fn chunk(&self, document: &Document) -> Vec<TextChunk> {
        self.split(&document.content)
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| TextChunk {
                chunk_id: format!("{}#{}", document.document_id, index),
                document_id: document.document_id.clone(),
                document_name: document.name.clone(),
                index,
                start,
                end,
                locator: document.locator_at(start),
                text: document.content[start..end].to_string(),
            })
            .collect()
    }

    /// Compute chunk boundaries as byte ranges of `text`
    pub fn split(&self, text: &str) -> Vec<(usize, usize)> {
        // Byte offset of every char, plus the end of the text
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let total_chars = offsets.len();
        offsets.push(text.len());

        let mut spans = Vec::new();
        let mut start = 0;
        while start < total_chars {
            let limit = (start + self.chunk_size).min(total_chars);
            let end = if limit == total_chars {
                limit
            } else {
                self.find_break(text, &offsets, start, limit)
            };

            spans.push((offsets[start], offsets[end]));
            if end == total_chars {
                break;
            }
            start = end - self.overlap;
        }

        spans
    }

    /// Pick the end (in chars) of the window starting at `start`.
    ///
    /// The result is always greater than `start + overlap`, so the next window
    /// makes progress.
    fn find_break(&self, text: &str, offsets: &[usize], start: usize, limit: usize) -> usize {
        let floor = start + (self.overlap + 1).max(self.chunk_size / 2);
        if floor >= limit {
            return limit;
        }

        let window = &text[offsets[floor]..offsets[limit]];
        for separator in SEPARATORS {
            if let Some(pos) = window.rfind(separator) {
                let byte_end = offsets[floor] + pos + separator.len();
                // Separators are ASCII, so the end always lands on a char boundary
                let char_end = offsets.partition_point(|&o| o < byte_end);
                if char_end > floor {
                    return char_end;
                }
            }
        }

        limit
    }
}

/// Rebuild the original text from chunks produced with the given overlap
pub fn reassemble(chunks: &[TextChunk], overlap: usize) -> String {
    let mut text = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            text.push_str(&chunk.text);
        } else {
            text.extend(chunk.text.chars().skip(overlap));
        }
    }
    text
}
