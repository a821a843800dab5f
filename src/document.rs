use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// File formats the loader knows how to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Look up a format by extension, with or without the leading dot
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "txt" => Some(DocumentFormat::Txt),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => ".pdf",
            DocumentFormat::Docx => ".docx",
            DocumentFormat::Txt => ".txt",
        }
    }

    /// Extract the text of a file in this format
    pub fn extract(&self, path: &Path) -> Result<Extracted> {
        match self {
            DocumentFormat::Pdf => extract_pdf(path),
            DocumentFormat::Docx => extract_docx(path),
            DocumentFormat::Txt => extract_txt(path),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where a piece of text came from inside its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locator {
    /// 1-based PDF page
    Page(u32),
    /// 1-based DOCX paragraph
    Paragraph(u32),
    /// Plain text files have no finer structure
    Whole,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Page(n) => write!(f, "page {}", n),
            Locator::Paragraph(n) => write!(f, "paragraph {}", n),
            Locator::Whole => f.write_str("full text"),
        }
    }
}

impl std::str::FromStr for Locator {
    type Err = String;

    /// Inverse of `Display`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse_number = |n: &str| n.trim().parse::<u32>().map_err(|e| e.to_string());
        if s == "full text" {
            Ok(Locator::Whole)
        } else if let Some(n) = s.strip_prefix("page ") {
            parse_number(n).map(Locator::Page)
        } else if let Some(n) = s.strip_prefix("paragraph ") {
            parse_number(n).map(Locator::Paragraph)
        } else {
            Err(format!("unknown locator '{}'", s))
        }
    }
}

/// A unit of extracted text and its byte offset in the document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub locator: Locator,
    pub offset: usize,
}

/// Raw result of a format extractor
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub segments: Vec<Segment>,
}

/// Represents a document with its content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// Source path as given, used as the document ID
    pub document_id: String,
    /// The document's file name
    pub name: String,
    pub format: DocumentFormat,
    /// The document's MIME type
    pub mime_type: String,
    /// The extracted text content of the document
    pub content: String,
    /// Page or paragraph offsets into `content`, ascending
    pub segments: Vec<Segment>,
    pub size_bytes: u64,
}

impl Document {
    /// Load a document from a file path.
    ///
    /// The extension must belong to `supported`; the file is only read after
    /// that check passes.
    pub fn from_file<P: AsRef<Path>>(file_path: P, supported: &[DocumentFormat]) -> Result<Self> {
        let path = file_path.as_ref();
        let format = resolve_format(path, supported)?;
        let size_bytes = fs::metadata(path)
            .map_err(|e| RagError::extraction(path, e))?
            .len();
        Self::load(path, format, size_bytes)
    }

    /// Extract a document whose format and size were already checked
    pub fn load(path: &Path, format: DocumentFormat, size_bytes: u64) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        // Detect MIME type
        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let Extracted { text, segments } = format.extract(path)?;
        if text.trim().is_empty() {
            return Err(RagError::extraction(path, "no extractable text"));
        }

        info!(
            "Loaded {} ({}, {} chars, {} segments)",
            name,
            format,
            text.chars().count(),
            segments.len()
        );

        Ok(Document {
            document_id: path.display().to_string(),
            name,
            format,
            mime_type,
            content: text,
            segments,
            size_bytes,
        })
    }

    /// The locator of the segment containing the given byte offset
    pub fn locator_at(&self, offset: usize) -> Locator {
        let idx = self.segments.partition_point(|s| s.offset <= offset);
        if idx == 0 {
            self.segments
                .first()
                .map(|s| s.locator)
                .unwrap_or(Locator::Whole)
        } else {
            self.segments[idx - 1].locator
        }
    }
}

/// Pick the extractor for a path, rejecting extensions outside `supported`
pub fn resolve_format(path: &Path, supported: &[DocumentFormat]) -> Result<DocumentFormat> {
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    match DocumentFormat::from_extension(&extension) {
        Some(format) if supported.contains(&format) => Ok(format),
        _ => Err(RagError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        }),
    }
}

/// Reject files over the upload limit before any parsing happens
pub fn check_upload(path: &Path, max_bytes: u64) -> Result<u64> {
    let size = fs::metadata(path)
        .map_err(|e| RagError::extraction(path, e))?
        .len();
    if size > max_bytes {
        return Err(RagError::FileTooLarge {
            path: path.to_path_buf(),
            size_mb: size as f64 / (1024.0 * 1024.0),
            limit_mb: max_bytes / (1024 * 1024),
        });
    }
    Ok(size)
}

fn extract_pdf(path: &Path) -> Result<Extracted> {
    info!("Processing PDF document: {}", path.display());

    // pdf-extract panics on some malformed files instead of returning an error
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path))
        .map_err(|_| RagError::extraction(path, "PDF parser aborted on malformed input"))?
        .map_err(|e| RagError::extraction(path, e))?;

    let mut text = String::new();
    let mut segments = Vec::with_capacity(pages.len());
    for (idx, page) in pages.iter().enumerate() {
        // PDF extraction can sometimes include excessive whitespace
        let cleaned = normalize_whitespace(page);
        if cleaned.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        segments.push(Segment {
            locator: Locator::Page(idx as u32 + 1),
            offset: text.len(),
        });
        text.push_str(&cleaned);
    }

    if text.is_empty() {
        warn!("Extracted PDF content is empty or contains only whitespace");
    }

    Ok(Extracted { text, segments })
}

fn extract_docx(path: &Path) -> Result<Extracted> {
    info!("Processing DOCX document: {}", path.display());

    let bytes = fs::read(path).map_err(|e| RagError::extraction(path, e))?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| RagError::extraction(path, e))?;

    let mut text = String::new();
    let mut segments = Vec::new();
    let mut paragraph_number = 0u32;

    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            paragraph_number += 1;

            let mut paragraph_text = String::new();
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            paragraph_text.push_str(&t.text);
                        }
                    }
                }
            }

            let paragraph_text = paragraph_text.trim();
            if paragraph_text.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            segments.push(Segment {
                locator: Locator::Paragraph(paragraph_number),
                offset: text.len(),
            });
            text.push_str(paragraph_text);
        }
    }

    Ok(Extracted { text, segments })
}

fn extract_txt(path: &Path) -> Result<Extracted> {
    info!("Processing text document: {}", path.display());

    let bytes = fs::read(path).map_err(|e| RagError::extraction(path, e))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RagError::extraction(path, format!("not valid UTF-8: {}", e)))?;

    Ok(Extracted {
        text,
        segments: vec![Segment {
            locator: Locator::Whole,
            offset: 0,
        }],
    })
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // At most two newlines (paragraph break)
                normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ALL: [DocumentFormat; 3] = [
        DocumentFormat::Pdf,
        DocumentFormat::Docx,
        DocumentFormat::Txt,
    ];

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_locator_round_trips_through_display() {
        for locator in [Locator::Page(7), Locator::Paragraph(12), Locator::Whole] {
            assert_eq!(locator.to_string().parse::<Locator>(), Ok(locator));
        }
        assert!("chapter 2".parse::<Locator>().is_err());
    }

    #[test]
    fn test_format_lookup() {
        assert_eq!(DocumentFormat::from_extension(".PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("docx"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_extension(".xyz"), None);
    }

    #[test]
    fn test_load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "First paragraph.\n\nSecond paragraph.").unwrap();

        let doc = Document::from_file(&path, &ALL).unwrap();
        assert_eq!(doc.name, "notes.txt");
        assert_eq!(doc.format, DocumentFormat::Txt);
        assert_eq!(doc.mime_type, "text/plain");
        assert_eq!(doc.content, "First paragraph.\n\nSecond paragraph.");
        assert_eq!(doc.locator_at(20), Locator::Whole);
    }

    #[test]
    fn test_load_uses_checked_format_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Heading").unwrap();

        let doc = Document::load(&path, DocumentFormat::Txt, 9).unwrap();
        assert_eq!(doc.format, DocumentFormat::Txt);
        assert_eq!(doc.size_bytes, 9);
        assert_eq!(doc.content, "# Heading");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.xyz");
        fs::write(&path, "whatever").unwrap();

        let err = Document::from_file(&path, &ALL).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat { ref extension, .. } if extension == ".xyz"));
    }

    #[test]
    fn test_format_outside_configured_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        fs::write(&path, "%PDF-1.4").unwrap();

        let err = Document::from_file(&path, &[DocumentFormat::Txt]).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_corrupt_docx_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, b"this is not a zip archive").unwrap();

        let err = Document::from_file(&path, &ALL).unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[test]
    fn test_non_pdf_bytes_are_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        fs::write(&path, b"plain text wearing a pdf extension").unwrap();

        let err = Document::from_file(&path, &ALL).unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[test]
    fn test_pdf_with_broken_trailer_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.pdf");
        fs::write(
            &path,
            b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\ntrailer\n<< /Root 9 0 R\n%%EOF",
        )
        .unwrap();

        let err = Document::from_file(&path, &ALL).unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.txt");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let err = Document::from_file(&path, &ALL).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn test_docx_paragraph_segments() {
        use docx_rs::{Docx, Paragraph, Run};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        let file = fs::File::create(&path).unwrap();
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Quarterly memo")))
            .add_paragraph(Paragraph::new())
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Revenue grew.")))
            .build()
            .pack(file)
            .unwrap();

        let doc = Document::from_file(&path, &ALL).unwrap();
        assert_eq!(doc.content, "Quarterly memo\n\nRevenue grew.");
        assert_eq!(
            doc.segments,
            vec![
                Segment { locator: Locator::Paragraph(1), offset: 0 },
                Segment { locator: Locator::Paragraph(3), offset: 16 },
            ]
        );
        assert_eq!(doc.locator_at(18), Locator::Paragraph(3));
    }

    #[test]
    fn test_upload_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![b'a'; 2048]).unwrap();

        assert_eq!(check_upload(&path, 4096).unwrap(), 2048);
        let err = check_upload(&path, 1024).unwrap_err();
        assert!(matches!(err, RagError::FileTooLarge { .. }));
    }
}
