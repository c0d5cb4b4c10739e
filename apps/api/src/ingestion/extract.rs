//! Text extraction from uploaded CV files.
//!
//! Unsupported or unreadable documents yield an empty string, which the pipeline
//! treats as "nothing to analyze". Only I/O failures on the file itself are errors.
//! Parsing is CPU-bound and runs inside `tokio::task::spawn_blocking`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Pptx,
    PlainText,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "pptx" => Some(DocumentKind::Pptx),
            "txt" | "md" => Some(DocumentKind::PlainText),
            _ => None,
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Extracts text based on the file extension.
pub struct FileTextExtractor;

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            anyhow::bail!("Uploaded file {} does not exist", path.display());
        }

        let Some(kind) = DocumentKind::from_path(path) else {
            warn!("Unsupported document type: {}", path.display());
            return Ok(String::new());
        };

        let owned: PathBuf = path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || extract_blocking(kind, &owned)).await;

        let text = match outcome {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("Could not read {:?} document {}: {e:#}", kind, path.display());
                String::new()
            }
            // pdf-extract may panic on malformed input.
            Err(e) => {
                warn!("Text extraction aborted for {}: {e}", path.display());
                String::new()
            }
        };

        debug!("Extracted {} chars from {}", text.chars().count(), path.display());
        Ok(text.trim().to_string())
    }
}

fn extract_blocking(kind: DocumentKind, path: &Path) -> Result<String> {
    match kind {
        DocumentKind::Pdf => {
            pdf_extract::extract_text(path).map_err(|e| anyhow::anyhow!("PDF parse failed: {e}"))
        }
        DocumentKind::Docx => {
            let mut archive = open_archive(path)?;
            let xml = read_entry(&mut archive, "word/document.xml")?;
            Ok(ooxml_text(&xml))
        }
        DocumentKind::Pptx => {
            let mut archive = open_archive(path)?;
            let mut slides: Vec<(u32, String)> = archive
                .file_names()
                .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
                .collect();
            slides.sort();

            let mut parts = Vec::with_capacity(slides.len());
            for (_, name) in slides {
                parts.push(ooxml_text(&read_entry(&mut archive, &name)?));
            }
            Ok(parts.join("\n\n"))
        }
        DocumentKind::PlainText => {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    zip::ZipArchive::new(file).context("Not a valid OOXML (zip) container")
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Missing archive entry {name}"))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .with_context(|| format!("Archive entry {name} is not UTF-8 XML"))?;
    Ok(xml)
}

/// `ppt/slides/slide12.xml` -> 12
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<(?:w|a):t(?:\s[^>]*)?>([^<]*)</(?:w|a):t>|</(?:w|a):p>|<w:tab/>|<(?:w|a):br/>")
            .unwrap_or_else(|e| panic!("invalid OOXML run pattern: {e}"))
    })
}

/// Collects text runs from WordprocessingML / DrawingML, one line per paragraph.
fn ooxml_text(xml: &str) -> String {
    let mut out = String::new();
    for caps in run_pattern().captures_iter(xml) {
        match caps.get(1) {
            Some(run) => out.push_str(&unescape_xml(run.as_str())),
            None if caps[0].contains("tab") => out.push('\t'),
            None => out.push('\n'),
        }
    }
    out
}

fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_document_kind_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("cv.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("cv.docx")), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_path(Path::new("deck.pptx")), Some(DocumentKind::Pptx));
        assert_eq!(DocumentKind::from_path(Path::new("cv.odt")), None);
        assert_eq!(DocumentKind::from_path(Path::new("cv")), None);
    }

    #[test]
    fn test_ooxml_text_paragraphs_and_entities() {
        let xml = r#"<w:body><w:p><w:r><w:t>Jane Doe</w:t></w:r></w:p><w:p><w:r><w:t xml:space="preserve">R&amp;D </w:t></w:r><w:r><w:tab/><w:t>Acme</w:t></w:r></w:p></w:body>"#;
        assert_eq!(ooxml_text(xml), "Jane Doe\nR&D \tAcme\n");
    }

    #[test]
    fn test_unescape_numeric_entities() {
        assert_eq!(unescape_xml("caf&#233; &#x41;"), "café A");
        assert_eq!(unescape_xml("a &unknown; b"), "a &unknown; b");
        assert_eq!(unescape_xml("dangling &amp"), "dangling &amp");
    }

    #[test]
    fn test_slide_number() {
        assert_eq!(slide_number("ppt/slides/slide12.xml"), Some(12));
        assert_eq!(slide_number("ppt/slides/_rels/slide1.xml.rels"), None);
    }

    #[tokio::test]
    async fn test_plain_text_file_extracted() {
        let mut file = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile()
            .unwrap_or_else(|e| panic!("{e}"));
        writeln!(file, "  Jane Doe\nData engineer  ").unwrap_or_else(|e| panic!("{e}"));
        let text = FileTextExtractor
            .extract_text(file.path())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(text, "Jane Doe\nData engineer");
    }

    #[tokio::test]
    async fn test_unsupported_extension_yields_empty_text() {
        let file = tempfile::Builder::new()
            .suffix(".odt")
            .tempfile()
            .unwrap_or_else(|e| panic!("{e}"));
        let text = FileTextExtractor
            .extract_text(file.path())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_docx_yields_empty_text() {
        let mut file = tempfile::Builder::new()
            .suffix(".docx")
            .tempfile()
            .unwrap_or_else(|e| panic!("{e}"));
        file.write_all(b"not a zip").unwrap_or_else(|e| panic!("{e}"));
        let text = FileTextExtractor
            .extract_text(file.path())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_docx_archive_extracted() {
        let file = tempfile::Builder::new()
            .suffix(".docx")
            .tempfile()
            .unwrap_or_else(|e| panic!("{e}"));
        {
            let mut zip = zip::ZipWriter::new(file.reopen().unwrap_or_else(|e| panic!("{e}")));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap_or_else(|e| panic!("{e}"));
            zip.write_all(b"<w:p><w:r><w:t>Acme Corp</w:t></w:r></w:p>")
                .unwrap_or_else(|e| panic!("{e}"));
            zip.finish().unwrap_or_else(|e| panic!("{e}"));
        }
        let text = FileTextExtractor
            .extract_text(file.path())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(text, "Acme Corp");
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let result = FileTextExtractor
            .extract_text(Path::new("/nonexistent/cv.pdf"))
            .await;
        assert!(result.is_err());
    }
}
