//! Document loader: stored file → ordered text segments.
//!
//! The loader picks a reader by file extension:
//!
//! | Extension | Reader | Segments |
//! |-----------|--------|----------|
//! | `.txt`, `.md`, `.markdown` | UTF-8 text | one |
//! | `.pdf` | `pdf-extract` | one per page (split on form feed) |
//! | `.docx` | `word/document.xml` via `zip` + `quick-xml` | one per paragraph |
//!
//! Anything else is [`KbError::UnsupportedFormat`]; unreadable or malformed
//! files are [`KbError::LoadError`]. Extraction never panics.

use std::io::Read;
use std::path::Path;

use crate::error::{KbError, KbResult};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
    Docx,
}

impl DocumentKind {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> KbResult<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" | "markdown" => Ok(DocumentKind::Text),
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "" => Err(KbError::UnsupportedFormat(format!(
                "{} has no file extension",
                path.display()
            ))),
            other => Err(KbError::UnsupportedFormat(format!(".{}", other))),
        }
    }
}

/// Read a stored document and return its text segments in order.
pub fn load_document(path: &Path) -> KbResult<Vec<String>> {
    let kind = DocumentKind::from_path(path)?;
    let display = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| KbError::load(&display, e))?;

    match kind {
        DocumentKind::Text => {
            let text = String::from_utf8(bytes)
                .map_err(|_| KbError::load(&display, "file is not valid UTF-8"))?;
            Ok(vec![text])
        }
        DocumentKind::Pdf => extract_pdf(&bytes).map_err(|e| KbError::load(&display, e)),
        DocumentKind::Docx => extract_docx(&bytes).map_err(|e| KbError::load(&display, e)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, String> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())?;
    Ok(text
        .split('\u{000C}')
        .filter(|page| !page.trim().is_empty())
        .map(|page| page.to_string())
        .collect())
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<String>, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&xml)
}

/// Collect the `<w:t>` runs of each `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, String> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}
