use std::{
    io::{Cursor, Read},
    panic,
    time::Duration,
};

use quick_xml::{Reader, events::Event};

use crate::document::extension_of;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("no text extractor for .{0} files")]
    Unsupported(String),

    #[error("text extraction failed: {0}")]
    Failed(String),

    #[error("text extraction timed out after {0:?}")]
    Timeout(Duration),
}

/// Converts raw file bytes into plain text.
///
/// Failures are per-document: callers skip the document and carry on.
pub trait TextExtractor: Send + Sync {
    fn extract(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<String, ExtractError>;
}

const PLAIN_TEXT_EXTENSIONS: &[&str] =
    &["txt", "md", "markdown", "csv", "json", "log"];

/// Main body part of a Word document package.
const DOCX_BODY: &str = "word/document.xml";

/// Extractor for the file types the engine reads natively.
///
/// Text formats are decoded as UTF-8 (lossily), PDFs go through
/// `pdf-extract` and DOCX bodies are read from the package XML. Other
/// types are reported as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextExtractor;

impl TextExtractor for FileTextExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<String, ExtractError> {
        let ext = extension_of(file_name);

        if PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str()) {
            let text = String::from_utf8_lossy(bytes);
            return Ok(text.trim_start_matches('\u{feff}').to_string());
        }

        match ext.as_str() {
            "pdf" => extract_pdf(bytes),
            "docx" => extract_docx(bytes),
            _ => Err(ExtractError::Unsupported(ext)),
        }
    }
}

fn failed(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Failed(e.to_string())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs.
    match panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(failed(e)),
        Err(_) => Err(ExtractError::Failed("malformed PDF".to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(failed)?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(failed)?
        .read_to_string(&mut xml)
        .map_err(failed)?;
    docx_xml_to_text(&xml)
}

/// Flatten WordprocessingML into text: one line per paragraph, `w:tab` as
/// a tab and `w:br`/`w:cr` as line breaks. Only `w:t` runs carry text.
fn docx_xml_to_text(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event().map_err(failed)? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => {
                in_run_text = true;
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => {
                text.push_str(&t.unescape().map_err(failed)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text.trim_end().to_string())
}
