use std::path::Path;

use common::error::AppError;
use lopdf::Document;
use tracing::debug;

const TEXT_LAYER_MIN_LEN: usize = 150;
const TEXT_LAYER_MIN_ASCII_RATIO: f64 = 0.7;

/// A document reduced to its ordered page texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub pages: Vec<String>,
}

impl ExtractedDocument {
    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    /// The full document text the chunker operates on.
    pub fn text(&self) -> String {
        self.pages.join("\n\n")
    }
}

/// Extracts page texts from a source file. PDFs go through `lopdf` page by
/// page with a whole-document `pdf-extract` fallback; plain-text formats are
/// read directly as a single page.
pub async fn extract_document(path: &Path) -> Result<ExtractedDocument, AppError> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => extract_pdf(path).await,
        "txt" | "md" | "markdown" | "text" => {
            let content = tokio::fs::read_to_string(path).await?;
            Ok(ExtractedDocument {
                pages: vec![content],
            })
        }
        "" => Err(AppError::Validation(format!(
            "cannot determine document type of {} (missing extension)",
            path.display()
        ))),
        other => Err(AppError::Validation(format!(
            "unsupported document type '{other}' for {}",
            path.display()
        ))),
    }
}

async fn extract_pdf(path: &Path) -> Result<ExtractedDocument, AppError> {
    let pdf_bytes = tokio::fs::read(path).await?;
    tokio::task::spawn_blocking(move || extract_pdf_pages(&pdf_bytes)).await?
}

/// Walks the PDF page by page through the text layer. When the result looks
/// like extraction noise rather than prose, retries the whole document with
/// `pdf-extract` before giving up.
fn extract_pdf_pages(pdf_bytes: &[u8]) -> Result<ExtractedDocument, AppError> {
    let document = Document::load_mem(pdf_bytes)
        .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();

    if page_numbers.is_empty() {
        return Err(AppError::Processing("PDF appears to have no pages".into()));
    }

    let pages: Vec<String> = page_numbers
        .iter()
        .map(|page| {
            document
                .extract_text(&[*page])
                .map(|text| text.trim().to_string())
                .unwrap_or_default()
        })
        .collect();

    let combined = pages.join("\n\n");
    if looks_good_enough(&combined) {
        debug!(pages = pages.len(), "Extracted PDF text layer per page");
        return Ok(ExtractedDocument { pages });
    }

    let fallback = pdf_extract::extract_text_from_mem(pdf_bytes)
        .map(|text| text.trim().to_string())
        .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))?;

    if !looks_good_enough(&fallback) {
        return Err(AppError::Processing(
            "PDF has no usable text layer".into(),
        ));
    }

    debug!(
        chars = fallback.len(),
        "Extracted PDF text via whole-document fallback"
    );
    Ok(ExtractedDocument {
        pages: vec![fallback],
    })
}

/// Heuristic that determines whether extracted text looks like well-formed prose.
fn looks_good_enough(text: &str) -> bool {
    if text.len() < TEXT_LAYER_MIN_LEN {
        return false;
    }

    let total_chars = text.chars().count() as f64;
    if total_chars == 0.0 {
        return false;
    }

    let ascii_chars = text.chars().filter(|c| c.is_ascii()).count() as f64;
    let ascii_ratio = ascii_chars / total_chars;
    if ascii_ratio < TEXT_LAYER_MIN_ASCII_RATIO {
        return false;
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count() as f64;
    let letter_ratio = letters / total_chars;
    letter_ratio > 0.3
}
