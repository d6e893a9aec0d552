use bytes::Bytes;
use lopdf::Document as PdfDocument;

use common::error::AppError;

/// Number of pages in the PDF, read from the page table.
///
/// Parsing runs on the blocking pool; PDFs can be large and lopdf is
/// CPU-bound.
pub async fn count_pages(bytes: Bytes) -> Result<u32, AppError> {
    let pages = tokio::task::spawn_blocking(move || -> Result<u32, AppError> {
        let document = PdfDocument::load_mem(&bytes)
            .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;
        Ok(document.get_pages().len() as u32)
    })
    .await??;

    Ok(pages)
}

/// Text layer of each page, in page order.
///
/// Documents without a usable text layer (scans, exotic encodings) fail
/// here and surface as a processing error on the document.
pub async fn extract_page_texts(bytes: Bytes) -> Result<Vec<String>, AppError> {
    let pages = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))
    })
    .await??;

    Ok(pages)
}
