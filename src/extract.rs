//! Stage 1: PDF invoices → merged OCR tables.
//!
//! For every `*.pdf` in the input directory: check the magic bytes, render
//! each page, OCR each page in order, merge the page tables and write
//! `<stem>.tsv`. One document is finished before the next one starts.

use crate::batch::run_batch;
use crate::config::PipelineConfig;
use crate::error::{DigestError, ItemError};
use crate::output::{BatchReport, DocumentTable, PageTable, Stage};
use crate::pipeline::input::{
    artifact_path, ensure_output_dir, ensure_pdf, list_inputs, write_artifact, PDF_EXTENSION,
    TABLE_EXTENSION,
};
use crate::pipeline::merge::merge_pages;
use crate::pipeline::ocr::{OcrEngine, TesseractCli};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Rasteriser + OCR engine pair that turns one PDF into one table.
#[derive(Clone)]
pub struct Extractor {
    rasterizer: Arc<dyn Rasterizer>,
    ocr: Arc<dyn OcrEngine>,
}

impl Extractor {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { rasterizer, ocr }
    }

    /// pdfium rendering + tesseract OCR, as configured.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Arc::new(PdfiumRasterizer::new(
                config.max_rendered_pixels,
                config.pdfium_lib_path.clone(),
            )),
            Arc::new(TesseractCli::new(
                config.tesseract_path.clone(),
                config.ocr_language.clone(),
                config.ocr_timeout_secs,
            )),
        )
    }

    /// Render, OCR and merge every page of `pdf`.
    pub async fn extract_document(&self, pdf: &Path) -> Result<DocumentTable, ItemError> {
        ensure_pdf(pdf)?;

        let images = self.rasterizer.rasterize(pdf).await?;
        let total = images.len();

        let mut pages: Vec<PageTable> = Vec::with_capacity(total);
        for (idx, image) in images.into_iter().enumerate() {
            let page_num = idx + 1;
            let page = self.ocr.recognize(page_num, image).await?;
            debug!("Page {}/{}: {} bytes of TSV", page_num, total, page.tsv.len());
            pages.push(page);
        }

        merge_pages(pdf, &pages)
    }

    /// Extract `pdf` and write `<output_dir>/<stem>.tsv`.
    pub async fn extract_to_file(&self, pdf: &Path, output_dir: &Path) -> Result<PathBuf, ItemError> {
        let table = self.extract_document(pdf).await?;
        let output = artifact_path(output_dir, pdf, TABLE_EXTENSION);
        write_artifact(&output, table.as_str()).await?;
        Ok(output)
    }
}

/// Run stage 1 over every PDF in `input_dir`.
///
/// # Errors
/// Only batch-level failures: unreadable input directory or uncreatable
/// output directory. Per-document failures are recorded in the report.
pub async fn extract_all(
    input_dir: &Path,
    output_dir: &Path,
    extractor: &Extractor,
    config: &PipelineConfig,
) -> Result<BatchReport, DigestError> {
    info!("Input directory: {}", input_dir.display());
    info!("Output directory: {}", output_dir.display());

    let inputs = list_inputs(input_dir, PDF_EXTENSION)?;
    if inputs.is_empty() {
        info!("No PDF files found in {}", input_dir.display());
        return Ok(BatchReport::empty(Stage::Extract));
    }
    ensure_output_dir(output_dir)?;
    info!("Found {} PDF file(s) to process.", inputs.len());

    Ok(run_batch(
        Stage::Extract,
        inputs,
        config.progress_callback.as_ref(),
        None,
        |pdf| async move { extractor.extract_to_file(&pdf, output_dir).await },
    )
    .await)
}
