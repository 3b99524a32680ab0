//! Per-page OCR: one rendered page image → one positional TSV table.
//!
//! [`OcrEngine`] is the seam; [`TesseractCli`] drives the `tesseract`
//! executable in TSV mode. Tesseract treats every image it is given as
//! page 1, so the adapter writes the real page number into the `page_num`
//! column before handing the table on.

use crate::error::ItemError;
use crate::output::PageTable;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Index of the `page_num` column in a TSV row.
const PAGE_NUM_COLUMN: usize = 1;

/// Recognises the text of a single page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// `page_num` is 1-indexed; the returned table must carry it in every
    /// data row.
    async fn recognize(&self, page_num: usize, image: DynamicImage) -> Result<PageTable, ItemError>;
}

/// Runs `tesseract <image> stdout -l <lang> tsv`.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
    timeout_secs: u64,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, page_num: usize, image: DynamicImage) -> Result<PageTable, ItemError> {
        let ocr_err = |detail: String| ItemError::OcrFailed {
            page: page_num,
            detail,
        };

        // PNG encoding is CPU-bound; keep it off the runtime threads.
        let png = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile, String> {
            let tmp = tempfile::Builder::new()
                .prefix("invoice-page-")
                .suffix(".png")
                .tempfile()
                .map_err(|e| format!("tempfile: {e}"))?;
            image
                .save_with_format(tmp.path(), image::ImageFormat::Png)
                .map_err(|e| format!("PNG encoding failed: {e}"))?;
            Ok(tmp)
        })
        .await
        .map_err(|e| ocr_err(format!("encode task panicked: {e}")))?
        .map_err(ocr_err)?;

        let child = Command::new(&self.binary)
            .arg(png.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ocr_err(format!("failed to execute {}: {e}", self.binary.display())))?;

        let output = match timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ocr_err(format!("failed to wait for tesseract: {e}"))),
            Err(_) => {
                return Err(ocr_err(format!(
                    "tesseract timed out after {} seconds",
                    self.timeout_secs
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ocr_err(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8(output.stdout)
            .map_err(|e| ocr_err(format!("tesseract output is not UTF-8: {e}")))?;
        debug!("Page {}: {} bytes of TSV", page_num, tsv.len());

        Ok(PageTable::new(page_num, stamp_page_num(&tsv, page_num)))
    }
}

/// Replace the `page_num` column of every data row with `page_num`.
///
/// The header row is left untouched, as are rows too short to have the
/// column.
pub fn stamp_page_num(tsv: &str, page_num: usize) -> String {
    let page = page_num.to_string();
    tsv.split('\n')
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.is_empty() {
                return line.to_string();
            }
            let mut fields: Vec<&str> = line.split('\t').collect();
            if fields.len() > PAGE_NUM_COLUMN {
                fields[PAGE_NUM_COLUMN] = &page;
            }
            fields.join("\t")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
