//! Data produced by the two pipeline stages.
//!
//! Stage 1 produces a [`DocumentTable`] per invoice (merged from one
//! [`PageTable`] per page); stage 2 produces a [`Digest`]. Both batch runners
//! summarise their work in a [`BatchReport`].

use crate::error::ItemError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Column header of every OCR table, tab separated.
pub const TSV_HEADER: &str =
    "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

/// OCR output for one page: a header line followed by one line per
/// recognised element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    /// 1-indexed page number within the source document.
    pub page_num: usize,
    /// Raw tab-separated text as produced by the OCR engine.
    pub tsv: String,
}

impl PageTable {
    pub fn new(page_num: usize, tsv: impl Into<String>) -> Self {
        Self {
            page_num,
            tsv: tsv.into(),
        }
    }

    /// Header line, or `None` for an empty block.
    pub fn header(&self) -> Option<&str> {
        self.lines().next()
    }

    /// Every line after the header.
    pub fn data_lines(&self) -> impl Iterator<Item = &str> {
        self.lines().skip(1)
    }

    fn lines(&self) -> impl Iterator<Item = &str> {
        let body = self.tsv.trim_end_matches(['\n', '\r']);
        body.split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .filter(move |_| !body.is_empty())
    }
}

/// All pages of one document merged into a single table with one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTable(String);

impl DocumentTable {
    pub(crate) fn from_lines(lines: Vec<&str>) -> Self {
        Self(lines.join("\n"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Number of data rows (header excluded).
    pub fn row_count(&self) -> usize {
        self.0.split('\n').count().saturating_sub(1)
    }
}

impl fmt::Display for DocumentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One billed line of an invoice.
///
/// `quantity * unit_price == total_price` is not checked: the numbers are
/// whatever the model read off the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
}

/// The structured record extracted from one invoice.
///
/// Field order here is the field order of the written JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub invoice_number: String,
    pub invoice_date: String,
    pub due_date: String,
    pub total_amount: f64,
    pub line_items: Vec<LineItem>,
}

/// Which half of the pipeline a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// PDF → OCR table.
    Extract,
    /// OCR table → digest.
    Synthesize,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Extract => "Extraction",
            Stage::Synthesize => "Synthesis",
        }
    }
}

/// One input that did not produce an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub input: PathBuf,
    pub error: ItemError,
}

/// Outcome of running one stage over a directory.
///
/// `outputs.len()` can be lower than `attempted`: check `failures` instead of
/// assuming one artifact per input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub stage: Stage,
    pub attempted: usize,
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<ItemFailure>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            attempted: 0,
            outputs: Vec::new(),
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}
