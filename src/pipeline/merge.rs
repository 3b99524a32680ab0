//! Multi-page merge: N page tables → one document table with one header.
//!
//! Pages keep their own `page_num` values and their order; nothing is
//! renumbered or re-sorted. All pages are assumed to share the first page's
//! column schema. A page whose header differs is logged and merged anyway:
//! there is no reconciliation policy for divergent schemas.

use crate::error::ItemError;
use crate::output::{DocumentTable, PageTable};
use std::path::Path;
use tracing::warn;

/// Merge the per-page tables of `source` in the order given.
///
/// # Errors
/// [`ItemError::EmptyDocument`] when there are no pages, or when the first
/// page has no header line to keep.
pub fn merge_pages(source: &Path, pages: &[PageTable]) -> Result<DocumentTable, ItemError> {
    let Some(first) = pages.first() else {
        return Err(ItemError::EmptyDocument {
            path: source.to_path_buf(),
            detail: "document has no pages".into(),
        });
    };
    let Some(header) = first.header() else {
        return Err(ItemError::EmptyDocument {
            path: source.to_path_buf(),
            detail: format!("page {} returned no table header", first.page_num),
        });
    };

    let mut lines: Vec<&str> = vec![header];
    lines.extend(first.data_lines());

    for page in &pages[1..] {
        if let Some(other) = page.header() {
            if other != header {
                warn!(
                    "{}: page {} header differs from page {}; merging as-is",
                    source.display(),
                    page.page_num,
                    first.page_num
                );
            }
        }
        lines.extend(page.data_lines());
    }

    Ok(DocumentTable::from_lines(lines))
}
