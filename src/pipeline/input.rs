//! Input discovery and artifact paths.
//!
//! Every stage reads a flat directory and writes a flat directory. Inputs are
//! listed in lexicographic order so that two runs over the same directory
//! touch documents in the same sequence, and each artifact lands at a path
//! derived only from the input's stem, so re-runs overwrite instead of
//! piling up copies.

use crate::error::{DigestError, ItemError};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source documents for stage 1.
pub const PDF_EXTENSION: &str = "pdf";
/// Stage 1 artifacts, stage 2 inputs.
pub const TABLE_EXTENSION: &str = "tsv";
/// Stage 2 artifacts.
pub const DIGEST_EXTENSION: &str = "json";

/// List regular files in `dir` whose extension matches `extension`
/// (case-insensitive), sorted by file name.
pub fn list_inputs(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, DigestError> {
    let entries = std::fs::read_dir(dir).map_err(|e| DigestError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && has_extension(p, extension))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    debug!("Found {} '.{}' file(s) in {}", files.len(), extension, dir.display());
    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// `<output_dir>/<input stem>.<extension>`.
pub fn artifact_path(output_dir: &Path, input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    output_dir.join(format!("{stem}.{extension}"))
}

/// File name for log lines and failure records.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Create `dir` (and parents) if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), DigestError> {
    std::fs::create_dir_all(dir).map_err(|e| DigestError::OutputDirFailed {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Check the `%PDF` magic bytes so a mislabelled file fails with a clear
/// error instead of an opaque pdfium one.
pub fn ensure_pdf(path: &Path) -> Result<(), ItemError> {
    let file = std::fs::File::open(path).map_err(|e| ItemError::ReadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut head = Vec::with_capacity(4);
    file.take(4)
        .read_to_end(&mut head)
        .map_err(|e| ItemError::ReadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    if head != b"%PDF" {
        let mut magic = [0u8; 4];
        magic[..head.len()].copy_from_slice(&head);
        return Err(ItemError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Write an artifact atomically: temp file in the same directory, then rename.
///
/// An interrupted run leaves either the previous artifact or the new one,
/// never a truncated file.
pub async fn write_artifact(path: &Path, contents: &str) -> Result<(), ItemError> {
    let write_err = |e: std::io::Error| ItemError::WriteFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}
