//! PDF rasterisation: render every page of an invoice to a `DynamicImage`.
//!
//! The [`Rasterizer`] trait is the seam between the batch runner and the
//! rendering backend; [`PdfiumRasterizer`] is the production implementation.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! thread-local state. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so the runtime is never stalled during rendering.

use crate::error::ItemError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a document into one image per page, in page order.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, path: &Path) -> Result<Vec<DynamicImage>, ItemError>;
}

/// Renders pages through pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_pixels: u32,
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(max_pixels: u32, lib_path: Option<PathBuf>) -> Self {
        Self {
            max_pixels,
            lib_path,
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, path: &Path) -> Result<Vec<DynamicImage>, ItemError> {
        let path = path.to_path_buf();
        let max_pixels = self.max_pixels;
        let lib_path = self.lib_path.clone();

        tokio::task::spawn_blocking(move || render_blocking(&path, max_pixels, lib_path.as_deref()))
            .await
            .map_err(|e| ItemError::RasterisationFailed {
                page: 0,
                detail: format!("render task panicked: {e}"),
            })?
    }
}

/// Bind to pdfium: explicit path first, then the working directory, then the
/// system library path.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, PdfiumError> {
    let bindings = match lib_path {
        Some(p) => Pdfium::bind_to_library(p)?,
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())?,
    };
    Ok(Pdfium::new(bindings))
}

fn render_blocking(
    pdf_path: &Path,
    max_pixels: u32,
    lib_path: Option<&Path>,
) -> Result<Vec<DynamicImage>, ItemError> {
    let pdfium = bind_pdfium(lib_path).map_err(|e| ItemError::RasterisationFailed {
        page: 0,
        detail: format!("cannot bind pdfium library: {e:?}"),
    })?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| ItemError::RasterisationFailed {
            page: 0,
            detail: format!("cannot open PDF: {e:?}"),
        })?;

    let pages = document.pages();
    info!("{}: {} page(s)", pdf_path.display(), pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ItemError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}
