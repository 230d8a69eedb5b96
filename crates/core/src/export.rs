//! Flattened PDF export.
//!
//! Every export decodes the original bytes from scratch, stamps one transparent PNG per annotated
//! page over that page's full MediaBox, and serializes the result. Nothing is written anywhere;
//! callers persist the returned bytes.

use crate::raster::RasterSnapshot;
use crate::surface::{SurfaceController, SurfaceGeometry};
use doc_model::{AnnotationSnapshot, Stroke, ToolSettings};
use pdf_engine::{LopdfCodec, PageBox, PdfCodec, PdfEngineError, PlacementRect};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfEngineError),
    #[error("failed to encode annotation raster: {0}")]
    Raster(#[from] image::ImageError),
    #[error("annotation raster for page {0} is empty")]
    EmptyRaster(u32),
    #[error("document has no pages")]
    EmptyDocument,
}

/// Geometry the annotation surfaces were drawn at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Logical width of every page surface, in pixels.
    pub render_width_px: u32,
    pub dpr: f32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { render_width_px: 800, dpr: 1.0 }
    }
}

impl ExportOptions {
    /// Surface geometry for a page, matching the layout strokes were captured in.
    pub fn page_geometry(&self, page: PageBox) -> SurfaceGeometry {
        let width = self.render_width_px as f32;
        let height = page.size().height_for_width(width).round();
        SurfaceGeometry::new(width, height, self.dpr)
    }
}

/// Rebuilds a page's annotation raster from its committed strokes.
pub fn page_overlay(strokes: &[Stroke], page: PageBox, options: &ExportOptions) -> RasterSnapshot {
    let geometry = options.page_geometry(page);
    let mut controller = SurfaceController::new(geometry, ToolSettings::default());
    controller.replace_strokes(strokes.to_vec());
    controller.export_raster()
}

/// Exports `source` with the annotations in `snapshot` flattened into their pages.
///
/// Pages without strokes keep their objects and content untouched. Any failure aborts the whole
/// export.
pub fn export_pdf<C: PdfCodec>(
    source: &[u8],
    snapshot: &AnnotationSnapshot,
    options: &ExportOptions,
) -> Result<Vec<u8>, ExportError> {
    let mut codec = C::decode(source)?;
    let page_numbers = codec.page_numbers();
    if page_numbers.is_empty() {
        return Err(ExportError::EmptyDocument);
    }

    let mut stamped = 0;
    for (page_number, strokes) in snapshot.pages_with_strokes() {
        if !page_numbers.contains(&page_number) {
            log::warn!(
                "skipping {} strokes for page {page_number}: document has {} pages",
                strokes.len(),
                page_numbers.len()
            );
            continue;
        }

        let page_box = codec.page_box(page_number)?;
        let overlay = page_overlay(strokes, page_box, options);
        if overlay.is_empty() {
            return Err(ExportError::EmptyRaster(page_number));
        }

        let png = overlay.encode_png()?;
        let image = codec.embed_png(&png)?;
        codec.draw_image(page_number, image, PlacementRect::full_page(page_box))?;

        log::debug!(
            "flattened {} strokes into page {page_number} ({}x{} px)",
            strokes.len(),
            overlay.width(),
            overlay.height()
        );
        stamped += 1;
    }

    let bytes = codec.encode()?;
    log::info!("exported PDF with {stamped} annotated pages ({} bytes)", bytes.len());
    Ok(bytes)
}

/// [`export_pdf`] with the lopdf codec.
pub fn export_pdf_default(
    source: &[u8],
    snapshot: &AnnotationSnapshot,
    options: &ExportOptions,
) -> Result<Vec<u8>, ExportError> {
    export_pdf::<LopdfCodec>(source, snapshot, options)
}
