use image::{ImageBuffer, Rgba};
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub mod codec;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use codec::{ImageHandle, LopdfCodec, PdfCodec, PlacementRect};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Height-to-width ratio assumed for a page whose real size is not known yet.
pub const FALLBACK_PAGE_RATIO: f32 = 1.414;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// Height of the page when laid out `width_px` wide.
    pub fn height_for_width(&self, width_px: f32) -> f32 {
        if self.width_pt <= 0.0 || self.height_pt <= 0.0 {
            return width_px * FALLBACK_PAGE_RATIO;
        }

        width_px * self.height_pt / self.width_pt
    }
}

/// The page's MediaBox in PDF user space, plus its `/Rotate` in clockwise degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub origin_x_pt: f32,
    pub origin_y_pt: f32,
    pub width_pt: f32,
    pub height_pt: f32,
    /// One of 0, 90, 180 or 270.
    pub rotation: u16,
}

impl PageBox {
    pub fn letter() -> Self {
        Self { origin_x_pt: 0.0, origin_y_pt: 0.0, width_pt: 612.0, height_pt: 792.0, rotation: 0 }
    }

    /// Size of the page as displayed, after rotation.
    pub fn size(&self) -> PageSize {
        if self.is_quarter_turned() {
            PageSize { width_pt: self.height_pt, height_pt: self.width_pt }
        } else {
            PageSize { width_pt: self.width_pt, height_pt: self.height_pt }
        }
    }

    pub fn is_quarter_turned(&self) -> bool {
        self.rotation % 180 == 90
    }
}

/// Folds any `/Rotate` value onto 0, 90, 180 or 270. Values off the quarter-turn grid count as 0.
pub fn normalize_rotation(degrees: i64) -> u16 {
    match degrees.rem_euclid(360) {
        90 => 90,
        180 => 180,
        270 => 270,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    /// 1-based page number.
    pub page_number: u32,
    pub target_width_px: u32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_number: 1, target_width_px: 800 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl OpenSource {
    pub fn into_bytes(self) -> Result<Vec<u8>, PdfEngineError> {
        match self {
            Self::Path(path) => Ok(fs::read(path)?),
            Self::Bytes(bytes) => Ok(bytes),
        }
    }
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Rasterizes PDF pages for display and snapshot capture.
pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_number: u32,
    ) -> Result<PageSize, PdfEngineError>;
    /// Renders one page `target_width_px` wide, keeping the page's aspect ratio.
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

pub(crate) fn reject_encrypted(bytes: &[u8]) -> Result<(), PdfEngineError> {
    if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
        return Err(PdfEngineError::EncryptedUnsupported);
    }

    Ok(())
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    #[cfg_attr(not(feature = "pdfium"), allow(dead_code))]
    bytes: Vec<u8>,
    page_sizes: Vec<PageSize>,
}

/// Default engine: reads page geometry with lopdf and paints blank pages of the right size.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
        reject_encrypted(bytes)?;

        let doc = Document::load_mem(bytes)?;
        let sizes: Vec<PageSize> = doc
            .get_pages()
            .into_values()
            .map(|object_id| codec::page_box(&doc, object_id).size())
            .collect();

        if sizes.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(sizes)
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = source.into_bytes()?;
        let page_sizes = Self::parse_sizes(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, DocumentRecord { bytes, page_sizes });

        log::debug!("opened document {} with lopdf backend", handle.raw());
        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_number: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let record = self.record(handle)?;
        page_number
            .checked_sub(1)
            .and_then(|index| record.page_sizes.get(index as usize))
            .copied()
            .ok_or(PdfEngineError::PageOutOfRange {
                page: page_number,
                page_count: record.page_sizes.len() as u32,
            })
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(handle, request.page_number)?;

        let width = request.target_width_px.max(1);
        let height = page_size.height_for_width(width as f32).round().max(1.0) as u32;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// Renders real page content through a system pdfium library; geometry still comes from
    /// the lopdf engine so both backends agree on page sizes.
    pub struct PdfiumEngine {
        pdfium: Pdfium,
        inner: LopdfEngine,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_system_library().map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self { pdfium: Pdfium::new(bindings), inner: LopdfEngine::default() })
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(
            &self,
            handle: DocumentHandle,
            page_number: u32,
        ) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(handle, page_number)
        }

        fn render_page(
            &self,
            handle: DocumentHandle,
            request: RenderRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            let record = self.inner.record(handle)?;
            let page_size = self.inner.page_size(handle, request.page_number)?;

            let width = request.target_width_px.max(1);
            let height = page_size.height_for_width(width as f32).round().max(1.0) as u32;

            let document = self
                .pdfium
                .load_pdf_from_byte_slice(&record.bytes, None)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;
            let page = document
                .pages()
                .get((request.page_number - 1) as u16)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_target_height(height as i32);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

            let rgba = bitmap.as_rgba_bytes().to_vec();
            RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
                PdfEngineError::Backend("pdfium returned a bitmap of unexpected size".to_owned())
            })
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{pdf_with_pages, two_page_pdf};

    #[test]
    fn opens_pdf_and_reads_page_count() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(two_page_pdf())).expect("open should succeed");

        assert_eq!(engine.page_count(handle).expect("count should succeed"), 2);
    }

    #[test]
    fn render_keeps_page_aspect_ratio() {
        let mut engine = LopdfEngine::new();
        let wide = PageBox { width_pt: 400.0, height_pt: 200.0, ..PageBox::letter() };
        let bytes = pdf_with_pages(&[wide]);
        let handle = engine.open(OpenSource::Bytes(bytes)).expect("open should succeed");

        let image = engine
            .render_page(handle, RenderRequest { page_number: 1, target_width_px: 300 })
            .expect("render should succeed");

        assert_eq!(image.dimensions(), (300, 150));
    }

    #[test]
    fn quarter_turned_pages_report_displayed_size() {
        let rotated = PageBox { rotation: 90, ..PageBox::letter() };
        assert_eq!(rotated.size(), PageSize { width_pt: 792.0, height_pt: 612.0 });

        let upside_down = PageBox { rotation: 180, ..PageBox::letter() };
        assert_eq!(upside_down.size(), PageBox::letter().size());

        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(45), 0);
    }

    #[test]
    fn rotated_pages_render_in_display_orientation() {
        let rotated = PageBox { rotation: 270, ..PageBox::letter() };
        let mut engine = LopdfEngine::new();
        let handle = engine
            .open(OpenSource::Bytes(pdf_with_pages(&[rotated])))
            .expect("open should succeed");

        let image = engine
            .render_page(handle, RenderRequest { page_number: 1, target_width_px: 792 })
            .expect("render should succeed");
        assert_eq!(image.dimensions(), (792, 612));
    }

    #[test]
    fn page_numbers_are_one_based() {
        let mut engine = LopdfEngine::new();
        let handle = engine.open(OpenSource::Bytes(two_page_pdf())).expect("open should succeed");

        assert!(engine.page_size(handle, 1).is_ok());
        assert!(engine.page_size(handle, 2).is_ok());

        let err = engine.page_size(handle, 0).expect_err("page 0 is not a page");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 0, page_count: 2 }));
    }

    #[test]
    fn unknown_page_size_falls_back_to_fixed_ratio() {
        let size = PageSize { width_pt: 0.0, height_pt: 0.0 };
        assert!((size.height_for_width(1000.0) - 1414.0).abs() < 0.01);
    }

    #[test]
    fn invalid_handle_returns_error() {
        let engine = LopdfEngine::new();
        let err =
            engine.page_count(DocumentHandle(999)).expect_err("should fail for unknown handle");

        assert!(matches!(err, PdfEngineError::InvalidHandle(999)));
    }

    #[test]
    fn encrypted_marker_is_rejected() {
        let mut engine = LopdfEngine::new();
        let err = engine
            .open(OpenSource::Bytes(b"%PDF-1.4\n/Encrypt 5 0 R\n".to_vec()))
            .expect_err("encrypted documents are rejected");

        assert!(matches!(err, PdfEngineError::EncryptedUnsupported));
    }
}
