//! Top-level annotation state: the active mode, every drawable surface, the page store and the
//! loaded document.

use crate::compositor::{flatten, white_base};
use crate::export::{export_pdf_default, ExportError, ExportOptions};
use crate::surface::{SurfaceController, SurfaceGeometry};
use doc_model::{
    apply_annotation_action, AnnotationAction, AnnotationMode, AnnotationSnapshot,
    AnnotationStore, Point, Preferences, Stroke, ToolSettings,
};
use image::RgbaImage;
use pdf_engine::{DocumentHandle, OpenSource, PdfEngine, PdfEngineError, RenderRequest};
use std::collections::BTreeMap;
use viewer_core::{
    BaseRenderCache, LruCache, PageLayout, RenderKey, DEFAULT_RENDER_CACHE_CAPACITY,
};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("no PDF document is loaded")]
    NoDocument,
    #[error("document failed to load or render: {0}")]
    DocumentFailed(String),
    #[error("page renderer error: {0}")]
    Renderer(#[from] PdfEngineError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    handle: DocumentHandle,
    bytes: Vec<u8>,
    layout: PageLayout,
}

impl LoadedDocument {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }
}

#[derive(Debug, Clone, Default)]
pub enum DocumentState {
    #[default]
    Empty,
    Ready(LoadedDocument),
    /// Loading or rendering failed. Annotation stays disabled until another file is loaded.
    Failed(String),
}

/// The surface a pointer gesture is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureTarget {
    Whiteboard,
    Page(u32),
}

pub struct Workspace<E: PdfEngine> {
    engine: E,
    preferences: Preferences,
    mode: AnnotationMode,
    whiteboard: SurfaceController,
    pages: BTreeMap<u32, SurfaceController>,
    store: AnnotationStore,
    document: DocumentState,
    base_renders: BaseRenderCache<RgbaImage>,
    capture: Option<CaptureTarget>,
}

impl<E: PdfEngine> Workspace<E> {
    pub fn new(engine: E, preferences: Preferences) -> Self {
        let geometry = SurfaceGeometry::new(
            preferences.whiteboard_width as f32,
            preferences.whiteboard_height as f32,
            preferences.device_pixel_ratio,
        );

        Self {
            engine,
            whiteboard: SurfaceController::new(geometry, preferences.tool.clone()),
            preferences,
            mode: AnnotationMode::Whiteboard,
            pages: BTreeMap::new(),
            store: AnnotationStore::new(),
            document: DocumentState::Empty,
            base_renders: LruCache::new(DEFAULT_RENDER_CACHE_CAPACITY),
            capture: None,
        }
    }

    pub fn mode(&self) -> AnnotationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AnnotationMode) {
        if self.mode != mode {
            self.end_pending_gesture();
            self.mode = mode;
        }
    }

    pub fn tool_settings(&self) -> &ToolSettings {
        &self.preferences.tool
    }

    /// Hands new tool settings down to every surface. A gesture already in progress keeps the
    /// settings it started with.
    pub fn set_tool_settings(&mut self, settings: ToolSettings) {
        self.whiteboard.set_settings(settings.clone());
        for controller in self.pages.values_mut() {
            controller.set_settings(settings.clone());
        }
        self.preferences.tool = settings;
    }

    pub fn document_state(&self) -> &DocumentState {
        &self.document
    }

    pub fn is_annotation_enabled(&self) -> bool {
        match self.mode {
            AnnotationMode::Whiteboard => true,
            AnnotationMode::Pdf => matches!(self.document, DocumentState::Ready(_)),
        }
    }

    pub fn layout(&self) -> Option<&PageLayout> {
        match &self.document {
            DocumentState::Ready(document) => Some(document.layout()),
            _ => None,
        }
    }

    pub fn whiteboard(&self) -> &SurfaceController {
        &self.whiteboard
    }

    pub fn page(&self, page_number: u32) -> Option<&SurfaceController> {
        self.pages.get(&page_number)
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn annotation_snapshot(&self) -> AnnotationSnapshot {
        self.store.snapshot()
    }

    /// Opens a PDF and switches to PDF mode. Strokes from the previous document are dropped.
    pub fn load_document(&mut self, bytes: Vec<u8>) -> Result<u32, WorkspaceError> {
        self.close_document();
        self.mode = AnnotationMode::Pdf;

        match self.open_document(bytes) {
            Ok(document) => {
                let page_count = document.layout.page_count();
                self.build_page_surfaces(&document.layout);
                self.document = DocumentState::Ready(document);
                log::info!("loaded PDF with {page_count} pages");
                Ok(page_count)
            }
            Err(err) => {
                self.fail(&err);
                Err(err.into())
            }
        }
    }

    fn open_document(&mut self, bytes: Vec<u8>) -> Result<LoadedDocument, PdfEngineError> {
        let handle = self.engine.open(OpenSource::Bytes(bytes.clone()))?;

        match self.read_layout(handle) {
            Ok(layout) => Ok(LoadedDocument { handle, bytes, layout }),
            Err(err) => {
                if let Err(close_err) = self.engine.close(handle) {
                    log::warn!("failed to close rejected document: {close_err}");
                }
                Err(err)
            }
        }
    }

    fn read_layout(&self, handle: DocumentHandle) -> Result<PageLayout, PdfEngineError> {
        let page_count = self.engine.page_count(handle)?;

        let mut sizes = Vec::with_capacity(page_count as usize);
        for page_number in 1..=page_count {
            sizes.push(Some(self.engine.page_size(handle, page_number)?));
        }

        Ok(PageLayout::new(
            self.preferences.page_render_width,
            self.preferences.device_pixel_ratio,
            &sizes,
        ))
    }

    fn close_document(&mut self) {
        self.end_pending_gesture();
        if let DocumentState::Ready(document) = std::mem::take(&mut self.document) {
            if let Err(err) = self.engine.close(document.handle) {
                log::warn!("failed to close previous document: {err}");
            }
        }
        self.pages.clear();
        apply_annotation_action(&mut self.store, AnnotationAction::DocumentLoaded);
        self.base_renders.clear();
    }

    fn build_page_surfaces(&mut self, layout: &PageLayout) {
        for slot in layout.slots() {
            let geometry = SurfaceGeometry::new(slot.width_px, slot.height_px, layout.dpr())
                .with_origin(Point::new(0.0, slot.top_px));
            self.pages.insert(
                slot.page_number,
                SurfaceController::new(geometry, self.preferences.tool.clone()),
            );
        }
    }

    fn fail(&mut self, err: &PdfEngineError) {
        log::warn!("document disabled for annotation: {err}");
        self.end_pending_gesture();
        self.document = DocumentState::Failed(err.to_string());
    }

    fn end_pending_gesture(&mut self) {
        match self.capture.take() {
            Some(CaptureTarget::Whiteboard) => {
                self.whiteboard.end_stroke();
            }
            Some(CaptureTarget::Page(page_number)) => {
                self.commit_page_gesture(page_number);
            }
            None => {}
        }
    }

    /// Starts a gesture. In PDF mode the point is in document coordinates and picks the page
    /// under it; gaps between pages start nothing.
    pub fn pointer_down(&mut self, point: Point) {
        if self.capture.is_some() || !self.is_annotation_enabled() {
            return;
        }

        match self.mode {
            AnnotationMode::Whiteboard => {
                self.whiteboard.pointer_down(point);
                self.capture = Some(CaptureTarget::Whiteboard);
            }
            AnnotationMode::Pdf => {
                let Some(page_number) =
                    self.layout().and_then(|layout| layout.page_at_point(point.x, point.y))
                else {
                    return;
                };
                if let Some(controller) = self.pages.get_mut(&page_number) {
                    controller.pointer_down(point);
                    self.capture = Some(CaptureTarget::Page(page_number));
                }
            }
        }
    }

    pub fn pointer_move(&mut self, point: Point) {
        match self.capture {
            Some(CaptureTarget::Whiteboard) => self.whiteboard.pointer_move(point),
            Some(CaptureTarget::Page(page_number)) => {
                if let Some(controller) = self.pages.get_mut(&page_number) {
                    controller.pointer_move(point);
                }
            }
            None => {}
        }
    }

    /// Ends the gesture. Returns the committed stroke, if any.
    pub fn pointer_up(&mut self, point: Point) -> Option<Stroke> {
        self.finish_gesture(point, false)
    }

    pub fn pointer_leave(&mut self, point: Point) -> Option<Stroke> {
        self.finish_gesture(point, true)
    }

    fn finish_gesture(&mut self, point: Point, left: bool) -> Option<Stroke> {
        match self.capture.take()? {
            CaptureTarget::Whiteboard => {
                let committed = if left {
                    self.whiteboard.pointer_leave(point)
                } else {
                    self.whiteboard.pointer_up(point)
                };
                committed.cloned()
            }
            CaptureTarget::Page(page_number) => self.commit_page_gesture(page_number),
        }
    }

    /// Ends capture on a page and writes that page's whole sequence back to the store.
    fn commit_page_gesture(&mut self, page_number: u32) -> Option<Stroke> {
        let controller = self.pages.get_mut(&page_number)?;
        let committed = controller.end_stroke()?.clone();
        let strokes = controller.strokes().to_vec();
        let action = AnnotationAction::SetPage { page_number, strokes };
        apply_annotation_action(&mut self.store, action);
        Some(committed)
    }

    /// Replaces a page's strokes wholesale, in both the store and the page surface.
    pub fn set_page_strokes(
        &mut self,
        page_number: u32,
        strokes: Vec<Stroke>,
    ) -> Result<(), WorkspaceError> {
        self.ready_document()?;
        let page_count = self.pages.len() as u32;
        let controller = self
            .pages
            .get_mut(&page_number)
            .ok_or(PdfEngineError::PageOutOfRange { page: page_number, page_count })?;

        controller.replace_strokes(strokes.clone());
        let action = AnnotationAction::SetPage { page_number, strokes };
        apply_annotation_action(&mut self.store, action);
        Ok(())
    }

    pub fn set_whiteboard_strokes(&mut self, strokes: Vec<Stroke>) {
        self.whiteboard.replace_strokes(strokes);
    }

    /// Clears the active surface set: the whiteboard, or every page of the document.
    pub fn clear(&mut self) {
        self.end_pending_gesture();
        match self.mode {
            AnnotationMode::Whiteboard => self.whiteboard.clear(),
            AnnotationMode::Pdf => {
                apply_annotation_action(&mut self.store, AnnotationAction::ClearAll);
                for controller in self.pages.values_mut() {
                    controller.clear();
                }
            }
        }
    }

    /// Flattens the active base with its annotations: the first page in PDF mode, a white sheet
    /// the size of the whiteboard otherwise.
    pub fn capture_snapshot(&mut self) -> Result<RgbaImage, WorkspaceError> {
        match self.mode {
            AnnotationMode::Whiteboard => {
                let raster = self.whiteboard.export_raster();
                let base = white_base(raster.width(), raster.height());
                Ok(flatten(&base, Some(&raster)))
            }
            AnnotationMode::Pdf => {
                let page_number = self
                    .ready_document()?
                    .layout
                    .first_page()
                    .ok_or(WorkspaceError::NoDocument)?;
                let base = self.page_base(page_number)?;
                let raster = self.pages.get(&page_number).map(SurfaceController::export_raster);
                Ok(flatten(&base, raster.as_ref()))
            }
        }
    }

    /// Rendered base bitmap for a page at device resolution, memoised per page and width.
    pub fn page_base(&mut self, page_number: u32) -> Result<RgbaImage, WorkspaceError> {
        let document = self.ready_document()?;
        let handle = document.handle;
        let layout = &document.layout;
        let slot = layout.slot(page_number).ok_or(PdfEngineError::PageOutOfRange {
            page: page_number,
            page_count: layout.page_count(),
        })?;
        let (width_px, _) = slot.device_size(layout.dpr());

        let key = RenderKey { page_number, target_width_px: width_px };
        let request = RenderRequest { page_number, target_width_px: width_px };
        let engine = &self.engine;
        let rendered = self
            .base_renders
            .get_or_try_insert_with(key, || engine.render_page(handle, request))
            .cloned();

        rendered.map_err(|err| {
            self.fail(&err);
            WorkspaceError::Renderer(err)
        })
    }

    /// Exports the loaded PDF with every annotated page flattened. The store is read once, up
    /// front.
    pub fn export_pdf(&self) -> Result<Vec<u8>, WorkspaceError> {
        let snapshot = self.annotation_snapshot();
        let document = self.ready_document()?;
        let options = ExportOptions {
            render_width_px: self.preferences.page_render_width,
            dpr: self.preferences.device_pixel_ratio,
        };

        Ok(export_pdf_default(document.bytes(), &snapshot, &options)?)
    }

    fn ready_document(&self) -> Result<&LoadedDocument, WorkspaceError> {
        match &self.document {
            DocumentState::Ready(document) => Ok(document),
            DocumentState::Failed(reason) => Err(WorkspaceError::DocumentFailed(reason.clone())),
            DocumentState::Empty => Err(WorkspaceError::NoDocument),
        }
    }
}
