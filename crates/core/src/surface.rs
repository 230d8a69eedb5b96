//! Per-surface drawing state: pointer capture, incremental ink, committed strokes.

use crate::raster::{Ink, Raster, RasterSnapshot};
use doc_model::{Point, Stroke, ToolSettings};

/// Placement and size of a drawable surface.
///
/// `origin` is the surface's top-left corner in the coordinate space pointer events arrive in.
/// `width` and `height` are logical pixels; the backing raster is `dpr` times larger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub origin: Point,
    pub width: f32,
    pub height: f32,
    pub dpr: f32,
}

impl SurfaceGeometry {
    pub fn new(width: f32, height: f32, dpr: f32) -> Self {
        Self { origin: Point::new(0.0, 0.0), width, height, dpr }
    }

    pub fn with_origin(self, origin: Point) -> Self {
        Self { origin, ..self }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CaptureState {
    #[default]
    Idle,
    /// `settings` are fixed when the gesture begins and apply to every segment and the commit.
    Capturing {
        points: Vec<Point>,
        settings: ToolSettings,
    },
}

/// Drives one surface from pointer input to committed strokes.
#[derive(Debug, Clone)]
pub struct SurfaceController {
    geometry: SurfaceGeometry,
    raster: Raster,
    settings: ToolSettings,
    strokes: Vec<Stroke>,
    capture: CaptureState,
}

impl SurfaceController {
    pub fn new(geometry: SurfaceGeometry, settings: ToolSettings) -> Self {
        Self {
            raster: Raster::new(geometry.width, geometry.height, geometry.dpr),
            geometry,
            settings,
            strokes: Vec::new(),
            capture: CaptureState::Idle,
        }
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ToolSettings) {
        self.settings = settings;
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn capture_state(&self) -> &CaptureState {
        &self.capture
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.capture, CaptureState::Capturing { .. })
    }

    pub fn begin_stroke(&mut self, point: Point) {
        if self.is_capturing() {
            return;
        }

        self.capture =
            CaptureState::Capturing { points: vec![point], settings: self.settings.clone() };
    }

    pub fn extend_stroke(&mut self, point: Point) {
        let CaptureState::Capturing { points, settings } = &mut self.capture else {
            return;
        };

        let previous = points.last().copied();
        points.push(point);

        if let Some(previous) = previous {
            let ink = Ink::new(settings.tool, &settings.color, settings.line_width);
            self.raster.draw_segment(previous, point, &ink);
        }
    }

    /// Finishes the current gesture. Returns the committed stroke, or `None` when nothing was
    /// captured or the gesture had fewer than two points.
    pub fn end_stroke(&mut self) -> Option<&Stroke> {
        let CaptureState::Capturing { points, settings } = std::mem::take(&mut self.capture)
        else {
            return None;
        };

        let stroke = Stroke::new(points, &settings);
        if stroke.is_degenerate() {
            return None;
        }

        log::debug!(
            "committed {:?} stroke with {} points ({} on surface)",
            stroke.tool(),
            stroke.points().len(),
            self.strokes.len() + 1
        );
        self.strokes.push(stroke);
        self.strokes.last()
    }

    /// Repaints the raster from the committed strokes alone.
    pub fn full_redraw(&mut self) {
        self.raster.clear();
        for stroke in &self.strokes {
            self.raster.draw_polyline(stroke.points(), &Ink::for_stroke(stroke));
        }
        log::debug!("redrew {} strokes", self.strokes.len());
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.raster.clear();
    }

    pub fn export_raster(&self) -> RasterSnapshot {
        self.raster.snapshot()
    }

    pub fn replace_strokes(&mut self, strokes: impl Into<Vec<Stroke>>) {
        self.strokes = strokes.into();
        self.full_redraw();
    }

    pub fn resize(&mut self, geometry: SurfaceGeometry) {
        self.geometry = geometry;
        self.raster = Raster::new(geometry.width, geometry.height, geometry.dpr);
        self.full_redraw();
    }

    /// Converts a point in pointer space to surface-local coordinates.
    pub fn to_local(&self, client: Point) -> Point {
        Point::new(client.x - self.geometry.origin.x, client.y - self.geometry.origin.y)
    }

    pub fn pointer_down(&mut self, client: Point) {
        let local = self.to_local(client);
        self.begin_stroke(local);
    }

    pub fn pointer_move(&mut self, client: Point) {
        let local = self.to_local(client);
        self.extend_stroke(local);
    }

    pub fn pointer_up(&mut self, _client: Point) -> Option<&Stroke> {
        self.end_stroke()
    }

    pub fn pointer_leave(&mut self, _client: Point) -> Option<&Stroke> {
        self.end_stroke()
    }
}
