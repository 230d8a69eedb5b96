//! Owned drawing rasters and read-only snapshots of them.
//!
//! A [`Raster`] is sized in device pixels, while everything drawn onto it is given in
//! surface-local logical pixels. The device pixel ratio is baked into the raster's base
//! transform when it is allocated, so callers never scale coordinates themselves.

use doc_model::{Point, Stroke, Tool};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tiny_skia::{
    BlendMode, Color, ColorU8, IntSize, LineCap, LineJoin, Paint, PathBuilder, Pixmap,
    Stroke as SkiaStroke, Transform,
};

/// Drawing attributes for one stroke, resolved from its tool, color and width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ink {
    color: Color,
    width: f32,
    blend_mode: BlendMode,
}

impl Ink {
    pub fn new(tool: Tool, color: &str, line_width: f32) -> Self {
        match tool {
            Tool::Pen => Self {
                color: parse_color(color),
                width: line_width,
                blend_mode: BlendMode::SourceOver,
            },
            Tool::Eraser => Self {
                color: Color::BLACK,
                width: doc_model::effective_width(tool, line_width),
                blend_mode: BlendMode::DestinationOut,
            },
        }
    }

    pub fn for_stroke(stroke: &Stroke) -> Self {
        Self::new(stroke.tool(), stroke.color(), stroke.line_width())
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    fn paint(&self) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color(self.color);
        paint.blend_mode = self.blend_mode;
        paint.anti_alias = true;
        paint
    }

    fn stroke(&self) -> SkiaStroke {
        SkiaStroke {
            width: self.width,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..SkiaStroke::default()
        }
    }
}

/// Parses `#rgb`, `#rrggbb`, `#rrggbbaa` or a handful of named colors. Anything else paints
/// black.
pub fn parse_color(value: &str) -> Color {
    match try_parse_color(value) {
        Some(color) => color,
        None => {
            log::warn!("unparseable stroke color {value:?}, falling back to black");
            Color::BLACK
        }
    }
}

fn try_parse_color(value: &str) -> Option<Color> {
    let value = value.trim();

    if let Some(hex) = value.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        let short = |index: usize| channel(index..index + 1).map(|nibble| nibble * 17);

        return match hex.len() {
            3 => Some(Color::from_rgba8(short(0)?, short(1)?, short(2)?, 255)),
            6 => Some(Color::from_rgba8(channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
            8 => Some(Color::from_rgba8(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => None,
        };
    }

    let (r, g, b) = match value.to_ascii_lowercase().as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "orange" => (255, 165, 0),
        "purple" => (128, 0, 128),
        "gray" | "grey" => (128, 128, 128),
        _ => return None,
    };

    Some(Color::from_rgba8(r, g, b, 255))
}

/// A surface's drawing buffer. Zero-sized rasters own no pixels; painting on them does nothing.
#[derive(Debug, Clone)]
pub struct Raster {
    pixmap: Option<Pixmap>,
    base_transform: Transform,
}

impl Raster {
    pub fn new(logical_width: f32, logical_height: f32, dpr: f32) -> Self {
        let dpr = if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 };
        let width = (logical_width.max(0.0) * dpr).round() as u32;
        let height = (logical_height.max(0.0) * dpr).round() as u32;

        Self { pixmap: Pixmap::new(width, height), base_transform: Transform::from_scale(dpr, dpr) }
    }

    pub fn width_px(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, Pixmap::width)
    }

    pub fn height_px(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, Pixmap::height)
    }

    pub fn clear(&mut self) {
        if let Some(pixmap) = self.pixmap.as_mut() {
            pixmap.fill(Color::TRANSPARENT);
        }
    }

    /// Strokes one segment. Used while a gesture is still being captured.
    pub fn draw_segment(&mut self, from: Point, to: Point, ink: &Ink) {
        self.draw_polyline(&[from, to], ink);
    }

    pub fn draw_polyline(&mut self, points: &[Point], ink: &Ink) {
        let Some(pixmap) = self.pixmap.as_mut() else {
            return;
        };
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        if rest.is_empty() {
            return;
        }

        let mut builder = PathBuilder::new();
        builder.move_to(first.x, first.y);
        for point in rest {
            builder.line_to(point.x, point.y);
        }
        let Some(path) = builder.finish() else {
            return;
        };

        pixmap.stroke_path(&path, &ink.paint(), &ink.stroke(), self.base_transform, None);
    }

    pub fn snapshot(&self) -> RasterSnapshot {
        RasterSnapshot { pixmap: self.pixmap.clone() }
    }
}

/// Immutable copy of a raster's pixels at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSnapshot {
    pixmap: Option<Pixmap>,
}

impl RasterSnapshot {
    pub fn empty() -> Self {
        Self { pixmap: None }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, Pixmap::width)
    }

    pub fn height(&self) -> u32 {
        self.pixmap.as_ref().map_or(0, Pixmap::height)
    }

    pub fn is_empty(&self) -> bool {
        self.pixmap.is_none()
    }

    /// True when there is nothing to paint: no pixels, or every pixel fully transparent.
    pub fn is_blank(&self) -> bool {
        match &self.pixmap {
            Some(pixmap) => pixmap.pixels().iter().all(|pixel| pixel.alpha() == 0),
            None => true,
        }
    }

    /// Straight-alpha RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let pixel = self.pixmap.as_ref()?.pixel(x, y)?.demultiply();
        Some([pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()])
    }

    pub(crate) fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.as_ref()
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        match &self.pixmap {
            Some(pixmap) => rgba_from_pixmap(pixmap),
            None => RgbaImage::new(0, 0),
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        encode_png(&self.to_rgba_image())
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

pub(crate) fn pixmap_from_rgba(image: &RgbaImage) -> Option<Pixmap> {
    let size = IntSize::from_wh(image.width(), image.height())?;
    let mut data = Vec::with_capacity(image.as_raw().len());
    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        let premultiplied = ColorU8::from_rgba(r, g, b, a).premultiply();
        data.extend_from_slice(&[
            premultiplied.red(),
            premultiplied.green(),
            premultiplied.blue(),
            premultiplied.alpha(),
        ]);
    }
    Pixmap::from_vec(data, size)
}

pub(crate) fn rgba_from_pixmap(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (target, source) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = source.demultiply();
        *target = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_bytes(color: Color) -> [u8; 4] {
        let color = color.to_color_u8();
        [color.red(), color.green(), color.blue(), color.alpha()]
    }

    #[test]
    fn parses_hex_and_named_colors() {
        assert_eq!(color_bytes(parse_color("#f00")), [255, 0, 0, 255]);
        assert_eq!(color_bytes(parse_color("#00ff00")), [0, 255, 0, 255]);
        assert_eq!(color_bytes(parse_color("#0000ff80")), [0, 0, 255, 128]);
        assert_eq!(color_bytes(parse_color("Orange")), [255, 165, 0, 255]);
    }

    #[test]
    fn unparseable_color_falls_back_to_black() {
        assert_eq!(color_bytes(parse_color("not-a-color")), [0, 0, 0, 255]);
        assert_eq!(color_bytes(parse_color("#12")), [0, 0, 0, 255]);
        assert_eq!(color_bytes(parse_color("#ééé")), [0, 0, 0, 255]);
    }

    #[test]
    fn raster_size_includes_pixel_ratio() {
        let raster = Raster::new(100.0, 50.0, 2.0);
        assert_eq!((raster.width_px(), raster.height_px()), (200, 100));
    }

    #[test]
    fn logical_coordinates_are_scaled_once() {
        let mut raster = Raster::new(100.0, 100.0, 2.0);
        let ink = Ink::new(Tool::Pen, "#ff0000", 4.0);
        raster.draw_segment(Point::new(10.0, 50.0), Point::new(90.0, 50.0), &ink);

        let snapshot = raster.snapshot();
        assert_eq!(snapshot.pixel(100, 100), Some([255, 0, 0, 255]));
        assert_eq!(snapshot.pixel(50, 50).map(|pixel| pixel[3]), Some(0));
    }

    #[test]
    fn zero_sized_raster_ignores_drawing() {
        let mut raster = Raster::new(0.0, 40.0, 1.0);
        let ink = Ink::new(Tool::Pen, "#000", 3.0);
        raster.draw_segment(Point::new(0.0, 0.0), Point::new(10.0, 10.0), &ink);

        let snapshot = raster.snapshot();
        assert!(snapshot.is_empty());
        assert!(snapshot.is_blank());
        assert_eq!(snapshot.to_rgba_image().dimensions(), (0, 0));
    }

    #[test]
    fn eraser_ink_ignores_color_and_width() {
        let ink = Ink::new(Tool::Eraser, "#00ff00", 1.0);
        assert_eq!(ink.width(), doc_model::ERASER_WIDTH);
        assert_eq!(ink.blend_mode(), BlendMode::DestinationOut);
    }

    #[test]
    fn rgba_conversion_keeps_opaque_pixels() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([12, 34, 56, 255]));
        let pixmap = pixmap_from_rgba(&image).expect("pixmap should allocate");

        assert_eq!(rgba_from_pixmap(&pixmap), image);
    }
}
