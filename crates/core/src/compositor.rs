//! Flattening of an annotation raster onto a base bitmap.

use crate::raster::{pixmap_from_rgba, rgba_from_pixmap, RasterSnapshot};
use image::RgbaImage;
use tiny_skia::{BlendMode, FilterQuality, PixmapPaint, Transform};

/// Paints `annotation` over `base` and returns a bitmap the size of `base`.
///
/// The annotation is anchored at the origin and stretched to the base size when the two differ.
/// A missing, zero-sized or fully transparent annotation returns an exact copy of `base`.
pub fn flatten(base: &RgbaImage, annotation: Option<&RasterSnapshot>) -> RgbaImage {
    let Some(overlay) = annotation.filter(|snapshot| !snapshot.is_blank()) else {
        return base.clone();
    };
    let Some(overlay) = overlay.pixmap() else {
        return base.clone();
    };
    let Some(mut canvas) = pixmap_from_rgba(base) else {
        return base.clone();
    };

    let same_size = overlay.width() == canvas.width() && overlay.height() == canvas.height();
    let transform = if same_size {
        Transform::identity()
    } else {
        Transform::from_scale(
            canvas.width() as f32 / overlay.width() as f32,
            canvas.height() as f32 / overlay.height() as f32,
        )
    };

    let paint = PixmapPaint {
        blend_mode: BlendMode::SourceOver,
        quality: if same_size { FilterQuality::Nearest } else { FilterQuality::Bilinear },
        ..PixmapPaint::default()
    };
    canvas.draw_pixmap(0, 0, overlay.as_ref(), &paint, transform, None);

    rgba_from_pixmap(&canvas)
}

/// An opaque white bitmap, the base for whiteboard snapshots.
pub fn white_base(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{SurfaceController, SurfaceGeometry};
    use doc_model::{Point, Stroke, ToolSettings};
    use image::Rgba;

    fn checkerboard(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([200, 10, 30, 255])
            } else {
                Rgba([5, 6, 7, 128])
            }
        })
    }

    fn surface_with_line(width: f32, height: f32, y: f32) -> SurfaceController {
        let geometry = SurfaceGeometry::new(width, height, 1.0);
        let mut surface = SurfaceController::new(geometry, ToolSettings::default());
        let line = vec![Point::new(0.0, y), Point::new(width, y)];
        surface.replace_strokes(vec![Stroke::pen(line, "#ff0000", 4.0)]);
        surface
    }

    #[test]
    fn empty_annotation_returns_base_unchanged() {
        let base = checkerboard(16, 9);

        assert_eq!(flatten(&base, None), base);
        assert_eq!(flatten(&base, Some(&RasterSnapshot::empty())), base);

        let blank =
            SurfaceController::new(SurfaceGeometry::new(16.0, 9.0, 1.0), ToolSettings::default());
        assert_eq!(flatten(&base, Some(&blank.export_raster())), base);
    }

    #[test]
    fn annotation_paints_over_base() {
        let base = white_base(40, 40);
        let surface = surface_with_line(40.0, 40.0, 20.0);

        let output = flatten(&base, Some(&surface.export_raster()));

        assert_eq!(output.dimensions(), (40, 40));
        assert_eq!(output.get_pixel(20, 20), &Rgba([255, 0, 0, 255]));
        assert_eq!(output.get_pixel(20, 5), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn annotation_is_scaled_to_base_size() {
        let base = white_base(80, 80);
        let surface = surface_with_line(40.0, 40.0, 20.0);

        let output = flatten(&base, Some(&surface.export_raster()));

        assert_eq!(output.dimensions(), (80, 80));
        let Rgba([r, g, b, a]) = *output.get_pixel(40, 40);
        assert!(r > 240 && g < 16 && b < 16 && a == 255, "expected red, got {r} {g} {b} {a}");
        assert_eq!(output.get_pixel(40, 10), &Rgba([255, 255, 255, 255]));
    }
}
