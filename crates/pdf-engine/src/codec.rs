//! Byte-level recomposition of a PDF: decode, stamp PNG overlays onto pages, encode.

use crate::{normalize_rotation, PageBox, PdfEngineError};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;

/// An image XObject embedded into the document being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    object_id: ObjectId,
    width_px: u32,
    height_px: u32,
}

impl ImageHandle {
    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn height_px(&self) -> u32 {
        self.height_px
    }
}

/// Where an image lands on a page, in PDF user space (origin bottom-left, y up, points).
///
/// `rotation` is the page's clockwise `/Rotate`; the image is turned against it so that it reads
/// upright once the page is displayed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: u16,
}

impl PlacementRect {
    /// Covers the whole page box.
    pub fn full_page(page: PageBox) -> Self {
        Self {
            x: page.origin_x_pt,
            y: page.origin_y_pt,
            width: page.width_pt,
            height: page.height_pt,
            rotation: page.rotation,
        }
    }

    /// The `cm` operands mapping the image unit square onto this rectangle.
    ///
    /// Image space puts the first sample row at the top of the unit square, so with no rotation
    /// a positive height keeps a top-down raster upright.
    pub fn matrix(&self) -> [f32; 6] {
        let Self { x, y, width: w, height: h, .. } = *self;
        match normalize_rotation(i64::from(self.rotation)) {
            90 => [0.0, h, -w, 0.0, x + w, y],
            180 => [-w, 0.0, 0.0, -h, x + w, y + h],
            270 => [0.0, -h, w, 0.0, x, y + h],
            _ => [w, 0.0, 0.0, h, x, y],
        }
    }
}

pub trait PdfCodec: Sized {
    fn decode(bytes: &[u8]) -> Result<Self, PdfEngineError>;
    /// Page numbers (1-based) in document order.
    fn page_numbers(&self) -> Vec<u32>;
    fn page_box(&self, page_number: u32) -> Result<PageBox, PdfEngineError>;
    fn embed_png(&mut self, png: &[u8]) -> Result<ImageHandle, PdfEngineError>;
    fn draw_image(
        &mut self,
        page_number: u32,
        image: ImageHandle,
        rect: PlacementRect,
    ) -> Result<(), PdfEngineError>;
    fn encode(&mut self) -> Result<Vec<u8>, PdfEngineError>;
}

pub struct LopdfCodec {
    doc: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LopdfCodec {
    pub fn document(&self) -> &Document {
        &self.doc
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId, PdfEngineError> {
        self.pages.get(&page_number).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_number,
            page_count: self.pages.len() as u32,
        })
    }

    /// Gives the page its own inline resource dictionary. Inherited or shared resources are
    /// copied down first, so existing content keeps resolving its names and no other page sees
    /// the new entries.
    fn page_resources_mut(
        &mut self,
        page_id: ObjectId,
    ) -> Result<&mut Dictionary, PdfEngineError> {
        let copied = match self.doc.get_dictionary(page_id)?.get(b"Resources") {
            Ok(Object::Dictionary(_)) => None,
            Ok(Object::Reference(id)) => Some(self.doc.get_dictionary(*id)?.clone()),
            _ => Some(inherited_resources(&self.doc, page_id).unwrap_or_else(Dictionary::new)),
        };

        let page = self.doc.get_object_mut(page_id)?.as_dict_mut()?;
        if let Some(resources) = copied {
            page.set("Resources", resources);
        }

        Ok(page.get_mut(b"Resources")?.as_dict_mut()?)
    }

    fn register_xobject(
        &mut self,
        page_id: ObjectId,
        image: ImageHandle,
    ) -> Result<Vec<u8>, PdfEngineError> {
        let shared = match self.page_resources(page_id)?.get(b"XObject") {
            Ok(Object::Reference(id)) => Some(self.doc.get_dictionary(*id)?.clone()),
            Ok(Object::Dictionary(_)) => None,
            _ => Some(Dictionary::new()),
        };

        let resources = self.page_resources_mut(page_id)?;
        if let Some(xobjects) = shared {
            resources.set("XObject", xobjects);
        }
        let dict = resources.get_mut(b"XObject")?.as_dict_mut()?;

        let mut index = 0;
        let name = loop {
            let candidate = format!("InkOverlay{index}").into_bytes();
            if !dict.has(&candidate) {
                break candidate;
            }
            index += 1;
        };

        dict.set(name.clone(), image.object_id);
        Ok(name)
    }

    fn page_resources(&self, page_id: ObjectId) -> Result<Dictionary, PdfEngineError> {
        let resources = match self.doc.get_dictionary(page_id)?.get(b"Resources") {
            Ok(Object::Dictionary(resources)) => resources.clone(),
            Ok(Object::Reference(id)) => self.doc.get_dictionary(*id)?.clone(),
            _ => inherited_resources(&self.doc, page_id).unwrap_or_else(Dictionary::new),
        };
        Ok(resources)
    }

    fn content_ids(&self, page_id: ObjectId) -> Result<Vec<ObjectId>, PdfEngineError> {
        let page = self.doc.get_dictionary(page_id)?;
        let contents = match page.get(b"Contents") {
            Ok(contents) => contents,
            Err(_) => return Ok(Vec::new()),
        };

        let resolved = match contents {
            Object::Reference(id) => match self.doc.get_object(*id)? {
                Object::Array(items) => items,
                Object::Stream(_) => return Ok(vec![*id]),
                _ => {
                    return Err(PdfEngineError::Backend("page contents are not a stream".to_owned()))
                }
            },
            Object::Array(items) => items,
            _ => return Err(PdfEngineError::Backend("page contents are not a stream".to_owned())),
        };

        resolved
            .iter()
            .map(|item| item.as_reference().map_err(PdfEngineError::from))
            .collect()
    }
}

impl PdfCodec for LopdfCodec {
    fn decode(bytes: &[u8]) -> Result<Self, PdfEngineError> {
        crate::reject_encrypted(bytes)?;

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(Self { doc, pages })
    }

    fn page_numbers(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    fn page_box(&self, page_number: u32) -> Result<PageBox, PdfEngineError> {
        let page_id = self.page_id(page_number)?;
        Ok(page_box(&self.doc, page_id))
    }

    fn embed_png(&mut self, png: &[u8]) -> Result<ImageHandle, PdfEngineError> {
        let image = image::load_from_memory_with_format(png, image::ImageFormat::Png)?.to_rgba8();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PdfEngineError::Backend("cannot embed an empty image".to_owned()));
        }

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        let mut alpha = Vec::with_capacity(width as usize * height as usize);
        for pixel in image.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha,
        );
        let smask_id = self.doc.add_object(smask);

        let color = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "SMask" => smask_id,
            },
            rgb,
        );
        let object_id = self.doc.add_object(color);

        Ok(ImageHandle { object_id, width_px: width, height_px: height })
    }

    fn draw_image(
        &mut self,
        page_number: u32,
        image: ImageHandle,
        rect: PlacementRect,
    ) -> Result<(), PdfEngineError> {
        let page_id = self.page_id(page_number)?;
        let name = self.register_xobject(page_id, image)?;
        let existing = self.content_ids(page_id)?;

        let [a, b, c, d, e, f] = rect.matrix();
        let overlay = format!(
            "\nQ\nq {a} {b} {c} {d} {e} {f} cm /{} Do Q\n",
            String::from_utf8_lossy(&name)
        );

        let open_id = self.doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let overlay_id = self.doc.add_object(Stream::new(Dictionary::new(), overlay.into_bytes()));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(open_id));
        contents.extend(existing.into_iter().map(Object::Reference));
        contents.push(Object::Reference(overlay_id));

        let page = self.doc.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("Contents", contents);

        Ok(())
    }

    fn encode(&mut self) -> Result<Vec<u8>, PdfEngineError> {
        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

/// Resolves the page box, walking up the page tree for inherited MediaBox and Rotate entries.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let mut media = None;
    let mut rotation = None;

    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };

        if media.is_none() {
            media = media_box(doc, dict);
        }
        if rotation.is_none() {
            rotation = dict.get(b"Rotate").and_then(Object::as_i64).ok().map(normalize_rotation);
        }
        if media.is_some() && rotation.is_some() {
            break;
        }

        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    PageBox { rotation: rotation.unwrap_or(0), ..media.unwrap_or_else(PageBox::letter) }
}

fn media_box(doc: &Document, dict: &Dictionary) -> Option<PageBox> {
    let raw = dict.get(b"MediaBox").ok()?;
    let resolved = match raw {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };

    let array = resolved.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let x0 = array[0].as_float().ok()?;
    let y0 = array[1].as_float().ok()?;
    let x1 = array[2].as_float().ok()?;
    let y1 = array[3].as_float().ok()?;

    Some(PageBox {
        origin_x_pt: x0.min(x1),
        origin_y_pt: y0.min(y1),
        width_pt: (x1 - x0).abs(),
        height_pt: (y1 - y0).abs(),
        rotation: 0,
    })
}

fn inherited_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut current =
        doc.get_dictionary(page_id).ok()?.get(b"Parent").and_then(Object::as_reference).ok();

    while let Some(id) = current {
        let dict = doc.get_dictionary(id).ok()?;
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(resources)) => return Some(resources.clone()),
            Ok(Object::Reference(resources_id)) => {
                return doc.get_dictionary(*resources_id).ok().cloned();
            }
            _ => {}
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::two_page_pdf;
    use image::{ImageBuffer, Rgba};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = ImageBuffer::from_pixel(width, height, Rgba([255_u8, 0, 0, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).expect("png should encode");
        bytes.into_inner()
    }

    #[test]
    fn decodes_pages_in_document_order() {
        let codec = LopdfCodec::decode(&two_page_pdf()).expect("decode should succeed");

        assert_eq!(codec.page_numbers(), vec![1, 2]);
        let page = codec.page_box(1).expect("page box should resolve");
        assert_eq!(page, PageBox::letter());
    }

    #[test]
    fn unknown_page_is_out_of_range() {
        let codec = LopdfCodec::decode(&two_page_pdf()).expect("decode should succeed");

        let err = codec.page_box(9).expect_err("page 9 does not exist");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 9, page_count: 2 }));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(LopdfCodec::decode(b"definitely not a pdf").is_err());
    }

    #[test]
    fn embedded_png_keeps_alpha_in_soft_mask() {
        let mut codec = LopdfCodec::decode(&two_page_pdf()).expect("decode should succeed");
        let handle = codec.embed_png(&png_bytes(4, 3)).expect("embed should succeed");

        assert_eq!((handle.width_px(), handle.height_px()), (4, 3));

        let image = codec.document().get_object(handle.object_id).expect("image object");
        let stream = image.as_stream().expect("image is a stream");
        assert_eq!(stream.content.len(), 4 * 3 * 3);

        let smask_id = stream.dict.get(b"SMask").and_then(Object::as_reference).expect("smask");
        let smask =
            codec.document().get_object(smask_id).and_then(Object::as_stream).expect("soft mask");
        assert!(smask.content.iter().all(|alpha| *alpha == 255));
    }

    #[test]
    fn drawing_wraps_existing_content_and_leaves_other_pages_alone() {
        let source = two_page_pdf();
        let original = Document::load_mem(&source).expect("source should load");
        let original_pages = original.get_pages();

        let mut codec = LopdfCodec::decode(&source).expect("decode should succeed");
        let handle = codec.embed_png(&png_bytes(2, 2)).expect("embed should succeed");
        let rect = PlacementRect::full_page(codec.page_box(1).expect("page box"));
        codec.draw_image(1, handle, rect).expect("draw should succeed");

        let bytes = codec.encode().expect("encode should succeed");
        let output = Document::load_mem(&bytes).expect("output should load");
        let pages = output.get_pages();

        let first = output.get_page_content(pages[&1]).expect("page 1 content");
        let first = String::from_utf8_lossy(&first);
        assert!(first.starts_with("q\n"));
        assert!(first.contains("612 0 0 792 0 0 cm /InkOverlay0 Do Q"));

        let second = output.get_page_content(pages[&2]).expect("page 2 content");
        let original_second =
            original.get_page_content(original_pages[&2]).expect("original page 2 content");
        assert_eq!(second, original_second);
    }

    #[test]
    fn rotation_is_inherited_from_the_page_tree() {
        let mut doc = Document::load_mem(&two_page_pdf()).expect("fixture should load");
        let first_page = doc.get_pages()[&1];
        let pages_id = doc
            .get_dictionary(first_page)
            .and_then(|page| page.get(b"Parent"))
            .and_then(Object::as_reference)
            .expect("page should have a parent");
        doc.get_object_mut(pages_id)
            .and_then(Object::as_dict_mut)
            .expect("page tree dictionary")
            .set("Rotate", -90_i64);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("document should save");

        let codec = LopdfCodec::decode(&bytes).expect("decode should succeed");
        let page = codec.page_box(2).expect("page box should resolve");

        assert_eq!(page.rotation, 270);
        assert_eq!(page.size().width_pt, 792.0);
    }

    #[test]
    fn overlay_is_turned_against_page_rotation() {
        let page =
            PageBox { origin_x_pt: 10.0, origin_y_pt: 20.0, rotation: 90, ..PageBox::letter() };
        let rect = PlacementRect::full_page(page);
        assert_eq!(rect.matrix(), [0.0, 792.0, -612.0, 0.0, 622.0, 20.0]);

        let upright = PlacementRect::full_page(PageBox::letter());
        assert_eq!(upright.matrix(), [612.0, 0.0, 0.0, 792.0, 0.0, 0.0]);

        let upside_down = PageBox { rotation: 180, ..PageBox::letter() };
        let source = crate::fixtures::pdf_with_pages(&[upside_down]);
        let mut codec = LopdfCodec::decode(&source).expect("decode should succeed");
        let handle = codec.embed_png(&png_bytes(2, 2)).expect("embed should succeed");
        let rect = PlacementRect::full_page(codec.page_box(1).expect("page box"));
        codec.draw_image(1, handle, rect).expect("draw should succeed");

        let output = Document::load_mem(&codec.encode().expect("encode")).expect("output loads");
        let content = output.get_page_content(output.get_pages()[&1]).expect("page content");
        assert!(String::from_utf8_lossy(&content).contains("-612 0 0 -792 612 792 cm"));
    }
}
