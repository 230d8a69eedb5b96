//! Small in-memory PDFs for tests.

use crate::PageBox;
use lopdf::{dictionary, Document, Object, Stream};

/// A two page US Letter document; each page fills a different grey square.
pub fn two_page_pdf() -> Vec<u8> {
    pdf_with_pages(&[PageBox::letter(), PageBox::letter()])
}

pub fn pdf_with_pages(boxes: &[PageBox]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(boxes.len());
    for (index, page_box) in boxes.iter().enumerate() {
        let shade = 0.2 + 0.2 * index as f32;
        let content = format!("{shade} g\n100 100 200 200 re f\n");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let media_box: Vec<Object> = vec![
            page_box.origin_x_pt.into(),
            page_box.origin_y_pt.into(),
            (page_box.origin_x_pt + page_box.width_pt).into(),
            (page_box.origin_y_pt + page_box.height_pt).into(),
        ];

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box,
            "Contents" => content_id,
        };
        if page_box.rotation != 0 {
            page.set("Rotate", page_box.rotation as i64);
        }
        let page_id = doc.add_object(page);
        kids.push(Object::Reference(page_id));
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "Resources" => dictionary! {},
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    if let Err(err) = doc.save_to(&mut bytes) {
        panic!("fixture document should serialize: {err}");
    }
    bytes
}
