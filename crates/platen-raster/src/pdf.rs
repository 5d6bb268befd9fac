// SPDX-License-Identifier: Apache-2.0
//
// PDF page source.
//
// Uses `lopdf` for the document structure and a minimal content-stream
// walk (graphics state stack, `cm`, `Do`) that composites embedded image
// XObjects into the page bitmap. Vector content other than images is not
// painted; the page background stays white.

use std::path::Path;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use platen_core::{PlatenError, Result};
use tracing::{debug, warn};

use crate::page::{DecodedPage, PageSource, Transform2D};

/// An open PDF document.
pub struct PdfSource {
    document: Document,
    /// 1-indexed page number to page object id.
    pages: Vec<(u32, ObjectId)>,
}

impl PdfSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = Document::load(path)
            .map_err(|e| PlatenError::Raster(format!("open {}: {e}", path.display())))?;

        if document.is_encrypted() {
            return Err(PlatenError::Raster(
                "document is encrypted and cannot be unlocked".into(),
            ));
        }

        let pages: Vec<(u32, ObjectId)> = document.get_pages().into_iter().collect();
        if pages.is_empty() {
            return Err(PlatenError::Raster("document has no pages".into()));
        }

        debug!(pages = pages.len(), "PDF loaded");
        Ok(Self { document, pages })
    }

    fn page_id(&self, page: u32) -> Result<ObjectId> {
        self.pages
            .iter()
            .find(|(number, _)| *number == page)
            .map(|(_, id)| *id)
            .ok_or_else(|| PlatenError::Raster(format!("page {page} out of range")))
    }

    /// CropBox (falling back to MediaBox) in points, resolving page-tree
    /// inheritance.
    fn crop_box(&self, page_id: ObjectId) -> [f64; 4] {
        self.inherited_box(page_id, b"CropBox")
            .or_else(|| self.inherited_box(page_id, b"MediaBox"))
            .unwrap_or([0.0, 0.0, 612.0, 792.0])
    }

    fn inherited_box(&self, page_id: ObjectId, key: &[u8]) -> Option<[f64; 4]> {
        let mut current = page_id;
        for _ in 0..32 {
            let dict = self.document.get_dictionary(current).ok()?;
            if let Ok(obj) = dict.get(key) {
                let values = self.resolve(obj)?.as_array().ok()?.clone();
                if values.len() == 4 {
                    let mut boxed = [0.0f64; 4];
                    for (slot, value) in boxed.iter_mut().zip(values.iter()) {
                        *slot = number(self.resolve(value)?)?;
                    }
                    return Some(boxed);
                }
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => current = *parent,
                _ => return None,
            }
        }
        None
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(id) => self.document.get_object(*id).ok(),
            other => Some(other),
        }
    }

    /// Look up an image XObject stream by name in the page's resources.
    fn image_xobject(&self, page_id: ObjectId, name: &[u8]) -> Option<&lopdf::Stream> {
        let resources = self.inherited_dict(page_id, b"Resources")?;
        let xobjects = match self.resolve(resources.get(b"XObject").ok()?)? {
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        match self.resolve(xobjects.get(name).ok()?)? {
            Object::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    fn inherited_dict(&self, page_id: ObjectId, key: &[u8]) -> Option<&Dictionary> {
        let mut current = page_id;
        for _ in 0..32 {
            let dict = self.document.get_dictionary(current).ok()?;
            if let Ok(obj) = dict.get(key) {
                if let Some(Object::Dictionary(found)) = self.resolve(obj) {
                    return Some(found);
                }
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => current = *parent,
                _ => return None,
            }
        }
        None
    }
}

impl PageSource for PdfSource {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn color(&self) -> bool {
        // PDF content is treated as potentially colored.
        true
    }

    fn decode(
        &mut self,
        page: u32,
        color: bool,
        width: u32,
        height: u32,
        dpi: (u32, u32),
    ) -> Result<DecodedPage> {
        let page_id = self.page_id(page)?;
        let crop = self.crop_box(page_id);
        let mut bitmap = DecodedPage::blank(width, height, color)?;

        // Aspect-preserving fit of the crop box onto the device page,
        // centered, never scaling up past 1:1.
        let crop_w = (crop[2] - crop[0]).abs().max(1.0);
        let crop_h = (crop[3] - crop[1]).abs().max(1.0);
        let xscale = dpi.0 as f64 / 72.0;
        let yscale = dpi.1 as f64 / 72.0;
        let fit = (width as f64 / (crop_w * xscale))
            .min(height as f64 / (crop_h * yscale))
            .min(1.0);
        let offset_x = (width as f64 - crop_w * xscale * fit) / 2.0;
        let offset_y = (height as f64 - crop_h * yscale * fit) / 2.0;

        // Points (y up, crop origin) to device pixels (y down).
        let page_to_device = Transform2D::new(
            xscale * fit,
            0.0,
            0.0,
            -yscale * fit,
            offset_x - crop[0] * xscale * fit,
            height as f64 - offset_y + crop[1] * yscale * fit,
        );

        let content_data = self
            .document
            .get_page_content(page_id)
            .map_err(|e| PlatenError::Raster(format!("page {page} content: {e}")))?;
        let content = Content::decode(&content_data)
            .map_err(|e| PlatenError::Raster(format!("page {page} content parse: {e}")))?;

        let mut ctm = Transform2D::IDENTITY;
        let mut stack: Vec<Transform2D> = Vec::new();

        for operation in &content.operations {
            match operation.operator.as_str() {
                "q" => stack.push(ctm),
                "Q" => ctm = stack.pop().unwrap_or(Transform2D::IDENTITY),
                "cm" => {
                    if operation.operands.len() == 6 {
                        let mut m = [0.0f64; 6];
                        let mut ok = true;
                        for (slot, operand) in m.iter_mut().zip(&operation.operands) {
                            match number(operand) {
                                Some(v) => *slot = v,
                                None => ok = false,
                            }
                        }
                        if ok {
                            ctm = Transform2D::new(m[0], m[1], m[2], m[3], m[4], m[5]).then(&ctm);
                        }
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = operation.operands.first() {
                        let stream = match self.image_xobject(page_id, name) {
                            Some(stream) => stream.clone(),
                            None => continue,
                        };
                        let placement = ctm.then(&page_to_device);
                        if let Err(e) = draw_image(&stream, &placement, &mut bitmap) {
                            warn!(page, error = %e, "skipping undrawable image");
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(bitmap)
    }
}

/// Composite one image XObject into the page bitmap.
///
/// The image's unit square is mapped through `placement`; device pixels
/// inside the destination quad sample the source by inverse transform
/// (nearest neighbor, no interpolation).
fn draw_image(
    stream: &lopdf::Stream,
    placement: &Transform2D,
    bitmap: &mut DecodedPage,
) -> Result<()> {
    let image = decode_image(stream)?;
    let inverse = placement
        .invert()
        .ok_or_else(|| PlatenError::Raster("degenerate image placement".into()))?;

    // Bounding box of the destination quad, clipped to the page.
    let corners = [
        placement.apply(0.0, 0.0),
        placement.apply(1.0, 0.0),
        placement.apply(0.0, 1.0),
        placement.apply(1.0, 1.0),
    ];
    let min_x = corners.iter().map(|c| c.0).fold(f64::MAX, f64::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f64::MAX, f64::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f64::MIN, f64::max).ceil() as i64)
        .clamp(0, bitmap.width as i64) as u32;
    let max_y = (corners.iter().map(|c| c.1).fold(f64::MIN, f64::max).ceil() as i64)
        .clamp(0, bitmap.height as i64) as u32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (u, v) = inverse.apply(x as f64 + 0.5, y as f64 + 0.5);
            if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                continue;
            }
            // Image space: v = 1 at the top row.
            let sx = (u * image.width() as f64) as u32;
            let sy = ((1.0 - v) * image.height() as f64) as u32;
            let sx = sx.min(image.width() - 1);
            let sy = sy.min(image.height() - 1);
            let pixel = image.get_pixel(sx, sy);
            bitmap.put(x, y, [pixel[0], pixel[1], pixel[2]]);
        }
    }
    Ok(())
}

/// Decode an image XObject to RGBA.
fn decode_image(stream: &lopdf::Stream) -> Result<image::RgbaImage> {
    let dict = &stream.dict;
    let filter = dict
        .get(b"Filter")
        .ok()
        .and_then(|f| match f {
            Object::Name(name) => Some(name.clone()),
            Object::Array(items) => items.first().and_then(|first| match first {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            }),
            _ => None,
        })
        .unwrap_or_default();

    if filter == b"DCTDecode" {
        let decoded = image::load_from_memory(&stream.content)
            .map_err(|e| PlatenError::Raster(format!("embedded JPEG: {e}")))?;
        return Ok(decoded.to_rgba8());
    }

    // FlateDecode (or raw) sample data; 8-bit DeviceRGB / DeviceGray only.
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let width = dict
        .get(b"Width")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0) as u32;
    let height = dict
        .get(b"Height")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0) as u32;
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if width == 0 || height == 0 || bits != 8 {
        return Err(PlatenError::Raster(format!(
            "unsupported image geometry {width}x{height}x{bits}"
        )));
    }

    let pixels = (width * height) as usize;
    if data.len() >= pixels * 3 {
        let mut rgba = image::RgbaImage::new(width, height);
        for (index, pixel) in rgba.pixels_mut().enumerate() {
            let offset = index * 3;
            *pixel = image::Rgba([data[offset], data[offset + 1], data[offset + 2], 255]);
        }
        Ok(rgba)
    } else if data.len() >= pixels {
        let mut rgba = image::RgbaImage::new(width, height);
        for (index, pixel) in rgba.pixels_mut().enumerate() {
            let v = data[index];
            *pixel = image::Rgba([v, v, v, 255]);
        }
        Ok(rgba)
    } else {
        Err(PlatenError::Raster(format!(
            "image data too short: {} bytes for {width}x{height}",
            data.len()
        )))
    }
}

/// A numeric operand.
fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(v) => Some(*v as f64),
        Object::Real(v) => Some(*v as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use std::io::Write as _;

    /// A minimal single-page blank PDF.
    fn blank_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Object::Stream(lopdf::Stream::new(
            lopdf::dictionary! {},
            Vec::new(),
        )));
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
            "Contents" => Object::Reference(content_id),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("serialize PDF");
        bytes
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(bytes).expect("write");
        file
    }

    #[test]
    fn open_counts_pages() {
        let file = write_temp(&blank_pdf());
        let source = PdfSource::open(file.path()).expect("open");
        assert_eq!(source.page_count(), 1);
        assert!(source.color());
    }

    #[test]
    fn blank_page_decodes_white() {
        let file = write_temp(&blank_pdf());
        let mut source = PdfSource::open(file.path()).expect("open");
        let page = source
            .decode(1, false, 255, 330, (30, 30))
            .expect("decode");
        assert!(page.pixels.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn out_of_range_page_is_an_error() {
        let file = write_temp(&blank_pdf());
        let mut source = PdfSource::open(file.path()).expect("open");
        assert!(source.decode(2, false, 100, 100, (30, 30)).is_err());
    }
}
