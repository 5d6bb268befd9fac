// SPDX-License-Identifier: Apache-2.0
//
// JPEG page source: one decoded bitmap, scaled to fit the printable page.

use std::path::Path;

use image::DynamicImage;
use platen_core::{PlatenError, Result};
use tracing::debug;

use crate::page::{DecodedPage, PageSource};

/// A single decoded JPEG (or PNG) image treated as a one-page document.
pub struct JpegSource {
    image: DynamicImage,
    color: bool,
}

impl JpegSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| PlatenError::Raster(format!("open {}: {e}", path.display())))?;
        let color = image.color().has_color();
        debug!(
            width = image.width(),
            height = image.height(),
            color,
            "image loaded"
        );
        Ok(Self { image, color })
    }
}

impl PageSource for JpegSource {
    fn page_count(&self) -> u32 {
        1
    }

    fn color(&self) -> bool {
        self.color
    }

    fn decode(
        &mut self,
        page: u32,
        color: bool,
        width: u32,
        height: u32,
        _dpi: (u32, u32),
    ) -> Result<DecodedPage> {
        if page != 1 {
            return Err(PlatenError::Raster(format!("page {page} out of range")));
        }

        let mut bitmap = DecodedPage::blank(width, height, color)?;

        // Scale to fit, preserving aspect ratio, centered on the page.
        let source_w = self.image.width().max(1);
        let source_h = self.image.height().max(1);
        let scale = (width as f64 / source_w as f64).min(height as f64 / source_h as f64);
        let dest_w = ((source_w as f64 * scale) as u32).max(1);
        let dest_h = ((source_h as f64 * scale) as u32).max(1);
        let offset_x = (width - dest_w) / 2;
        let offset_y = (height - dest_h) / 2;

        // No interpolation when producing raster data.
        let scaled = self
            .image
            .resize_exact(dest_w, dest_h, image::imageops::FilterType::Nearest)
            .to_rgba8();

        for (x, y, pixel) in scaled.enumerate_pixels() {
            bitmap.put(offset_x + x, offset_y + y, [pixel[0], pixel[1], pixel[2]]);
        }

        Ok(bitmap)
    }
}
