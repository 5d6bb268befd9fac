// SPDX-License-Identifier: Apache-2.0
//
// The banded raster engine: option resolution, band rendering, and row
// dispatch to an output back-end.

use std::io::{self, Write};

use platen_core::{PlatenError, Result};
use tracing::{debug, info};

use crate::header::RasterHeader;
use crate::jpeg::JpegSource;
use crate::media::{self, Media};
use crate::options::Options;
use crate::page::{DecodedPage, PageSource};
use crate::pcl::PclBackend;
use crate::pdf::PdfSource;
use crate::pwg::PwgBackend;

/// Band buffer ceiling in bytes.
const MAX_RASTER: u32 = 16_777_216;

/// The printable area a back-end grants for one page (inclusive pixel
/// bounds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRect {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

/// One output back-end: PWG Raster or PCL.
pub trait OutputBackend {
    fn start_job(&mut self, out: &mut dyn Write) -> io::Result<()>;
    fn start_page(&mut self, page: u32, out: &mut dyn Write) -> io::Result<PageRect>;
    fn write_line(&mut self, y: u32, row: &[u8], out: &mut dyn Write) -> io::Result<()>;
    fn end_page(&mut self, page: u32, out: &mut dyn Write) -> io::Result<()>;
    fn end_job(&mut self, out: &mut dyn Write) -> io::Result<()>;
}

/// Everything the transform needs, assembled from the environment and the
/// command line.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    /// Source MIME type (`application/pdf` or `image/jpeg`).
    pub content_type: String,
    /// Destination MIME type (`image/pwg-raster` or
    /// `application/vnd.hp-pcl`).
    pub output_type: String,
    /// Supported resolutions, e.g. `["150dpi", "300dpi"]`.
    pub resolutions: Vec<String>,
    /// Supported raster types, e.g. `["sgray_8", "srgb_8"]`.
    pub types: Vec<String>,
    /// Back-side transform keyword.
    pub sheet_back: String,
    /// The job option bag.
    pub options: Options,
}

/// Per-job raster parameters resolved from a [`TransformSpec`].
#[derive(Debug, Clone)]
pub struct RasterSetup {
    pub front: RasterHeader,
    pub back: RasterHeader,
    pub copies: u32,
    /// Band bytes per pixel: 1 for gray, 4 for RGBX.
    pub band_bpp: u32,
}

/// Totals reported on stderr while the job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformSummary {
    pub impressions: u32,
    pub media_sheets: u32,
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Resolve copies, media, resolution, color type and sides.
pub fn setup(spec: &TransformSpec, color: bool, pages: u32) -> Result<RasterSetup> {
    let options = &spec.options;

    let copies = match options.get("copies") {
        Some(copies) => {
            let value: i64 = copies
                .parse()
                .map_err(|_| PlatenError::Raster(format!("invalid \"copies\" value '{copies}'")))?;
            if !(1..=9999).contains(&value) {
                return Err(PlatenError::Raster(format!(
                    "invalid \"copies\" value '{copies}'"
                )));
            }
            value as u32
        }
        None => 1,
    };

    let media = resolve_media_choice(options)?;

    // Resolution: explicit printer-resolution when supported, else mapped
    // from print-quality, else the middle of the supported set.
    let resolution = options
        .get("printer-resolution")
        .filter(|r| spec.resolutions.iter().any(|s| s == r))
        .map(String::from)
        .or_else(|| {
            let index = match options.get("print-quality").and_then(|q| q.parse::<i32>().ok()) {
                Some(3) => Some(0),                             // draft
                Some(4) => Some(spec.resolutions.len() / 2),    // normal
                Some(5) => Some(spec.resolutions.len().saturating_sub(1)), // high
                _ => None,
            };
            index.and_then(|i| spec.resolutions.get(i).cloned())
        })
        .or_else(|| spec.resolutions.get(spec.resolutions.len() / 2).cloned())
        .ok_or_else(|| PlatenError::Raster("no supported resolution".into()))?;
    let (xdpi, ydpi) = parse_resolution(&resolution)?;

    let srgb = color && spec.types.iter().any(|t| t == "srgb_8");

    let sides = if pages == 1 {
        "one-sided".to_string()
    } else {
        options
            .get("sides")
            .map(String::from)
            .or_else(|| std::env::var("PRINTER_SIDES_DEFAULT").ok())
            .unwrap_or_else(|| "one-sided".into())
    };

    // Duplex with an odd page count and multiple copies pads the job with
    // one blank back side so copies start on a fresh sheet.
    let mut header_pages = pages;
    if copies > 1 && pages % 2 == 1 && sides != "one-sided" {
        header_pages += 1;
    }

    let mut front = RasterHeader::new(&media, srgb, xdpi, ydpi, &sides, None);
    let mut back = RasterHeader::new(&media, srgb, xdpi, ydpi, &sides, Some(&spec.sheet_back));
    front.total_pages = copies * header_pages;
    back.total_pages = copies * header_pages;

    debug!(
        media = %media.name,
        xdpi,
        ydpi,
        srgb,
        %sides,
        copies,
        "raster setup"
    );

    Ok(RasterSetup {
        front,
        back,
        copies,
        band_bpp: if srgb { 4 } else { 1 },
    })
}

fn resolve_media_choice(options: &Options) -> Result<Media> {
    if let Some(keyword) = options.get("media") {
        return media::resolve_media(keyword);
    }

    if let Some(media_col) = options.get("media-col") {
        let mut cols = Options::new();
        cols.parse(media_col.trim_matches(|c| c == '{' || c == '}'));

        if let Some(name) = cols.get("media-size-name") {
            return Media::for_pwg(name).ok_or_else(|| {
                PlatenError::Raster(format!("unknown \"media-size-name\" value '{name}'"))
            });
        }
        if let Some(size) = cols.get("media-size") {
            let mut dims = Options::new();
            dims.parse(size.trim_matches(|c| c == '{' || c == '}'));
            let x = dims.get("x-dimension").and_then(|v| v.parse::<i32>().ok());
            let y = dims.get("y-dimension").and_then(|v| v.parse::<i32>().ok());
            return match (x, y) {
                (Some(x), Some(y)) => Media::for_size(x, y).ok_or_else(|| {
                    PlatenError::Raster(format!("bad \"media-size\" value '{size}'"))
                }),
                _ => Err(PlatenError::Raster(format!(
                    "bad \"media-size\" value '{size}'"
                ))),
            };
        }
    }

    let default = std::env::var("PRINTER_MEDIA_DEFAULT")
        .unwrap_or_else(|_| "na_letter_8.5x11in".into());
    Media::for_pwg(&default)
        .ok_or_else(|| PlatenError::Raster(format!("unknown \"media-default\" value '{default}'")))
}

/// Parse `WxHdpi` or `Ndpi`.
pub fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let stripped = value
        .strip_suffix("dpi")
        .ok_or_else(|| PlatenError::Raster(format!("bad resolution value '{value}'")))?;

    let (x, y) = match stripped.split_once('x') {
        Some((x, y)) => (x, y),
        None => (stripped, stripped),
    };
    let xdpi: u32 = x
        .parse()
        .map_err(|_| PlatenError::Raster(format!("bad resolution value '{value}'")))?;
    let ydpi: u32 = y
        .parse()
        .map_err(|_| PlatenError::Raster(format!("bad resolution value '{value}'")))?;
    if xdpi == 0 || ydpi == 0 {
        return Err(PlatenError::Raster(format!("bad resolution value '{value}'")));
    }
    Ok((xdpi, ydpi))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Run a full transform: open the document, render every page of every
/// copy, and write the output stream.
pub fn run_transform(
    filename: &str,
    spec: &TransformSpec,
    out: &mut dyn Write,
) -> Result<TransformSummary> {
    let mut source: Box<dyn PageSource> = match spec.content_type.as_str() {
        "application/pdf" => Box::new(PdfSource::open(filename)?),
        "image/jpeg" | "image/png" => Box::new(JpegSource::open(filename)?),
        other => {
            return Err(PlatenError::UnsupportedDocument(format!(
                "unsupported format \"{other}\" for \"{filename}\""
            )))
        }
    };

    let pages = source.page_count();
    let color = source.color();
    let raster = setup(spec, color, pages)?;

    let mut backend: Box<dyn OutputBackend> = match spec.output_type.as_str() {
        "application/vnd.hp-pcl" => Box::new(PclBackend::new(raster.front.clone())),
        "image/pwg-raster" => Box::new(PwgBackend::new(
            raster.front.clone(),
            raster.back.clone(),
        )),
        other => {
            return Err(PlatenError::UnsupportedDocument(format!(
                "unsupported output format \"{other}\""
            )))
        }
    };

    let srgb = raster.band_bpp == 4;
    let width = raster.front.width;
    let height = raster.front.height;
    let band_size = (width * raster.band_bpp) as usize;
    let band_height = (MAX_RASTER / band_size as u32).clamp(1, height);
    let mut band = vec![0xFFu8; band_height as usize * band_size];
    let mut summary = TransformSummary::default();

    debug!(width, height, band_height, pages, "starting render");

    backend.start_job(out).map_err(stream_error)?;

    for copy in 0..raster.copies {
        for page in 1..=pages {
            let decoded = source.decode(page, srgb, width, height, raster.front.resolution)?;
            let rect = backend.start_page(page, out).map_err(stream_error)?;
            let back_side = raster.front.duplex && page % 2 == 0;

            debug!(copy = copy + 1, page, "rendering page");

            let mut band_start = 0u32;
            let mut band_end = 0u32;
            for y in rect.top..=rect.bottom {
                if y >= band_end {
                    band_start = y;
                    band_end = (y + band_height).min(rect.bottom + 1);
                    fill_band(
                        &mut band[..(band_end - band_start) as usize * band_size],
                        band_start,
                        &decoded,
                        back_side.then_some(&raster.back),
                    );
                }

                let row_pixels = (rect.right - rect.left + 1) as usize;
                let offset = (y - band_start) as usize * band_size
                    + rect.left as usize * raster.band_bpp as usize;
                if srgb {
                    pack_pixels(&mut band[offset..offset + 4 * row_pixels], row_pixels);
                    backend
                        .write_line(y, &band[offset..offset + 3 * row_pixels], out)
                        .map_err(stream_error)?;
                } else {
                    backend
                        .write_line(y, &band[offset..offset + row_pixels], out)
                        .map_err(stream_error)?;
                }
            }

            backend.end_page(page, out).map_err(stream_error)?;
            report_progress(&mut summary, &raster.front, page);
        }

        // Duplex with an odd page count: pad each copy with a blank back
        // side so the next copy starts on a fresh sheet.
        if raster.copies > 1 && pages % 2 == 1 && raster.front.duplex {
            let page = pages + 1;
            let rect = backend.start_page(page, out).map_err(stream_error)?;
            let row_pixels = (rect.right - rect.left + 1) as usize;
            let row_len = if srgb { 3 * row_pixels } else { row_pixels };
            let blank_row = vec![0xFFu8; row_len];
            for y in rect.top..=rect.bottom {
                backend
                    .write_line(y, &blank_row, out)
                    .map_err(stream_error)?;
            }
            backend.end_page(page, out).map_err(stream_error)?;
            report_progress(&mut summary, &raster.front, page);
        }
    }

    backend.end_job(out).map_err(stream_error)?;

    info!(
        impressions = summary.impressions,
        sheets = summary.media_sheets,
        "transform complete"
    );
    Ok(summary)
}

/// Emit the `ATTR:` progress lines the parent server parses.
fn report_progress(summary: &mut TransformSummary, header: &RasterHeader, page: u32) {
    summary.impressions += 1;
    eprintln!("ATTR: job-impressions-completed={}", summary.impressions);
    if !header.duplex || page % 2 == 0 {
        summary.media_sheets += 1;
        eprintln!("ATTR: job-media-sheets-completed={}", summary.media_sheets);
    }
}

/// Reset a band to white and draw the page rows covering it, applying the
/// back-side transform when rendering the back face of a duplex sheet.
fn fill_band(band: &mut [u8], band_start: u32, page: &DecodedPage, back: Option<&RasterHeader>) {
    band.fill(0xFF);

    let bpp = page.bytes_per_pixel;
    let width = page.width;
    let rows = band.len() / (width as usize * bpp);

    let (flip_x, flip_y) = match back {
        Some(header) => (header.cross_feed_transform < 0, header.feed_transform < 0),
        None => (false, false),
    };

    for band_row in 0..rows as u32 {
        let y = band_start + band_row;
        if y >= page.height {
            break;
        }
        let source_y = if flip_y { page.height - 1 - y } else { y };
        let dest_start = band_row as usize * width as usize * bpp;
        let dest = &mut band[dest_start..dest_start + width as usize * bpp];

        if flip_x {
            let source = page.row(source_y);
            for x in 0..width as usize {
                let sx = width as usize - 1 - x;
                dest[x * bpp..(x + 1) * bpp]
                    .copy_from_slice(&source[sx * bpp..(sx + 1) * bpp]);
            }
        } else {
            dest.copy_from_slice(page.row(source_y));
        }
    }
}

/// Pack RGBX pixels to RGB in place.
fn pack_pixels(row: &mut [u8], num_pixels: usize) {
    for i in 0..num_pixels {
        let src = i * 4;
        let dst = i * 3;
        row[dst] = row[src];
        row[dst + 1] = row[src + 1];
        row[dst + 2] = row[src + 2];
    }
}

fn stream_error(e: io::Error) -> PlatenError {
    PlatenError::Raster(format!("write output: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(options: &str) -> TransformSpec {
        let mut bag = Options::new();
        bag.parse(options);
        TransformSpec {
            content_type: "application/pdf".into(),
            output_type: "image/pwg-raster".into(),
            resolutions: vec!["150dpi".into(), "300dpi".into(), "600dpi".into()],
            types: vec!["sgray_8".into(), "srgb_8".into()],
            sheet_back: "normal".into(),
            options: bag,
        }
    }

    #[test]
    fn copies_bounds() {
        assert!(setup(&spec_with("media=na_letter_8.5x11in copies=0"), false, 1).is_err());
        assert!(setup(&spec_with("media=na_letter_8.5x11in copies=10000"), false, 1).is_err());
        let ok = setup(&spec_with("media=na_letter_8.5x11in copies=9999"), false, 1)
            .expect("setup");
        assert_eq!(ok.copies, 9999);
    }

    #[test]
    fn quality_selects_resolution() {
        let draft = setup(&spec_with("media=na_letter_8.5x11in print-quality=3"), false, 1)
            .expect("setup");
        assert_eq!(draft.front.resolution, (150, 150));

        let normal = setup(&spec_with("media=na_letter_8.5x11in print-quality=4"), false, 1)
            .expect("setup");
        assert_eq!(normal.front.resolution, (300, 300));

        let high = setup(&spec_with("media=na_letter_8.5x11in print-quality=5"), false, 1)
            .expect("setup");
        assert_eq!(high.front.resolution, (600, 600));

        // Unset quality: middle of the set.
        let default = setup(&spec_with("media=na_letter_8.5x11in"), false, 1).expect("setup");
        assert_eq!(default.front.resolution, (300, 300));
    }

    #[test]
    fn explicit_resolution_must_be_supported() {
        let supported = setup(
            &spec_with("media=na_letter_8.5x11in printer-resolution=600dpi"),
            false,
            1,
        )
        .expect("setup");
        assert_eq!(supported.front.resolution, (600, 600));

        // Unsupported value falls back to the middle.
        let fallback = setup(
            &spec_with("media=na_letter_8.5x11in printer-resolution=1200dpi"),
            false,
            1,
        )
        .expect("setup");
        assert_eq!(fallback.front.resolution, (300, 300));
    }

    #[test]
    fn resolution_parsing() {
        assert_eq!(parse_resolution("300dpi").expect("parse"), (300, 300));
        assert_eq!(parse_resolution("600x300dpi").expect("parse"), (600, 300));
        assert!(parse_resolution("300").is_err());
        assert!(parse_resolution("fastdpi").is_err());
    }

    #[test]
    fn color_requires_srgb_support() {
        let srgb = setup(&spec_with("media=na_letter_8.5x11in"), true, 1).expect("setup");
        assert_eq!(srgb.band_bpp, 4);
        assert_eq!(srgb.front.bits_per_pixel, 24);

        let mut gray_spec = spec_with("media=na_letter_8.5x11in");
        gray_spec.types = vec!["sgray_8".into()];
        let gray = setup(&gray_spec, true, 1).expect("setup");
        assert_eq!(gray.band_bpp, 1);
        assert_eq!(gray.front.bits_per_pixel, 8);
    }

    #[test]
    fn single_page_forces_one_sided() {
        let duplex_requested = setup(
            &spec_with("media=na_letter_8.5x11in sides=two-sided-long-edge"),
            false,
            1,
        )
        .expect("setup");
        assert!(!duplex_requested.front.duplex);
    }

    #[test]
    fn duplex_odd_pages_pad_total_count() {
        let padded = setup(
            &spec_with("media=na_letter_8.5x11in sides=two-sided-long-edge copies=2"),
            false,
            3,
        )
        .expect("setup");
        assert_eq!(padded.front.total_pages, 2 * 4);

        let unpadded = setup(
            &spec_with("media=na_letter_8.5x11in sides=two-sided-long-edge copies=1"),
            false,
            3,
        )
        .expect("setup");
        assert_eq!(unpadded.front.total_pages, 3);
    }

    #[test]
    fn media_col_size_name() {
        let by_name = setup(
            &spec_with("media-col={media-size-name=iso_a4_210x297mm}"),
            false,
            1,
        )
        .expect("setup");
        assert_eq!(by_name.front.page_size.1, 842);
    }

    #[test]
    fn media_col_explicit_size() {
        let by_size = setup(
            &spec_with("media-col={media-size={x-dimension=21590 y-dimension=27940}}"),
            false,
            1,
        )
        .expect("setup");
        assert_eq!(by_size.front.width, 2550);
    }

    #[test]
    fn unknown_media_is_an_error() {
        assert!(setup(&spec_with("media=no_such_size"), false, 1).is_err());
    }

    #[test]
    fn band_fill_applies_back_transforms() {
        let mut page = DecodedPage::blank(4, 4, false).expect("page");
        // Mark the top-left pixel.
        page.put(0, 0, [0, 0, 0]);

        let media = Media::for_pwg("na_letter_8.5x11in").expect("letter");
        let rotated = RasterHeader::new(
            &media,
            false,
            300,
            300,
            "two-sided-long-edge",
            Some("rotated"),
        );

        // Full-page band, 180° rotation: the mark lands bottom-right.
        let mut band = vec![0u8; 16];
        fill_band(&mut band, 0, &page, Some(&rotated));
        assert_eq!(band[15], 0);
        assert_eq!(band[0], 0xFF);

        // Identity: mark stays top-left.
        fill_band(&mut band, 0, &page, None);
        assert_eq!(band[0], 0);
        assert_eq!(band[15], 0xFF);
    }

    #[test]
    fn pack_pixels_in_place() {
        let mut row = vec![1, 2, 3, 0xAA, 4, 5, 6, 0xBB, 7, 8, 9, 0xCC];
        pack_pixels(&mut row, 3);
        assert_eq!(&row[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
