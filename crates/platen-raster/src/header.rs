// SPDX-License-Identifier: Apache-2.0
//
// Raster page header shared by the output back-ends.

use crate::media::Media;

/// `sgray_8` color space identifier (PWG 5102.4 / CUPS sGray).
pub const COLOR_SPACE_SGRAY: u32 = 18;
/// `srgb_8` color space identifier (PWG 5102.4 / CUPS sRGB).
pub const COLOR_SPACE_SRGB: u32 = 19;

/// Everything the back-ends need to know about a page.
///
/// A transform carries two of these: the front header and a back header
/// whose feed transforms compensate for the duplex paper path.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHeader {
    /// PWG self-describing media name.
    pub media_name: String,
    /// Page width in pixels.
    pub width: u32,
    /// Page height in pixels.
    pub height: u32,
    /// Resolution in dots per inch (cross-feed, feed).
    pub resolution: (u32, u32),
    /// Page size in PostScript points (width, length).
    pub page_size: (i32, i32),
    /// 8 for sgray_8, 24 for srgb_8.
    pub bits_per_pixel: u32,
    /// Output bytes per row.
    pub bytes_per_line: u32,
    /// 1 for gray, 3 for sRGB.
    pub num_colors: u32,
    /// PWG color space identifier.
    pub color_space: u32,
    /// Two-sided output.
    pub duplex: bool,
    /// Short-edge duplex.
    pub tumble: bool,
    /// Total pages in the stream (copies included).
    pub total_pages: u32,
    /// Back-side cross-feed direction (+1 / -1).
    pub cross_feed_transform: i32,
    /// Back-side feed direction (+1 / -1).
    pub feed_transform: i32,
}

impl RasterHeader {
    /// Build a header for the given media/type/resolution/sides choice.
    ///
    /// `sheet_back` is `None` for the front header; for the back header it
    /// names the back-side transform keyword from PWG 5102.4.
    pub fn new(
        media: &Media,
        srgb: bool,
        xdpi: u32,
        ydpi: u32,
        sides: &str,
        sheet_back: Option<&str>,
    ) -> Self {
        let (width, height) = media.pixels(xdpi, ydpi);
        let duplex = sides != "one-sided";
        let tumble = sides == "two-sided-short-edge";

        let (cross_feed_transform, feed_transform) = match sheet_back {
            Some("flipped") if tumble => (-1, 1),
            Some("flipped") => (1, -1),
            Some("manual-tumble") if tumble => (-1, -1),
            Some("rotated") if !tumble => (-1, -1),
            _ => (1, 1),
        };

        let (bits_per_pixel, num_colors, color_space) = if srgb {
            (24, 3, COLOR_SPACE_SRGB)
        } else {
            (8, 1, COLOR_SPACE_SGRAY)
        };

        Self {
            media_name: media.name.clone(),
            width,
            height,
            resolution: (xdpi, ydpi),
            page_size: (media.width_points(), media.length_points()),
            bits_per_pixel,
            bytes_per_line: width * bits_per_pixel / 8,
            num_colors,
            color_space,
            duplex,
            tumble,
            total_pages: 0,
            cross_feed_transform,
            feed_transform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter() -> Media {
        Media::for_pwg("na_letter_8.5x11in").expect("letter")
    }

    #[test]
    fn gray_header_geometry() {
        let header = RasterHeader::new(&letter(), false, 300, 300, "one-sided", None);
        assert_eq!(header.width, 2550);
        assert_eq!(header.height, 3300);
        assert_eq!(header.bytes_per_line, 2550);
        assert_eq!(header.bits_per_pixel, 8);
        assert_eq!(header.color_space, COLOR_SPACE_SGRAY);
        assert!(!header.duplex);
    }

    #[test]
    fn srgb_header_geometry() {
        let header = RasterHeader::new(&letter(), true, 300, 300, "one-sided", None);
        assert_eq!(header.bits_per_pixel, 24);
        assert_eq!(header.bytes_per_line, 2550 * 3);
        assert_eq!(header.num_colors, 3);
        assert_eq!(header.color_space, COLOR_SPACE_SRGB);
    }

    #[test]
    fn back_transform_keywords() {
        let media = letter();
        let long_edge = "two-sided-long-edge";
        let short_edge = "two-sided-short-edge";

        let normal = RasterHeader::new(&media, false, 300, 300, long_edge, Some("normal"));
        assert_eq!((normal.cross_feed_transform, normal.feed_transform), (1, 1));

        let flipped = RasterHeader::new(&media, false, 300, 300, long_edge, Some("flipped"));
        assert_eq!((flipped.cross_feed_transform, flipped.feed_transform), (1, -1));

        let flipped_tumble =
            RasterHeader::new(&media, false, 300, 300, short_edge, Some("flipped"));
        assert_eq!(
            (flipped_tumble.cross_feed_transform, flipped_tumble.feed_transform),
            (-1, 1)
        );

        let rotated = RasterHeader::new(&media, false, 300, 300, long_edge, Some("rotated"));
        assert_eq!((rotated.cross_feed_transform, rotated.feed_transform), (-1, -1));

        let manual = RasterHeader::new(&media, false, 300, 300, short_edge, Some("manual-tumble"));
        assert_eq!((manual.cross_feed_transform, manual.feed_transform), (-1, -1));
    }

    #[test]
    fn duplex_flags_follow_sides() {
        let media = letter();
        let duplex = RasterHeader::new(&media, false, 300, 300, "two-sided-long-edge", None);
        assert!(duplex.duplex);
        assert!(!duplex.tumble);

        let tumble = RasterHeader::new(&media, false, 300, 300, "two-sided-short-edge", None);
        assert!(tumble.duplex);
        assert!(tumble.tumble);
    }
}
