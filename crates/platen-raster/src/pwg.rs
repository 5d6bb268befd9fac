// SPDX-License-Identifier: Apache-2.0
//
// PWG Raster output back-end (PWG 5102.4).
//
// The stream is a 4-byte sync word followed by, per page, a 1796-byte
// page header and the raw pixel rows.

use std::io::{self, Write};

use crate::header::RasterHeader;
use crate::raster::{OutputBackend, PageRect};

/// Big-endian PWG raster sync word.
pub const SYNC_WORD: &[u8; 4] = b"RaS2";

/// Size of the serialized page header.
pub const HEADER_SIZE: usize = 1796;

/// PWG Raster writer: full-page rows, headers per sheet side.
pub struct PwgBackend {
    front: RasterHeader,
    back: RasterHeader,
}

impl PwgBackend {
    pub fn new(front: RasterHeader, back: RasterHeader) -> Self {
        Self { front, back }
    }
}

impl OutputBackend for PwgBackend {
    fn start_job(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(SYNC_WORD)
    }

    fn start_page(&mut self, page: u32, out: &mut dyn Write) -> io::Result<PageRect> {
        // Back header on even pages of a duplex job.
        let header = if self.front.duplex && page % 2 == 0 {
            &self.back
        } else {
            &self.front
        };
        out.write_all(&serialize_header(header))?;

        Ok(PageRect {
            top: 0,
            bottom: self.front.height - 1,
            left: 0,
            right: self.front.width - 1,
        })
    }

    fn write_line(&mut self, _y: u32, row: &[u8], out: &mut dyn Write) -> io::Result<()> {
        debug_assert_eq!(row.len(), self.front.bytes_per_line as usize);
        out.write_all(row)
    }

    fn end_page(&mut self, _page: u32, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn end_job(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.flush()
    }
}

/// Serialize a page header to its 1796-byte wire form.
///
/// Field offsets follow the PWG 5102.4 page header layout; fields this
/// implementation does not populate are zero.
pub fn serialize_header(header: &RasterHeader) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];

    put_cstr(&mut buf, 0, "PwgRaster"); // PwgRaster keyword
    put_cstr(&mut buf, 128, ""); // MediaType
    put_u32(&mut buf, 272, u32::from(header.duplex)); // Duplex
    put_u32(&mut buf, 276, header.resolution.0); // HWResolution (cross-feed)
    put_u32(&mut buf, 280, header.resolution.1); // HWResolution (feed)
    put_u32(&mut buf, 340, 1); // NumCopies
    put_u32(&mut buf, 352, header.page_size.0 as u32); // PageSize width
    put_u32(&mut buf, 356, header.page_size.1 as u32); // PageSize length
    put_u32(&mut buf, 368, u32::from(header.tumble)); // Tumble
    put_u32(&mut buf, 372, header.width); // Width
    put_u32(&mut buf, 376, header.height); // Height
    put_u32(&mut buf, 384, 8); // BitsPerColor
    put_u32(&mut buf, 388, header.bits_per_pixel); // BitsPerPixel
    put_u32(&mut buf, 392, header.bytes_per_line); // BytesPerLine
    put_u32(&mut buf, 396, 0); // ColorOrder (chunky)
    put_u32(&mut buf, 400, header.color_space); // ColorSpace
    put_u32(&mut buf, 420, header.num_colors); // NumColors
    put_f32(&mut buf, 428, header.page_size.0 as f32); // cupsPageSize width
    put_f32(&mut buf, 432, header.page_size.1 as f32); // cupsPageSize length
    put_u32(&mut buf, 452, header.total_pages); // TotalPageCount
    put_u32(&mut buf, 456, header.cross_feed_transform as u32); // CrossFeedTransform
    put_u32(&mut buf, 460, header.feed_transform as u32); // FeedTransform
    put_u32(&mut buf, 468, header.width); // ImageBoxRight
    put_u32(&mut buf, 472, header.height); // ImageBoxBottom
    put_cstr(&mut buf, 1732, &header.media_name); // PageSizeName

    buf
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_cstr(buf: &mut [u8], offset: usize, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(63);
    buf[offset..offset + len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Media;

    fn letter_header() -> RasterHeader {
        let media = Media::for_pwg("na_letter_8.5x11in").expect("letter");
        let mut header = RasterHeader::new(&media, false, 300, 300, "one-sided", None);
        header.total_pages = 1;
        header
    }

    #[test]
    fn header_is_1796_bytes() {
        let bytes = serialize_header(&letter_header());
        assert_eq!(bytes.len(), HEADER_SIZE);
    }

    #[test]
    fn header_fields_at_known_offsets() {
        let bytes = serialize_header(&letter_header());

        assert_eq!(&bytes[0..9], b"PwgRaster");
        let width = u32::from_be_bytes(bytes[372..376].try_into().unwrap());
        let height = u32::from_be_bytes(bytes[376..380].try_into().unwrap());
        let bpl = u32::from_be_bytes(bytes[392..396].try_into().unwrap());
        let cspace = u32::from_be_bytes(bytes[400..404].try_into().unwrap());
        assert_eq!(width, 2550);
        assert_eq!(height, 3300);
        assert_eq!(bpl, 2550);
        assert_eq!(cspace, crate::header::COLOR_SPACE_SGRAY);

        assert_eq!(&bytes[1732..1750], b"na_letter_8.5x11in");
    }

    #[test]
    fn stream_shape_for_one_page() {
        let header = letter_header();
        let mut backend = PwgBackend::new(header.clone(), header.clone());
        let mut out: Vec<u8> = Vec::new();

        backend.start_job(&mut out).expect("start_job");
        let rect = backend.start_page(1, &mut out).expect("start_page");
        assert_eq!(rect.top, 0);
        assert_eq!(rect.bottom, 3299);

        let row = vec![0xFFu8; header.bytes_per_line as usize];
        backend.write_line(0, &row, &mut out).expect("write_line");
        backend.end_page(1, &mut out).expect("end_page");
        backend.end_job(&mut out).expect("end_job");

        assert_eq!(out.len(), 4 + HEADER_SIZE + header.bytes_per_line as usize);
        assert_eq!(&out[..4], SYNC_WORD);
    }

    #[test]
    fn back_header_used_on_even_duplex_pages() {
        let media = Media::for_pwg("na_letter_8.5x11in").expect("letter");
        let front = RasterHeader::new(&media, false, 300, 300, "two-sided-long-edge", None);
        let back =
            RasterHeader::new(&media, false, 300, 300, "two-sided-long-edge", Some("rotated"));
        let mut backend = PwgBackend::new(front, back);

        let mut page1: Vec<u8> = Vec::new();
        backend.start_page(1, &mut page1).expect("page 1");
        let mut page2: Vec<u8> = Vec::new();
        backend.start_page(2, &mut page2).expect("page 2");

        let feed1 = u32::from_be_bytes(page1[460..464].try_into().unwrap()) as i32;
        let feed2 = u32::from_be_bytes(page2[460..464].try_into().unwrap()) as i32;
        assert_eq!(feed1, 1);
        assert_eq!(feed2, -1);
    }
}
