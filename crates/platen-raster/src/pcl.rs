// SPDX-License-Identifier: Apache-2.0
//
// HP PCL output back-end: ordered dither to 1 bit, PackBits compression,
// raster-graphics escape sequences.

use std::io::{self, Write};

use crate::dither::THRESHOLD;
use crate::header::RasterHeader;
use crate::packbits;
use crate::raster::{OutputBackend, PageRect};

/// PCL writer state for one job.
pub struct PclBackend {
    header: RasterHeader,
    rect: PageRect,
    /// Dithered 1-bit row.
    row_buffer: Vec<u8>,
    /// PackBits scratch buffer.
    comp_buffer: Vec<u8>,
    /// Consecutive blank rows awaiting an `ESC *b{N}Y` skip.
    blank_rows: u32,
}

impl PclBackend {
    pub fn new(header: RasterHeader) -> Self {
        Self {
            header,
            rect: PageRect::default(),
            row_buffer: Vec::new(),
            comp_buffer: Vec::new(),
            blank_rows: 0,
        }
    }

    /// PCL paper code for a page length in PostScript points.
    fn paper_code(length_points: i32) -> Option<u32> {
        match length_points {
            540 => Some(80),   // Monarch envelope
            595 => Some(25),   // A5
            624 => Some(90),   // DL envelope
            649 => Some(91),   // C5 envelope
            684 => Some(81),   // COM-10 envelope
            709 => Some(100),  // B5 envelope
            756 => Some(1),    // Executive
            792 => Some(2),    // Letter
            842 => Some(26),   // A4
            1008 => Some(3),   // Legal
            1191 => Some(27),  // A3
            1224 => Some(6),   // Tabloid
            _ => None,
        }
    }

    fn flush_blanks(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.blank_rows > 0 {
            write!(out, "\x1b*b{}Y", self.blank_rows)?;
            self.blank_rows = 0;
        }
        Ok(())
    }
}

impl OutputBackend for PclBackend {
    fn start_job(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(b"\x1bE")
    }

    fn start_page(&mut self, page: u32, out: &mut dyn Write) -> io::Result<PageRect> {
        let (xdpi, ydpi) = self.header.resolution;

        // 1/6" top and bottom margins; 1/4" sides, except A4 which gets
        // symmetric margins exposing an 8" print area.
        let top = ydpi / 6;
        let bottom = self.header.height - ydpi / 6 - 1;
        let (left, right) = if self.header.page_size.1 == 842 {
            let left = (self.header.width - 8 * xdpi) / 2;
            (left, left + 8 * xdpi - 1)
        } else {
            (xdpi / 4, self.header.width - xdpi / 4 - 1)
        };
        self.rect = PageRect {
            top,
            bottom,
            left,
            right,
        };

        if !self.header.duplex || page % 2 == 1 {
            write!(out, "\x1b&l12D\x1b&k12H")?; // 12 LPI, 10 CPI
            write!(out, "\x1b&l0O")?; // portrait orientation

            if let Some(code) = Self::paper_code(self.header.page_size.1) {
                write!(out, "\x1b&l{code}A")?;
            }

            // Top margin in lines, perforation skip off.
            write!(out, "\x1b&l{}E\x1b&l0L", 12 * top / ydpi)?;

            if self.header.duplex {
                let mode = 1 + u32::from(self.header.tumble);
                write!(out, "\x1b&l{mode}S")?;
            }
        } else {
            write!(out, "\x1b&a2G")?; // print on back side
        }

        write!(out, "\x1b*t{xdpi}R")?; // resolution
        write!(out, "\x1b*r{}S", right - left + 1)?; // raster width
        write!(out, "\x1b*r{}T", bottom - top + 1)?; // raster height
        write!(out, "\x1b&a0H\x1b&a{}V", 720 * top / ydpi)?; // position
        write!(out, "\x1b*b2M")?; // PackBits compression
        write!(out, "\x1b*r1A")?; // start graphics

        self.blank_rows = 0;
        self.row_buffer = vec![0u8; ((right - left + 8) / 8) as usize];
        self.comp_buffer.clear();

        Ok(self.rect)
    }

    fn write_line(&mut self, y: u32, row: &[u8], out: &mut dyn Write) -> io::Result<()> {
        // Blank-row detection: 0xFF repeated across the printable width.
        if row[0] == 0xFF && row.iter().all(|&b| b == 0xFF) {
            self.blank_rows += 1;
            return Ok(());
        }

        // Dither gray to 1 bit, MSB first.
        let y_index = (y & 63) as usize;
        let mut out_index = 0;
        let mut bit: u8 = 128;
        let mut byte: u8 = 0;
        for (offset, &source) in row.iter().enumerate() {
            let x = self.rect.left as usize + offset;
            if source <= THRESHOLD[x & 63][y_index] {
                byte |= bit;
            }
            if bit == 1 {
                self.row_buffer[out_index] = byte;
                out_index += 1;
                byte = 0;
                bit = 128;
            } else {
                bit >>= 1;
            }
        }
        if bit != 128 {
            self.row_buffer[out_index] = byte;
            out_index += 1;
        }

        packbits::encode(&self.row_buffer[..out_index], &mut self.comp_buffer);

        self.flush_blanks(out)?;
        write!(out, "\x1b*b{}W", self.comp_buffer.len())?;
        out.write_all(&self.comp_buffer)
    }

    fn end_page(&mut self, page: u32, out: &mut dyn Write) -> io::Result<()> {
        self.flush_blanks(out)?;
        out.write_all(b"\x1b*r0B")?; // end graphics

        // Form-feed, except on odd pages of a duplex job (the back side
        // shares the sheet).
        if !(self.header.duplex && page % 2 == 1) {
            out.write_all(b"\x0c")?;
        }
        Ok(())
    }

    fn end_job(&mut self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(b"\x1bE")?;
        out.flush()
    }
}
