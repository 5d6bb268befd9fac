// SPDX-License-Identifier: Apache-2.0
//
// PWG 5101.1 media sizes.

use platen_core::{PlatenError, Result};

/// A media size; dimensions are in hundredths of millimeters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// PWG self-describing name (e.g. `na_letter_8.5x11in`).
    pub name: String,
    /// Width in hundredths of millimeters.
    pub width: i32,
    /// Length in hundredths of millimeters.
    pub length: i32,
}

impl Media {
    /// Look up a PWG self-describing media name.
    ///
    /// The trailing dimension segment (`8.5x11in`, `210x297mm`) is
    /// authoritative, so any well-formed name resolves without a table.
    pub fn for_pwg(name: &str) -> Option<Self> {
        let dims = name.rsplit('_').next()?;
        let (dims, unit_scale) = if let Some(stripped) = dims.strip_suffix("in") {
            (stripped, 2540.0)
        } else if let Some(stripped) = dims.strip_suffix("mm") {
            (stripped, 100.0)
        } else {
            return None;
        };

        let (w, h) = dims.split_once('x')?;
        let width = (w.parse::<f64>().ok()? * unit_scale).round() as i32;
        let length = (h.parse::<f64>().ok()? * unit_scale).round() as i32;
        if width <= 0 || length <= 0 {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            width,
            length,
        })
    }

    /// Look up a legacy (PPD-style) media name.
    pub fn for_legacy(name: &str) -> Option<Self> {
        let pwg_name = match name.to_ascii_lowercase().as_str() {
            "letter" => "na_letter_8.5x11in",
            "legal" => "na_legal_8.5x14in",
            "executive" => "na_executive_7.25x10.5in",
            "tabloid" | "11x17" => "na_ledger_11x17in",
            "a3" => "iso_a3_297x420mm",
            "a4" => "iso_a4_210x297mm",
            "a5" => "iso_a5_148x210mm",
            "a6" => "iso_a6_105x148mm",
            "b5" => "iso_b5_176x250mm",
            "env10" | "com10" => "na_number-10_4.125x9.5in",
            "envdl" | "dl" => "iso_dl_110x220mm",
            "envc5" | "c5" => "iso_c5_162x229mm",
            "monarch" => "na_monarch_3.875x7.5in",
            _ => return None,
        };
        Self::for_pwg(pwg_name)
    }

    /// Build a custom media entry for explicit dimensions (hundredths of
    /// millimeters, as in `media-size` collections).
    pub fn for_size(width: i32, length: i32) -> Option<Self> {
        if width <= 0 || length <= 0 {
            return None;
        }
        Some(Self {
            name: format!(
                "custom_{}x{}mm",
                trim_zeros(width as f64 / 100.0),
                trim_zeros(length as f64 / 100.0)
            ),
            width,
            length,
        })
    }

    /// Width in PostScript points, rounded.
    pub fn width_points(&self) -> i32 {
        ((self.width as f64) * 72.0 / 2540.0).round() as i32
    }

    /// Length in PostScript points, rounded.
    pub fn length_points(&self) -> i32 {
        ((self.length as f64) * 72.0 / 2540.0).round() as i32
    }

    /// Pixel dimensions at a given resolution.
    pub fn pixels(&self, xdpi: u32, ydpi: u32) -> (u32, u32) {
        (
            (self.width as u64 * xdpi as u64 / 2540) as u32,
            (self.length as u64 * ydpi as u64 / 2540) as u32,
        )
    }
}

fn trim_zeros(value: f64) -> String {
    let text = format!("{value:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Resolve a `media` keyword: PWG name first, then legacy fallback.
pub fn resolve_media(keyword: &str) -> Result<Media> {
    Media::for_pwg(keyword)
        .or_else(|| Media::for_legacy(keyword))
        .ok_or_else(|| PlatenError::Raster(format!("unknown media value '{keyword}'")))
}
