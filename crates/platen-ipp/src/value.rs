// SPDX-License-Identifier: Apache-2.0
//
// Typed IPP attribute values.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::attribute::IppAttribute;

/// IPP dateTime value (RFC 2579 DateAndTime, 11 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IppDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub deciseconds: u8,
    /// b'+' or b'-'.
    pub utc_direction: u8,
    pub utc_hours: u8,
    pub utc_minutes: u8,
}

impl IppDateTime {
    /// Encode to the 11-byte wire form.
    pub fn to_bytes(self) -> [u8; 11] {
        let [year_hi, year_lo] = self.year.to_be_bytes();
        [
            year_hi,
            year_lo,
            self.month,
            self.day,
            self.hour,
            self.minutes,
            self.seconds,
            self.deciseconds,
            self.utc_direction,
            self.utc_hours,
            self.utc_minutes,
        ]
    }

    /// Decode from the 11-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 11 {
            return None;
        }
        Some(Self {
            year: u16::from_be_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            hour: bytes[4],
            minutes: bytes[5],
            seconds: bytes[6],
            deciseconds: bytes[7],
            utc_direction: bytes[8],
            utc_hours: bytes[9],
            utc_minutes: bytes[10],
        })
    }
}

impl From<DateTime<Utc>> for IppDateTime {
    fn from(when: DateTime<Utc>) -> Self {
        Self {
            year: when.year() as u16,
            month: when.month() as u8,
            day: when.day() as u8,
            hour: when.hour() as u8,
            minutes: when.minute() as u8,
            seconds: when.second() as u8,
            deciseconds: (when.timestamp_subsec_millis() / 100) as u8,
            utc_direction: b'+',
            utc_hours: 0,
            utc_minutes: 0,
        }
    }
}

/// One IPP attribute value.
///
/// The string families keep their distinct tags at the attribute level; at
/// the value level they all carry text.
#[derive(Debug, Clone, PartialEq)]
pub enum IppValue {
    Integer(i32),
    Boolean(bool),
    Enum(i32),
    OctetString(Vec<u8>),
    DateTime(IppDateTime),
    /// Cross-feed dpi, feed dpi, units (3 = dots-per-inch, 4 = dots-per-cm).
    Resolution {
        cross_feed: i32,
        feed: i32,
        units: i8,
    },
    Range {
        lower: i32,
        upper: i32,
    },
    /// Member attributes of a collection, in order.
    Collection(Vec<IppAttribute>),
    /// Any character-string value (text, name, keyword, uri, ...).
    Text(String),
    /// Out-of-band: no-value / unknown / unsupported carry no payload.
    OutOfBand,
}

impl IppValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Integer(v) | Self::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Textual rendering used for `IPP_*` environment variables and
    /// logging; collections render as `{name=value ...}`.
    pub fn render(&self) -> String {
        match self {
            Self::Integer(v) | Self::Enum(v) => v.to_string(),
            Self::Boolean(v) => if *v { "true" } else { "false" }.to_string(),
            Self::OctetString(bytes) => format!("<{} bytes>", bytes.len()),
            Self::DateTime(dt) => format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
                dt.year, dt.month, dt.day, dt.hour, dt.minutes, dt.seconds
            ),
            Self::Resolution {
                cross_feed,
                feed,
                units,
            } => {
                let suffix = if *units == 4 { "dpcm" } else { "dpi" };
                if cross_feed == feed {
                    format!("{cross_feed}{suffix}")
                } else {
                    format!("{cross_feed}x{feed}{suffix}")
                }
            }
            Self::Range { lower, upper } => format!("{lower}-{upper}"),
            Self::Collection(members) => {
                let inner: Vec<String> = members
                    .iter()
                    .map(|m| format!("{}={}", m.name, m.render_values()))
                    .collect();
                format!("{{{}}}", inner.join(" "))
            }
            Self::Text(s) => s.clone(),
            Self::OutOfBand => String::new(),
        }
    }
}
