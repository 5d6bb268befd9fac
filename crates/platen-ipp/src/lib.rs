// SPDX-License-Identifier: Apache-2.0
//
// IPP/2.0 binary codec (RFC 8010).
//
// The wire format is a fixed 8-byte header followed by tagged attribute
// groups and an end-of-attributes tag; anything after that is document
// data:
//
// ```text
// version-number:  2 bytes (major, minor)
// operation-id or status-code: 2 bytes (big-endian u16)
// request-id:      4 bytes (big-endian u32)
// attribute-groups: variable
//   delimiter-tag: 1 byte (0x00..=0x0F)
//   attributes:    variable
//     value-tag:    1 byte
//     name-length:  2 bytes (big-endian u16)
//     name:         name-length bytes (empty = additional value)
//     value-length: 2 bytes (big-endian u16)
//     value:        value-length bytes
// end-of-attributes-tag: 1 byte (0x03)
// document-data: remainder
// ```

pub mod attribute;
pub mod message;
pub mod op;
pub mod status;
pub mod tag;
pub mod value;

pub use attribute::{AttributeGroup, Attributes, IppAttribute};
pub use message::IppMessage;
pub use op::Operation;
pub use status::StatusCode;
pub use tag::{GroupTag, ValueTag};
pub use value::{IppDateTime, IppValue};
