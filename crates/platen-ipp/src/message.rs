// SPDX-License-Identifier: Apache-2.0
//
// IPP message parsing and encoding.

use platen_core::{PlatenError, Result};
use tracing::warn;

use crate::attribute::{AttributeGroup, IppAttribute};
use crate::op::Operation;
use crate::status::StatusCode;
use crate::tag::{GroupTag, ValueTag, END_OF_ATTRIBUTES};
use crate::value::{IppDateTime, IppValue};

/// A parsed or under-construction IPP message.
///
/// `code` is the operation-id on requests and the status-code on
/// responses; the framing is otherwise identical.
#[derive(Debug, Clone, PartialEq)]
pub struct IppMessage {
    pub version_major: u8,
    pub version_minor: u8,
    pub code: u16,
    pub request_id: u32,
    pub groups: Vec<AttributeGroup>,
}

impl IppMessage {
    /// Build a response skeleton: echoes the request-id and pre-fills the
    /// operation group with the mandatory charset and natural-language.
    pub fn response(status: StatusCode, request_id: u32) -> Self {
        let mut operation = AttributeGroup::new(GroupTag::OperationAttributes);
        operation.push(IppAttribute::charset("attributes-charset", "utf-8"));
        operation.push(IppAttribute::natural_language(
            "attributes-natural-language",
            "en",
        ));
        Self {
            version_major: 2,
            version_minor: 0,
            code: status.as_u16(),
            request_id,
            groups: vec![operation],
        }
    }

    /// Build a request skeleton with the mandatory operation attributes.
    pub fn request(op: Operation, request_id: u32) -> Self {
        let mut message = Self::response(StatusCode::SuccessfulOk, request_id);
        message.code = op.as_u16();
        message
    }

    /// The operation, when `code` holds a known operation-id.
    pub fn operation(&self) -> Option<Operation> {
        Operation::from_u16(self.code)
    }

    /// First group with the given delimiter.
    pub fn group(&self, tag: GroupTag) -> Option<&AttributeGroup> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    /// All groups with the given delimiter, in order.
    pub fn groups_of(&self, tag: GroupTag) -> impl Iterator<Item = &AttributeGroup> {
        self.groups.iter().filter(move |g| g.tag == tag)
    }

    /// The operation-attributes group, if present.
    pub fn operation_attributes(&self) -> Option<&AttributeGroup> {
        self.group(GroupTag::OperationAttributes)
    }

    /// Append an empty group and return it for population.
    pub fn add_group(&mut self, tag: GroupTag) -> &mut AttributeGroup {
        self.groups.push(AttributeGroup::new(tag));
        self.groups.last_mut().expect("just pushed")
    }

    /// Set `status-message` in the operation group.
    pub fn set_status_message(&mut self, message: impl Into<String>) {
        if let Some(group) = self
            .groups
            .iter_mut()
            .find(|g| g.tag == GroupTag::OperationAttributes)
        {
            group.push(IppAttribute::text("status-message", message));
        }
    }

    // -- Decoding -----------------------------------------------------------

    /// Parse a message from a buffer.
    ///
    /// Returns the message and the offset where document data begins
    /// (everything after the end-of-attributes tag).
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(data);

        if data.len() < 8 {
            return Err(PlatenError::IppParse(format!(
                "message too short: {} bytes",
                data.len()
            )));
        }

        let version_major = cursor.u8()?;
        let version_minor = cursor.u8()?;
        let code = cursor.u16()?;
        let request_id = cursor.u32()?;

        let mut groups: Vec<AttributeGroup> = Vec::new();
        let mut current: Option<AttributeGroup> = None;

        loop {
            let tag_byte = match cursor.peek() {
                Some(b) => b,
                None => break,
            };

            if tag_byte <= 0x0F {
                cursor.u8()?;
                if let Some(group) = current.take() {
                    groups.push(group);
                }
                if tag_byte == END_OF_ATTRIBUTES {
                    break;
                }
                match GroupTag::from_u8(tag_byte) {
                    Some(tag) => current = Some(AttributeGroup::new(tag)),
                    None => {
                        return Err(PlatenError::IppParse(format!(
                            "unknown delimiter tag 0x{tag_byte:02x}"
                        )))
                    }
                }
                continue;
            }

            let tag = ValueTag::from_u8(cursor.u8()?).ok_or_else(|| {
                PlatenError::IppParse(format!("unknown value tag 0x{tag_byte:02x}"))
            })?;
            let name = cursor.lstring()?;
            let value = if tag == ValueTag::BegCollection {
                cursor.lbytes()?; // begCollection value is ignored
                IppValue::Collection(parse_collection(&mut cursor)?)
            } else {
                decode_value(tag, cursor.lbytes()?)?
            };

            let group = match current.as_mut() {
                Some(group) => group,
                None => {
                    warn!("attribute outside of any group discarded");
                    continue;
                }
            };

            if name.is_empty() {
                // Additional value for a 1setOf attribute.
                match group.attributes.last_mut() {
                    Some(last) => last.values.push(value),
                    None => {
                        return Err(PlatenError::IppParse(
                            "additional value with no preceding attribute".into(),
                        ))
                    }
                }
            } else {
                group.attributes.push(IppAttribute::new(name, tag, vec![value]));
            }
        }

        if let Some(group) = current.take() {
            groups.push(group);
        }

        Ok((
            Self {
                version_major,
                version_minor,
                code,
                request_id,
                groups,
            },
            cursor.position(),
        ))
    }

    // -- Encoding -----------------------------------------------------------

    /// Encode the message to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        buf.push(self.version_major);
        buf.push(self.version_minor);
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&self.request_id.to_be_bytes());

        for group in &self.groups {
            buf.push(group.tag.as_u8());
            for attr in &group.attributes {
                encode_attribute(&mut buf, attr);
            }
        }

        buf.push(END_OF_ATTRIBUTES);
        buf
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| PlatenError::IppParse("truncated message".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    /// Length-prefixed byte run.
    fn lbytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        if self.pos + len > self.data.len() {
            return Err(PlatenError::IppParse("truncated value".into()));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Length-prefixed UTF-8 string.
    fn lstring(&mut self) -> Result<String> {
        let bytes = self.lbytes()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn decode_value(tag: ValueTag, bytes: &[u8]) -> Result<IppValue> {
    let value = match tag {
        ValueTag::Integer | ValueTag::Enum => {
            if bytes.len() != 4 {
                return Err(PlatenError::IppParse(format!(
                    "integer value with length {}",
                    bytes.len()
                )));
            }
            let v = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if tag == ValueTag::Enum {
                IppValue::Enum(v)
            } else {
                IppValue::Integer(v)
            }
        }
        ValueTag::Boolean => {
            if bytes.len() != 1 {
                return Err(PlatenError::IppParse(format!(
                    "boolean value with length {}",
                    bytes.len()
                )));
            }
            IppValue::Boolean(bytes[0] != 0)
        }
        ValueTag::DateTime => IppValue::DateTime(
            IppDateTime::from_bytes(bytes)
                .ok_or_else(|| PlatenError::IppParse("bad dateTime length".into()))?,
        ),
        ValueTag::Resolution => {
            if bytes.len() != 9 {
                return Err(PlatenError::IppParse("bad resolution length".into()));
            }
            IppValue::Resolution {
                cross_feed: i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                feed: i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                units: bytes[8] as i8,
            }
        }
        ValueTag::RangeOfInteger => {
            if bytes.len() != 8 {
                return Err(PlatenError::IppParse("bad rangeOfInteger length".into()));
            }
            IppValue::Range {
                lower: i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                upper: i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            }
        }
        ValueTag::OctetString => IppValue::OctetString(bytes.to_vec()),
        ValueTag::Unsupported | ValueTag::Unknown | ValueTag::NoValue => IppValue::OutOfBand,
        ValueTag::BegCollection | ValueTag::EndCollection | ValueTag::MemberAttrName => {
            return Err(PlatenError::IppParse(
                "collection tag outside collection context".into(),
            ))
        }
        // All character-string families.
        _ => IppValue::Text(String::from_utf8_lossy(bytes).into_owned()),
    };
    Ok(value)
}

/// Parse collection members up to and including the matching endCollection.
fn parse_collection(cursor: &mut Cursor<'_>) -> Result<Vec<IppAttribute>> {
    let mut members: Vec<IppAttribute> = Vec::new();

    loop {
        let tag = ValueTag::from_u8(cursor.u8()?)
            .ok_or_else(|| PlatenError::IppParse("unknown tag inside collection".into()))?;

        match tag {
            ValueTag::EndCollection => {
                cursor.lbytes()?;
                cursor.lbytes()?;
                return Ok(members);
            }
            ValueTag::MemberAttrName => {
                cursor.lbytes()?; // name is empty
                let member_name = cursor.lstring()?;
                let (member_tag, first) = parse_member_value(cursor)?;
                let mut member = IppAttribute::new(member_name, member_tag, vec![first]);

                // Additional values run until the next memberAttrName or
                // endCollection.
                while let Some(next) = cursor.peek() {
                    if next == ValueTag::MemberAttrName.as_u8()
                        || next == ValueTag::EndCollection.as_u8()
                    {
                        break;
                    }
                    let (_, value) = parse_member_value(cursor)?;
                    member.values.push(value);
                }
                members.push(member);
            }
            _ => {
                return Err(PlatenError::IppParse(
                    "expected memberAttrName inside collection".into(),
                ))
            }
        }
    }
}

/// Parse one member value (scalar or nested collection).
fn parse_member_value(cursor: &mut Cursor<'_>) -> Result<(ValueTag, IppValue)> {
    let tag = ValueTag::from_u8(cursor.u8()?)
        .ok_or_else(|| PlatenError::IppParse("unknown member value tag".into()))?;
    cursor.lbytes()?; // member value names are empty

    if tag == ValueTag::BegCollection {
        cursor.lbytes()?;
        Ok((tag, IppValue::Collection(parse_collection(cursor)?)))
    } else {
        Ok((tag, decode_value(tag, cursor.lbytes()?)?))
    }
}

fn encode_attribute(buf: &mut Vec<u8>, attr: &IppAttribute) {
    for (index, value) in attr.values.iter().enumerate() {
        let name: &str = if index == 0 { &attr.name } else { "" };
        encode_one(buf, attr.tag, name, value);
    }
}

fn encode_one(buf: &mut Vec<u8>, tag: ValueTag, name: &str, value: &IppValue) {
    if let IppValue::Collection(members) = value {
        write_tnv(buf, ValueTag::BegCollection, name, &[]);
        for member in members {
            write_tnv(buf, ValueTag::MemberAttrName, "", member.name.as_bytes());
            for member_value in &member.values {
                encode_one(buf, member.tag, "", member_value);
            }
        }
        write_tnv(buf, ValueTag::EndCollection, "", &[]);
        return;
    }

    let bytes = match value {
        IppValue::Integer(v) | IppValue::Enum(v) => v.to_be_bytes().to_vec(),
        IppValue::Boolean(v) => vec![u8::from(*v)],
        IppValue::OctetString(bytes) => bytes.clone(),
        IppValue::DateTime(dt) => dt.to_bytes().to_vec(),
        IppValue::Resolution {
            cross_feed,
            feed,
            units,
        } => {
            let mut out = Vec::with_capacity(9);
            out.extend_from_slice(&cross_feed.to_be_bytes());
            out.extend_from_slice(&feed.to_be_bytes());
            out.push(*units as u8);
            out
        }
        IppValue::Range { lower, upper } => {
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&lower.to_be_bytes());
            out.extend_from_slice(&upper.to_be_bytes());
            out
        }
        IppValue::Text(s) => s.as_bytes().to_vec(),
        IppValue::OutOfBand => Vec::new(),
        IppValue::Collection(_) => unreachable!("handled above"),
    };
    write_tnv(buf, tag, name, &bytes);
}

/// Write one tag / name-length / name / value-length / value unit.
fn write_tnv(buf: &mut Vec<u8>, tag: ValueTag, name: &str, value: &[u8]) {
    buf.push(tag.as_u8());
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
