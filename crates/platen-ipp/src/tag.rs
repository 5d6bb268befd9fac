// SPDX-License-Identifier: Apache-2.0
//
// IPP delimiter and value tags (RFC 8010 §3.5).

/// Attribute group delimiter tags (0x00..=0x0F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GroupTag {
    OperationAttributes = 0x01,
    JobAttributes = 0x02,
    PrinterAttributes = 0x04,
    UnsupportedAttributes = 0x05,
    SubscriptionAttributes = 0x06,
    EventNotificationAttributes = 0x07,
    ResourceAttributes = 0x08,
    DocumentAttributes = 0x09,
}

/// End-of-attributes-tag terminating the attribute section.
pub const END_OF_ATTRIBUTES: u8 = 0x03;

impl GroupTag {
    /// Decode a delimiter byte; `None` for 0x03 (end) and reserved values.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::OperationAttributes),
            0x02 => Some(Self::JobAttributes),
            0x04 => Some(Self::PrinterAttributes),
            0x05 => Some(Self::UnsupportedAttributes),
            0x06 => Some(Self::SubscriptionAttributes),
            0x07 => Some(Self::EventNotificationAttributes),
            0x08 => Some(Self::ResourceAttributes),
            0x09 => Some(Self::DocumentAttributes),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Value tags (RFC 8010 §3.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueTag {
    // Out-of-band values.
    Unsupported = 0x10,
    Unknown = 0x12,
    NoValue = 0x13,
    // Integer types.
    Integer = 0x21,
    Boolean = 0x22,
    Enum = 0x23,
    // Octet-string types.
    OctetString = 0x30,
    DateTime = 0x31,
    Resolution = 0x32,
    RangeOfInteger = 0x33,
    BegCollection = 0x34,
    TextWithLanguage = 0x35,
    NameWithLanguage = 0x36,
    EndCollection = 0x37,
    // Character-string types.
    TextWithoutLanguage = 0x41,
    NameWithoutLanguage = 0x42,
    Keyword = 0x44,
    Uri = 0x45,
    UriScheme = 0x46,
    Charset = 0x47,
    NaturalLanguage = 0x48,
    MimeMediaType = 0x49,
    MemberAttrName = 0x4A,
}

impl ValueTag {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(Self::Unsupported),
            0x12 => Some(Self::Unknown),
            0x13 => Some(Self::NoValue),
            0x21 => Some(Self::Integer),
            0x22 => Some(Self::Boolean),
            0x23 => Some(Self::Enum),
            0x30 => Some(Self::OctetString),
            0x31 => Some(Self::DateTime),
            0x32 => Some(Self::Resolution),
            0x33 => Some(Self::RangeOfInteger),
            0x34 => Some(Self::BegCollection),
            0x35 => Some(Self::TextWithLanguage),
            0x36 => Some(Self::NameWithLanguage),
            0x37 => Some(Self::EndCollection),
            0x41 => Some(Self::TextWithoutLanguage),
            0x42 => Some(Self::NameWithoutLanguage),
            0x44 => Some(Self::Keyword),
            0x45 => Some(Self::Uri),
            0x46 => Some(Self::UriScheme),
            0x47 => Some(Self::Charset),
            0x48 => Some(Self::NaturalLanguage),
            0x49 => Some(Self::MimeMediaType),
            0x4A => Some(Self::MemberAttrName),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tag_roundtrip() {
        for byte in [0x01u8, 0x02, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09] {
            let tag = GroupTag::from_u8(byte).expect("known delimiter");
            assert_eq!(tag.as_u8(), byte);
        }
        assert_eq!(GroupTag::from_u8(END_OF_ATTRIBUTES), None);
    }

    #[test]
    fn value_tag_roundtrip() {
        for byte in [
            0x10u8, 0x12, 0x13, 0x21, 0x22, 0x23, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35,
            0x36, 0x37, 0x41, 0x42, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A,
        ] {
            let tag = ValueTag::from_u8(byte).expect("known value tag");
            assert_eq!(tag.as_u8(), byte);
        }
        assert_eq!(ValueTag::from_u8(0xFF), None);
    }
}
