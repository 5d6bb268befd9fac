// SPDX-License-Identifier: Apache-2.0
//
// IPP attributes, attribute groups, and the ordered attribute table used
// for printer and job state.

use crate::tag::{GroupTag, ValueTag};
use crate::value::{IppDateTime, IppValue};

/// A named attribute with a value tag and one or more values (1setOf).
#[derive(Debug, Clone, PartialEq)]
pub struct IppAttribute {
    pub name: String,
    pub tag: ValueTag,
    pub values: Vec<IppValue>,
}

impl IppAttribute {
    pub fn new(name: impl Into<String>, tag: ValueTag, values: Vec<IppValue>) -> Self {
        Self {
            name: name.into(),
            tag,
            values,
        }
    }

    pub fn integer(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, ValueTag::Integer, vec![IppValue::Integer(value)])
    }

    pub fn integers(name: impl Into<String>, values: &[i32]) -> Self {
        Self::new(
            name,
            ValueTag::Integer,
            values.iter().map(|v| IppValue::Integer(*v)).collect(),
        )
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, ValueTag::Boolean, vec![IppValue::Boolean(value)])
    }

    pub fn enumeration(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, ValueTag::Enum, vec![IppValue::Enum(value)])
    }

    pub fn enumerations(name: impl Into<String>, values: &[i32]) -> Self {
        Self::new(
            name,
            ValueTag::Enum,
            values.iter().map(|v| IppValue::Enum(*v)).collect(),
        )
    }

    pub fn keyword(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ValueTag::Keyword, vec![IppValue::Text(value.into())])
    }

    pub fn keywords<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            ValueTag::Keyword,
            values
                .into_iter()
                .map(|v| IppValue::Text(v.into()))
                .collect(),
        )
    }

    pub fn name_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ValueTag::NameWithoutLanguage,
            vec![IppValue::Text(value.into())],
        )
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ValueTag::TextWithoutLanguage,
            vec![IppValue::Text(value.into())],
        )
    }

    pub fn uri(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ValueTag::Uri, vec![IppValue::Text(value.into())])
    }

    pub fn uris<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            ValueTag::Uri,
            values
                .into_iter()
                .map(|v| IppValue::Text(v.into()))
                .collect(),
        )
    }

    pub fn charset(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ValueTag::Charset, vec![IppValue::Text(value.into())])
    }

    pub fn natural_language(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ValueTag::NaturalLanguage,
            vec![IppValue::Text(value.into())],
        )
    }

    pub fn mime_type(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ValueTag::MimeMediaType,
            vec![IppValue::Text(value.into())],
        )
    }

    pub fn mime_types<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            ValueTag::MimeMediaType,
            values
                .into_iter()
                .map(|v| IppValue::Text(v.into()))
                .collect(),
        )
    }

    pub fn date_time(name: impl Into<String>, value: IppDateTime) -> Self {
        Self::new(name, ValueTag::DateTime, vec![IppValue::DateTime(value)])
    }

    pub fn resolution(name: impl Into<String>, cross_feed: i32, feed: i32) -> Self {
        Self::new(
            name,
            ValueTag::Resolution,
            vec![IppValue::Resolution {
                cross_feed,
                feed,
                units: 3,
            }],
        )
    }

    pub fn resolutions(name: impl Into<String>, dpis: &[(i32, i32)]) -> Self {
        Self::new(
            name,
            ValueTag::Resolution,
            dpis.iter()
                .map(|(x, y)| IppValue::Resolution {
                    cross_feed: *x,
                    feed: *y,
                    units: 3,
                })
                .collect(),
        )
    }

    pub fn range(name: impl Into<String>, lower: i32, upper: i32) -> Self {
        Self::new(
            name,
            ValueTag::RangeOfInteger,
            vec![IppValue::Range { lower, upper }],
        )
    }

    pub fn octets(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self::new(name, ValueTag::OctetString, vec![IppValue::OctetString(value)])
    }

    pub fn collection(name: impl Into<String>, members: Vec<IppAttribute>) -> Self {
        Self::new(
            name,
            ValueTag::BegCollection,
            vec![IppValue::Collection(members)],
        )
    }

    pub fn no_value(name: impl Into<String>) -> Self {
        Self::new(name, ValueTag::NoValue, vec![IppValue::OutOfBand])
    }

    /// First value as a string, if the attribute is a string family.
    pub fn as_str(&self) -> Option<&str> {
        self.values.first().and_then(IppValue::as_str)
    }

    /// First value as an integer/enum.
    pub fn as_int(&self) -> Option<i32> {
        self.values.first().and_then(IppValue::as_int)
    }

    /// First value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        self.values.first().and_then(IppValue::as_bool)
    }

    /// All string values, for 1setOf string attributes.
    pub fn strings(&self) -> Vec<&str> {
        self.values.iter().filter_map(IppValue::as_str).collect()
    }

    /// Textual rendering of all values, comma-separated.
    pub fn render_values(&self) -> String {
        self.values
            .iter()
            .map(IppValue::render)
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ---------------------------------------------------------------------------
// Attribute group
// ---------------------------------------------------------------------------

/// A delimited attribute group within a message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGroup {
    pub tag: GroupTag,
    pub attributes: Vec<IppAttribute>,
}

impl AttributeGroup {
    pub fn new(tag: GroupTag) -> Self {
        Self {
            tag,
            attributes: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(IppAttribute::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(IppAttribute::as_int)
    }

    pub fn push(&mut self, attr: IppAttribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }
}

// ---------------------------------------------------------------------------
// Ordered attribute table
// ---------------------------------------------------------------------------

/// An ordered attribute table: the printer's capability set and each job's
/// attribute envelope.
///
/// Insertion order is preserved; [`Attributes::set`] replaces in place so
/// repeated updates do not reorder the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<IppAttribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.0.iter().find(|a| a.name == name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(IppAttribute::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(IppAttribute::as_int)
    }

    /// Insert or replace by name, keeping the original position on
    /// replacement.
    pub fn set(&mut self, attr: IppAttribute) {
        if let Some(existing) = self.0.iter_mut().find(|a| a.name == attr.name) {
            *existing = attr;
        } else {
            self.0.push(attr);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<IppAttribute> {
        let index = self.0.iter().position(|a| a.name == name)?;
        Some(self.0.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IppAttribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<IppAttribute> for Attributes {
    fn from_iter<T: IntoIterator<Item = IppAttribute>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
