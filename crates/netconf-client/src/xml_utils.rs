// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Low-level XML parsing and writing utils shared by the element tree and
//! the RPC envelope builders.

use indexmap::IndexMap;
use quick_xml::{
    events::{attributes::Attribute as XmlAttribute, BytesStart, Event},
    name::{NamespaceError, QName, ResolveResult},
    reader::NsReader,
};
use std::{collections::HashSet, io};

/// Namespace to prefix bindings, an empty prefix is the default namespace
pub type NamespaceBinding = IndexMap<Box<str>, Box<str>>;

#[derive(Debug, strum_macros::Display)]
pub enum XmlWriterError {
    #[strum(to_string = "no prefix is bound to namespace `{0}`")]
    UndefinedNamespace(String),

    #[strum(to_string = "prefix `{0}` is bound more than once")]
    DuplicateNamespacePrefix(String),
}

impl std::error::Error for XmlWriterError {}

impl From<XmlWriterError> for quick_xml::Error {
    fn from(value: XmlWriterError) -> Self {
        match value {
            XmlWriterError::UndefinedNamespace(ns) => {
                quick_xml::Error::Namespace(NamespaceError::UnknownPrefix(ns.as_bytes().to_vec()))
            }
            XmlWriterError::DuplicateNamespacePrefix(prefix) => quick_xml::Error::Namespace(
                NamespaceError::InvalidPrefixForXmlns(prefix.as_bytes().to_vec()),
            ),
        }
    }
}

/// Write a stream of XML events while keeping track of the namespace
/// prefixes that are in scope.
pub struct XmlWriter<T: io::Write> {
    inner: quick_xml::writer::Writer<T>,
    // Stack of multiple namespace bindings since XML allows to overwrite the bindings
    namespace_bindings: Vec<NamespaceBinding>,
    // Namespaces has been appended to the xml element
    ns_applied: bool,
}

impl<T: io::Write> XmlWriter<T> {
    pub fn new(
        inner: quick_xml::writer::Writer<T>,
        namespace_binding: NamespaceBinding,
    ) -> Result<Self, XmlWriterError> {
        Self::check_duplicate_prefixes(&namespace_binding)?;
        Ok(Self {
            inner,
            namespace_bindings: vec![namespace_binding],
            ns_applied: false,
        })
    }

    /// Writer without any namespace binding, used when the written elements
    /// carry their own `xmlns` attributes.
    pub fn without_namespaces(inner: quick_xml::writer::Writer<T>) -> Self {
        Self {
            inner,
            namespace_bindings: vec![NamespaceBinding::new()],
            ns_applied: true,
        }
    }

    pub fn get_namespace_prefix(&self, ns: &str) -> Option<&str> {
        self.namespace_bindings
            .iter()
            .rev()
            .find_map(|map| map.get(ns))
            .map(|prefix| prefix.as_ref())
    }

    /// Create a new element with specific namespace prefix.
    /// Note, the namespace must have been registered beforehand,
    /// either with [XmlWriter::new] or [XmlWriter::push_namespace_binding]
    pub fn create_ns_element(
        &mut self,
        ns: &str,
        name: &str,
    ) -> Result<BytesStart<'static>, XmlWriterError> {
        let prefix = match self.get_namespace_prefix(ns) {
            Some(prefix) => prefix,
            None => return Err(XmlWriterError::UndefinedNamespace(ns.to_string())),
        };
        let mut start = if prefix.is_empty() {
            BytesStart::new(name.to_string())
        } else {
            BytesStart::new(format!("{prefix}:{name}"))
        };
        self.apply_namespaces(&mut start);
        Ok(start)
    }

    pub fn push_namespace_binding(
        &mut self,
        namespace_binding: NamespaceBinding,
    ) -> Result<(), XmlWriterError> {
        Self::check_duplicate_prefixes(&namespace_binding)?;
        self.ns_applied = false;
        self.namespace_bindings.push(namespace_binding);
        Ok(())
    }

    pub fn pop_namespace_binding(&mut self) -> Option<NamespaceBinding> {
        self.namespace_bindings.pop()
    }

    pub fn write_event<'a, E: Into<Event<'a>>>(&mut self, event: E) -> io::Result<()> {
        self.inner.write_event(event.into())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.get_mut().write_all(buf)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn apply_namespaces(&mut self, start: &mut BytesStart<'_>) {
        if !self.ns_applied {
            if let Some(bindings) = self.namespace_bindings.last() {
                for (namespace, prefix) in bindings {
                    if prefix.is_empty() {
                        start.push_attribute(("xmlns", namespace.as_ref()));
                    } else {
                        start.push_attribute((format!("xmlns:{prefix}").as_str(), namespace.as_ref()));
                    }
                }
            }
            self.ns_applied = true;
        }
    }

    fn check_duplicate_prefixes(namespace_binding: &NamespaceBinding) -> Result<(), XmlWriterError> {
        let mut seen_prefixes = HashSet::new();
        for prefix in namespace_binding.values() {
            if !seen_prefixes.insert(prefix) {
                return Err(XmlWriterError::DuplicateNamespacePrefix(prefix.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum ParsingError {
    /// Standard IO error
    #[strum(to_string = "std::io:Error: `{0}`")]
    StdIo(io::Error),

    /// Unexpected XML token found
    #[strum(to_string = "expecting {expecting} but found `{found:?}`")]
    WrongToken {
        expecting: String,
        found: Event<'static>,
    },

    #[strum(to_string = "required XML element `{0}` is missing")]
    MissingElement(String),

    /// Invalid value error when converting from XML provided value to Rust type
    #[strum(to_string = "invalid value `{0}`")]
    InvalidValue(String),

    /// Error when trying to skip a node
    #[strum(to_string = "{0}")]
    SkipError(String),

    /// Element or attribute uses a prefix without an `xmlns` declaration
    #[strum(to_string = "undeclared namespace prefix `{0}`")]
    UnboundPrefix(String),

    /// Error when trying to decode UTF-8
    #[strum(to_string = "UTF-8 decoding error: `{0}`")]
    Utf8Error(std::str::Utf8Error),

    /// Error from quick-xml
    #[strum(to_string = "XML error: `{0}`")]
    QuickXml(quick_xml::Error),

    #[strum(to_string = "Found EOF while expecting data")]
    Eof,

    /// Error from quick-xml encoding
    #[strum(to_string = "XML encoding error: `{0}`")]
    EncodingError(quick_xml::encoding::EncodingError),
}

impl PartialEq for ParsingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::StdIo(left), Self::StdIo(right)) => left.to_string() == right.to_string(),
            (
                Self::WrongToken {
                    expecting: left_exp,
                    found: left_found,
                },
                Self::WrongToken {
                    expecting: right_exp,
                    found: right_found,
                },
            ) => left_exp == right_exp && left_found == right_found,
            (Self::MissingElement(left), Self::MissingElement(right)) => left == right,
            (Self::InvalidValue(left), Self::InvalidValue(right)) => left == right,
            (Self::SkipError(left), Self::SkipError(right)) => left == right,
            (Self::UnboundPrefix(left), Self::UnboundPrefix(right)) => left == right,
            (Self::Utf8Error(left), Self::Utf8Error(right)) => left == right,
            (Self::QuickXml(left), Self::QuickXml(right)) => left.to_string() == right.to_string(),
            (Self::Eof, Self::Eof) => true,
            (Self::EncodingError(left), Self::EncodingError(right)) => left == right,
            _ => false,
        }
    }
}

impl std::error::Error for ParsingError {}

impl From<quick_xml::Error> for ParsingError {
    fn from(value: quick_xml::Error) -> Self {
        Self::QuickXml(value)
    }
}

impl From<quick_xml::events::attributes::AttrError> for ParsingError {
    fn from(value: quick_xml::events::attributes::AttrError) -> Self {
        Self::QuickXml(quick_xml::Error::InvalidAttr(value))
    }
}

impl From<std::str::Utf8Error> for ParsingError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<io::Error> for ParsingError {
    fn from(value: io::Error) -> Self {
        Self::StdIo(value)
    }
}

impl From<quick_xml::encoding::EncodingError> for ParsingError {
    fn from(value: quick_xml::encoding::EncodingError) -> Self {
        Self::EncodingError(value)
    }
}

/// Pull parser over a namespace aware reader with one event of look-ahead.
///
/// Namespace resolution is done against the reader state, which is only
/// accurate for the event returned by [XmlParser::peek]. Resolve names
/// before advancing.
pub struct XmlParser<R: Sized> {
    ns_reader: NsReader<R>,
    current: Event<'static>,
    buf: Vec<u8>,
}

impl<R: io::BufRead> XmlParser<R> {
    pub fn new(mut ns_reader: NsReader<R>) -> Result<Self, ParsingError> {
        let mut buf: Vec<u8> = vec![];
        let current = ns_reader.read_event_into(&mut buf)?.into_owned();
        buf.clear();
        Ok(Self {
            ns_reader,
            current,
            buf,
        })
    }

    pub const fn ns_reader(&self) -> &NsReader<R> {
        &self.ns_reader
    }

    /// read one more tag
    pub fn next_event(&mut self) -> Result<Event<'static>, ParsingError> {
        self.buf.clear();
        let evt = self.ns_reader.read_event_into(&mut self.buf)?.into_owned();
        Ok(std::mem::replace(&mut self.current, evt))
    }

    pub const fn peek(&self) -> &Event<'static> {
        &self.current
    }

    /// skip a node at the current level
    pub fn skip(&mut self) -> Result<Event<'static>, ParsingError> {
        match &self.current {
            Event::Start(b) => {
                let _span = self
                    .ns_reader
                    .read_to_end_into(b.to_end().name(), &mut self.buf)?;
                self.next_event()
            }
            Event::End(e) => Err(ParsingError::SkipError(format!(
                "Cannot skip a closing tag </{}>",
                std::str::from_utf8(e.name().local_name().into_inner())?
            ))),
            Event::Eof => Err(ParsingError::Eof),
            _ => self.next_event(),
        }
    }

    /// Skip everything that is not an element: the XML declaration,
    /// comments, processing instructions and whitespace.
    pub fn skip_prolog(&mut self) -> Result<(), ParsingError> {
        while !matches!(
            self.peek(),
            Event::Start(_) | Event::Empty(_) | Event::End(_) | Event::Eof
        ) {
            self.next_event()?;
        }
        Ok(())
    }

    /// Resolve the namespace and local name of an element that is the
    /// current look-ahead event. Unprefixed names without a default
    /// namespace resolve to the empty namespace.
    pub fn resolve_element(&self, name: QName<'_>) -> Result<(Box<str>, Box<str>), ParsingError> {
        let (resolved, local) = self.ns_reader.resolve_element(name);
        let local: Box<str> = std::str::from_utf8(local.into_inner())?.into();
        let namespace = Self::resolved_namespace(resolved)?;
        Ok((namespace.unwrap_or_default(), local))
    }

    /// Resolve an attribute name, unprefixed attributes are in no namespace
    pub fn resolve_attribute(
        &self,
        name: QName<'_>,
    ) -> Result<(Option<Box<str>>, Box<str>), ParsingError> {
        let (resolved, local) = self.ns_reader.resolve_attribute(name);
        let local: Box<str> = std::str::from_utf8(local.into_inner())?.into();
        Ok((Self::resolved_namespace(resolved)?, local))
    }

    fn resolved_namespace(resolved: ResolveResult<'_>) -> Result<Option<Box<str>>, ParsingError> {
        match resolved {
            ResolveResult::Bound(ns) => Ok(Some(std::str::from_utf8(ns.into_inner())?.into())),
            ResolveResult::Unbound => Ok(None),
            ResolveResult::Unknown(prefix) => Err(ParsingError::UnboundPrefix(
                String::from_utf8_lossy(&prefix).to_string(),
            )),
        }
    }

    /// Decode and unescape an attribute value
    pub fn attribute_value(&self, attr: &XmlAttribute<'_>) -> Result<Box<str>, ParsingError> {
        let decoder = self.ns_reader.decoder();
        Ok(attr.decode_and_unescape_value(decoder)?.into())
    }

    /// Consume consecutive text, CDATA and entity reference events and
    /// return their unescaped concatenation, or `None` when the next event is
    /// not character data.
    pub fn take_text(&mut self) -> Result<Option<String>, ParsingError> {
        let mut accumulator: Option<String> = None;
        loop {
            match self.peek() {
                Event::CData(unescaped) => {
                    let decoded = unescaped.decode()?;
                    accumulator.get_or_insert_with(String::new).push_str(decoded.as_ref());
                }
                Event::Text(escaped) => {
                    let decoded = escaped.decode()?;
                    accumulator.get_or_insert_with(String::new).push_str(decoded.as_ref());
                }
                Event::GeneralRef(general_ref) => {
                    let acc = accumulator.get_or_insert_with(String::new);
                    if let Some(ch) = general_ref.resolve_char_ref()? {
                        acc.push(ch);
                    } else {
                        let decoded = general_ref.decode()?;
                        let replaced = match decoded.as_ref() {
                            "quot" => "\"",
                            "apos" => "'",
                            "amp" => "&",
                            "lt" => "<",
                            "gt" => ">",
                            _ => decoded.as_ref(),
                        };
                        acc.push_str(replaced);
                    }
                }
                Event::Comment(_) | Event::PI(_) => {}
                _ => return Ok(accumulator),
            }
            self.next_event()?;
        }
    }
}
