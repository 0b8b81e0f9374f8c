//! Minimal XML document form used by the roster codec and the sync engine.
//!
//! This is not a general XML library: it keeps element names, attributes
//! (in document order) and element/text children, which is all the roster
//! needs to round-trip its own data and to carry unknown fragments
//! verbatim. Parsing and writing are delegated to `quick-xml`.
//!
//! Names are kept as written (including any prefix). Elements holding only
//! child elements are structural: whitespace between their children is
//! layout, dropped on parse and regenerated on write. Any element carrying
//! text is mixed content and keeps every character, so it is never indented.

use std::fmt;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde::{Deserialize, Serialize};

use crate::error::{RosterError, RosterResult};

/// An element with ordered attributes and mixed children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

/// Child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    Comment(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child element append
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Builder-style text append
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(XmlNode::Element(child));
    }

    /// Iterate over child elements, skipping text and comments
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated text content of the direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Has text beyond layout whitespace
    pub fn is_mixed(&self) -> bool {
        self.children
            .iter()
            .any(|c| matches!(c, XmlNode::Text(t) if !t.trim().is_empty()))
    }

    /// Holds children that are not text, and no text of its own
    fn is_structural(&self) -> bool {
        !self.is_mixed() && self.children.iter().any(|c| !matches!(c, XmlNode::Text(_)))
    }

    /// Name without namespace prefix
    pub fn local_name(&self) -> &str {
        match self.name.rsplit_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Copy of this element without children
    pub fn shallow_clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            children: Vec::new(),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match to_string(self, &WriteOptions::compact()) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "<{} .../>", self.name),
        }
    }
}

/// Output formatting for [`to_string`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Spaces per nesting level; `None` writes everything on one line
    pub indent: Option<usize>,
    /// Emit an `<?xml version="1.0" encoding="utf-8"?>` declaration
    pub declaration: bool,
}

impl WriteOptions {
    pub fn compact() -> Self {
        Self {
            indent: None,
            declaration: false,
        }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            indent: Some(2),
            declaration: true,
        }
    }
}

fn xml_err<E: fmt::Display>(e: E) -> RosterError {
    RosterError::Xml(e.to_string())
}

/// Parse a document with a single root element
pub fn parse(input: &str) -> RosterResult<Element> {
    let mut reader = Reader::from_str(input);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| RosterError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| RosterError::Xml("unbalanced end tag".into()))?;
                close_element(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_err)?.into_owned();
                push_text(&mut stack, text)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8(data.into_inner().into_owned()).map_err(xml_err)?;
                push_text(&mut stack, text)?;
            }
            Event::Comment(comment) => {
                let text = String::from_utf8(comment.into_inner().into_owned()).map_err(xml_err)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Comment(text));
                }
            }
            Event::Eof => break,
            // declarations, processing instructions, doctype
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(RosterError::Xml(format!(
            "unexpected end of document inside <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| RosterError::Xml("document has no root element".into()))
}

fn element_from_start(start: &BytesStart<'_>) -> RosterResult<Element> {
    let name = String::from_utf8(start.name().as_ref().to_vec()).map_err(xml_err)?;
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8(attr.key.as_ref().to_vec()).map_err(xml_err)?;
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn close_element(
    stack: &mut [Element],
    root: &mut Option<Element>,
    mut element: Element,
) -> RosterResult<()> {
    if element.is_structural() {
        element.children.retain(|c| !matches!(c, XmlNode::Text(_)));
    }
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(RosterError::Xml(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

fn push_text(stack: &mut [Element], text: String) -> RosterResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            match parent.children.last_mut() {
                Some(XmlNode::Text(last)) => last.push_str(&text),
                _ if text.is_empty() => {}
                _ => parent.children.push(XmlNode::Text(text)),
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(RosterError::Xml("text outside of the root element".into())),
    }
}

/// Serialize an element tree
pub fn to_string(element: &Element, options: &WriteOptions) -> RosterResult<String> {
    let mut writer = Writer::new(Vec::new());
    if options.declaration {
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;
        if options.indent.is_some() {
            write_layout(&mut writer, 0)?;
        }
    }
    write_element(&mut writer, element, options.indent, 0)?;
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn write_layout(writer: &mut Writer<Vec<u8>>, spaces: usize) -> RosterResult<()> {
    let layout = format!("\n{}", " ".repeat(spaces));
    writer
        .write_event(Event::Text(BytesText::new(&layout)))
        .map_err(xml_err)
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    indent: Option<usize>,
    depth: usize,
) -> RosterResult<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(xml_err);
    }

    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    match indent.filter(|_| element.is_structural()) {
        Some(width) => {
            for child in &element.children {
                if matches!(child, XmlNode::Text(_)) {
                    continue;
                }
                write_layout(writer, width * (depth + 1))?;
                write_child(writer, child, indent, depth + 1)?;
            }
            write_layout(writer, width * depth)?;
        }
        None => {
            for child in &element.children {
                write_child(writer, child, None, depth + 1)?;
            }
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_err)
}

fn write_child(
    writer: &mut Writer<Vec<u8>>,
    child: &XmlNode,
    indent: Option<usize>,
    depth: usize,
) -> RosterResult<()> {
    match child {
        XmlNode::Element(element) => write_element(writer, element, indent, depth),
        XmlNode::Text(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err),
        XmlNode::Comment(text) => writer
            .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
            .map_err(xml_err),
    }
}
