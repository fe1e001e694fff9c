//! Namespace-aware XML tree and its writer.
//!
//! Element readers and writers exchange [`Element`] trees; the envelope
//! sender serializes the assembled tree with [`write_document`].

use crate::error::{xml_write_err, SoapError};
use indexmap::IndexSet;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace-qualified name in Clark notation (`{namespace}local`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QName {
    namespace: String,
    local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// A name without namespace.
    pub fn unqualified(local: impl Into<String>) -> Self {
        Self::new("", local)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn is_qualified(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl FromStr for QName {
    type Err = SoapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, local) = match s.strip_prefix('{') {
            Some(rest) => rest.split_once('}').ok_or_else(|| {
                SoapError::Config(format!("Malformed qualified name '{}'", s))
            })?,
            None => ("", s),
        };
        if local.is_empty() || local.contains(['{', '}']) {
            return Err(SoapError::Config(format!("Malformed qualified name '{}'", s)));
        }
        Ok(Self::new(namespace, local))
    }
}

impl TryFrom<String> for QName {
    type Error = SoapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QName> for String {
    fn from(name: QName) -> Self {
        name.to_string()
    }
}

/// Child of an [`Element`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    /// QName-valued text; the writer emits it with an in-scope prefix.
    QName(QName),
}

/// XML element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<(QName, String)>,
    pub children: Vec<Node>,
    /// Namespaces to declare on this element when written
    pub declare: Vec<String>,
    /// In-scope prefix bindings (prefix, uri), recorded by the parser
    pub namespaces: Vec<(String, String)>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            declare: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    /// Set an attribute, replacing an existing one with the same name.
    pub fn set_attribute(&mut self, name: QName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated text of this element and all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::QName(q) => out.push_str(&q.to_string()),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Resolve a prefix against the bindings recorded by the parser.
    /// The empty prefix resolves the default namespace.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Every namespace used by names in this subtree, in document order.
    pub fn namespaces_used(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.collect_namespaces(&mut out);
        out
    }

    fn collect_namespaces(&self, out: &mut IndexSet<String>) {
        if self.name.is_qualified() {
            out.insert(self.name.namespace().to_string());
        }
        for (name, _) in &self.attributes {
            if name.is_qualified() {
                out.insert(name.namespace().to_string());
            }
        }
        for child in &self.children {
            match child {
                Node::Element(e) => e.collect_namespaces(out),
                Node::QName(q) if q.is_qualified() => {
                    out.insert(q.namespace().to_string());
                }
                _ => {}
            }
        }
    }

    /// Serialize without registered prefixes.
    pub fn to_xml(&self) -> Result<String, SoapError> {
        write_document(self, &|_: &str| None, false)
    }
}

/// Serialize an element tree.
///
/// `prefixes` maps a namespace URI to its registered prefix; namespaces
/// without one get a generated prefix local to this document.
pub fn write_document(
    root: &Element,
    prefixes: &dyn Fn(&str) -> Option<String>,
    declaration: bool,
) -> Result<String, SoapError> {
    let mut writer = Writer::new(Vec::new());
    if declaration {
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_write_err)?;
    }

    let mut scope = NsScope {
        lookup: prefixes,
        bindings: Vec::new(),
        generated: 0,
    };
    write_element(&mut writer, root, &mut scope)?;

    String::from_utf8(writer.into_inner()).map_err(xml_write_err)
}

struct NsScope<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
    bindings: Vec<(String, String)>,
    generated: usize,
}

impl NsScope<'_> {
    fn current(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    fn bound_prefix(&self, namespace: &str) -> Option<String> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, uri)| uri == namespace && self.current(p) == Some(namespace))
            .map(|(p, _)| p.clone())
    }

    fn ensure(&mut self, namespace: &str, decls: &mut Vec<(String, String)>) -> String {
        if let Some(prefix) = self.bound_prefix(namespace) {
            return prefix;
        }

        let prefix = match (self.lookup)(namespace) {
            Some(p) if !p.is_empty() && self.current(&p).is_none() => p,
            _ => self.generate(),
        };
        self.bindings.push((prefix.clone(), namespace.to_string()));
        decls.push((prefix.clone(), namespace.to_string()));
        prefix
    }

    fn generate(&mut self) -> String {
        loop {
            self.generated += 1;
            let prefix = format!("ns{}", self.generated);
            if self.current(&prefix).is_none() {
                return prefix;
            }
        }
    }

    fn qualify(&mut self, name: &QName, decls: &mut Vec<(String, String)>) -> String {
        if name.is_qualified() {
            let prefix = self.ensure(name.namespace(), decls);
            format!("{}:{}", prefix, name.local_name())
        } else {
            name.local_name().to_string()
        }
    }
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    scope: &mut NsScope<'_>,
) -> Result<(), SoapError> {
    let mark = scope.bindings.len();
    let mut decls = Vec::new();

    for namespace in &element.declare {
        scope.ensure(namespace, &mut decls);
    }
    let tag = scope.qualify(&element.name, &mut decls);

    let mut attributes = Vec::with_capacity(element.attributes.len());
    for (name, value) in &element.attributes {
        attributes.push((scope.qualify(name, &mut decls), value.as_str()));
    }

    // QName text needs its prefix bound on this element
    let mut qname_texts = Vec::new();
    for child in &element.children {
        if let Node::QName(q) = child {
            qname_texts.push(scope.qualify(q, &mut decls));
        }
    }

    let mut start = BytesStart::new(tag.as_str());
    for (prefix, uri) in &decls {
        let key = format!("xmlns:{}", prefix);
        start.push_attribute((key.as_str(), uri.as_str()));
    }
    for (key, value) in &attributes {
        start.push_attribute((key.as_str(), *value));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_write_err)?;
    } else {
        writer.write_event(Event::Start(start)).map_err(xml_write_err)?;

        let mut qname_texts = qname_texts.into_iter();
        for child in &element.children {
            match child {
                Node::Element(e) => write_element(writer, e, scope)?,
                Node::Text(text) => writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(xml_write_err)?,
                Node::QName(_) => {
                    if let Some(text) = qname_texts.next() {
                        writer
                            .write_event(Event::Text(BytesText::new(&text)))
                            .map_err(xml_write_err)?;
                    }
                }
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new(tag.as_str())))
            .map_err(xml_write_err)?;
    }

    scope.bindings.truncate(mark);
    Ok(())
}
