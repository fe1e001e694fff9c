//! Envelope compiler shared by SOAP protocol versions.
//!
//! [`compile_message`] turns a [`MessageDescriptor`] into a [`Sender`] or a
//! [`Receiver`]. The version-specific rules (header routing attributes,
//! fault encoding and fault classification) live behind
//! [`EnvelopeProtocol`].

use crate::descriptor::{Direction, HeaderEntry, MessageDescriptor, Part};
use crate::error::SoapError;
use crate::parser::parse_document;
use crate::schema::{CompileOptions, ElementReader, ElementWriter, Mode, SchemaRegistry};
use crate::value::{insert_repeated, Map, Value};
use crate::xml::{write_document, Element, QName};
use std::sync::Arc;
use tracing::{debug, trace};

/// Key under which unrecognised mandatory headers are listed.
pub const MUST_UNDERSTAND_KEY: &str = "_MUST_UNDERSTAND";

/// A writer together with the data label it encodes.
#[derive(Clone)]
pub struct LabeledWriter {
    pub label: String,
    pub writer: ElementWriter,
}

impl std::fmt::Debug for LabeledWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabeledWriter")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A reader together with its element name and data label.
#[derive(Clone)]
pub struct LabeledReader {
    pub label: String,
    pub element: QName,
    pub reader: ElementReader,
}

/// Decodes Fault elements and classifies them once per envelope.
pub trait FaultHandler: Send + Sync {
    fn read(&self, fault: &Element) -> Result<Value, SoapError>;

    /// Post-process a decoded message that may contain a `Fault` entry.
    fn classify(&self, message: &mut Map);
}

/// Version-specific envelope rules.
pub trait EnvelopeProtocol: Send + Sync {
    /// Envelope namespace URI.
    fn namespace(&self) -> &str;

    fn registry(&self) -> &Arc<dyn SchemaRegistry>;

    /// Adjust the compiled header writers. The default keeps them as is.
    fn writer_header(
        &self,
        descriptor: &MessageDescriptor,
        writers: Vec<LabeledWriter>,
    ) -> Result<Vec<LabeledWriter>, SoapError> {
        let _ = descriptor;
        Ok(writers)
    }

    /// Writers for fault labels, placed in the Body by the sender.
    fn writer_faults(&self, descriptor: &MessageDescriptor) -> Result<Vec<LabeledWriter>, SoapError>;

    fn reader_faults(
        &self,
        descriptor: &MessageDescriptor,
    ) -> Result<Arc<dyn FaultHandler>, SoapError>;
}

/// Compiled message codec.
#[derive(Clone)]
pub enum CompiledMessage {
    Sender(Sender),
    Receiver(Receiver),
}

impl CompiledMessage {
    pub fn direction(&self) -> Direction {
        match self {
            CompiledMessage::Sender(_) => Direction::Outbound,
            CompiledMessage::Receiver(_) => Direction::Inbound,
        }
    }

    pub fn as_sender(&self) -> Option<&Sender> {
        match self {
            CompiledMessage::Sender(s) => Some(s),
            CompiledMessage::Receiver(_) => None,
        }
    }

    pub fn as_receiver(&self) -> Option<&Receiver> {
        match self {
            CompiledMessage::Receiver(r) => Some(r),
            CompiledMessage::Sender(_) => None,
        }
    }
}

/// Compile a normalized descriptor with the given protocol rules.
pub fn compile_message(
    protocol: &dyn EnvelopeProtocol,
    direction: Direction,
    descriptor: &MessageDescriptor,
) -> Result<CompiledMessage, SoapError> {
    debug!(
        direction = ?direction,
        headers = descriptor.header.len(),
        body = descriptor.body.len(),
        faults = descriptor.faults.len(),
        "Compiling message"
    );

    match direction {
        Direction::Outbound => compile_sender(protocol, descriptor).map(CompiledMessage::Sender),
        Direction::Inbound => compile_receiver(protocol, descriptor).map(CompiledMessage::Receiver),
    }
}

pub(crate) fn part_writer(
    registry: &dyn SchemaRegistry,
    part: &Part,
    kind: &'static str,
) -> Result<LabeledWriter, SoapError> {
    let writer = match (&part.element, &part.type_ref) {
        (Some(element), _) => registry.writer(element, &CompileOptions::default())?,
        (None, Some(type_ref)) => {
            let options = CompileOptions {
                element: Some(part.element_name(kind)?),
                ..Default::default()
            };
            registry.compile_type(Mode::Write, type_ref, &options)?.into_writer()?
        }
        (None, None) => {
            return Err(SoapError::IncompletePart {
                kind,
                name: part.name.clone(),
            })
        }
    };
    Ok(LabeledWriter {
        label: part.name.clone(),
        writer,
    })
}

pub(crate) fn part_reader(
    registry: &dyn SchemaRegistry,
    part: &Part,
    kind: &'static str,
) -> Result<LabeledReader, SoapError> {
    let element = part.element_name(kind)?;
    let reader = match &part.element {
        Some(element) => registry.reader(element, &CompileOptions::default())?,
        None => {
            let options = CompileOptions {
                element: Some(element.clone()),
                ..Default::default()
            };
            let type_ref = part.type_ref.as_ref().ok_or_else(|| SoapError::IncompletePart {
                kind,
                name: part.name.clone(),
            })?;
            registry.compile_type(Mode::Read, type_ref, &options)?.into_reader()?
        }
    };
    Ok(LabeledReader {
        label: part.name.clone(),
        element,
        reader,
    })
}

fn header_parts(entries: &[HeaderEntry]) -> impl Iterator<Item = &Part> {
    entries.iter().map(|e| &e.part)
}

fn compile_sender(
    protocol: &dyn EnvelopeProtocol,
    descriptor: &MessageDescriptor,
) -> Result<Sender, SoapError> {
    let registry = protocol.registry();

    let header = header_parts(&descriptor.header)
        .map(|part| part_writer(registry.as_ref(), part, "header"))
        .collect::<Result<Vec<_>, _>>()?;
    let header = protocol.writer_header(descriptor, header)?;

    let body = descriptor
        .body
        .iter()
        .map(|part| part_writer(registry.as_ref(), part, "body"))
        .collect::<Result<Vec<_>, _>>()?;

    let faults = protocol.writer_faults(descriptor)?;

    Ok(Sender {
        envelope_ns: protocol.namespace().to_string(),
        registry: Arc::clone(registry),
        header,
        body,
        faults,
    })
}

fn compile_receiver(
    protocol: &dyn EnvelopeProtocol,
    descriptor: &MessageDescriptor,
) -> Result<Receiver, SoapError> {
    let registry = protocol.registry();

    let header = header_parts(&descriptor.header)
        .map(|part| part_reader(registry.as_ref(), part, "header"))
        .collect::<Result<Vec<_>, _>>()?;

    let body = descriptor
        .body
        .iter()
        .map(|part| part_reader(registry.as_ref(), part, "body"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Receiver {
        envelope_ns: protocol.namespace().to_string(),
        header,
        body,
        faults: protocol.reader_faults(descriptor)?,
    })
}

/// Encodes message data into envelopes.
#[derive(Clone)]
pub struct Sender {
    envelope_ns: String,
    registry: Arc<dyn SchemaRegistry>,
    header: Vec<LabeledWriter>,
    body: Vec<LabeledWriter>,
    faults: Vec<LabeledWriter>,
}

impl Sender {
    /// Data labels this sender accepts, in envelope order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.header
            .iter()
            .chain(&self.body)
            .chain(&self.faults)
            .map(|w| w.label.as_str())
    }

    /// Build the envelope element for `data`, a map keyed by part label.
    pub fn envelope(&self, data: &Value) -> Result<Element, SoapError> {
        let empty = Map::new();
        let data = match data {
            Value::Map(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(SoapError::Encode(
                    "message data must be a map keyed by part label".to_string(),
                ))
            }
        };

        let unused: Vec<String> = data
            .keys()
            .filter(|key| !self.labels().any(|label| label == key.as_str()))
            .cloned()
            .collect();
        if !unused.is_empty() {
            return Err(SoapError::UnusedData(unused));
        }

        let ns = self.envelope_ns.as_str();
        let mut envelope = Element::new(QName::new(ns, "Envelope"));

        let mut header = Element::new(QName::new(ns, "Header"));
        write_parts(&mut header, &self.header, data)?;
        if !header.children.is_empty() {
            envelope.push_child(header);
        }

        let mut body = Element::new(QName::new(ns, "Body"));
        write_parts(&mut body, &self.body, data)?;
        write_parts(&mut body, &self.faults, data)?;
        envelope.push_child(body);

        Ok(envelope)
    }

    /// Encode `data` as envelope XML text.
    pub fn to_xml(&self, data: &Value, declaration: bool) -> Result<String, SoapError> {
        let envelope = self.envelope(data)?;
        let registry = &self.registry;
        write_document(&envelope, &|ns: &str| registry.prefix_for(ns), declaration)
    }
}

fn write_parts(target: &mut Element, writers: &[LabeledWriter], data: &Map) -> Result<(), SoapError> {
    for lw in writers {
        let Some(value) = data.get(&lw.label) else {
            continue;
        };
        trace!(label = %lw.label, "Writing part");
        // A list under a label encodes repeated elements
        for item in value.clone().into_items() {
            if let Some(element) = (lw.writer)(&item)? {
                target.push_child(element);
            }
        }
    }
    Ok(())
}

/// Decodes envelopes into message data.
#[derive(Clone)]
pub struct Receiver {
    envelope_ns: String,
    header: Vec<LabeledReader>,
    body: Vec<LabeledReader>,
    faults: Arc<dyn FaultHandler>,
}

impl Receiver {
    /// Decode envelope XML text.
    pub fn decode(&self, xml: &[u8]) -> Result<Value, SoapError> {
        let root = parse_document(xml)?;
        self.decode_envelope(&root)
    }

    /// Decode a parsed envelope element.
    pub fn decode_envelope(&self, root: &Element) -> Result<Value, SoapError> {
        let ns = self.envelope_ns.as_str();
        if root.name != QName::new(ns, "Envelope") {
            return Err(SoapError::InvalidEnvelope(format!(
                "expected {{{}}}Envelope, found {}",
                ns, root.name
            )));
        }

        let mut message = Map::new();
        let mut not_understood = Vec::new();
        let mut seen_body = false;

        for section in root.child_elements() {
            if section.name == QName::new(ns, "Header") {
                for entry in section.child_elements() {
                    let known = read_part(&mut message, &self.header, entry)?;
                    if !known && self.is_mandatory(entry) {
                        not_understood.push(Value::Text(entry.name.to_string()));
                    }
                }
            } else if section.name == QName::new(ns, "Body") {
                seen_body = true;
                for child in section.child_elements() {
                    if child.name == QName::new(ns, "Fault") {
                        let fault = self.faults.read(child)?;
                        message.insert("Fault".to_string(), fault);
                    } else {
                        read_part(&mut message, &self.body, child)?;
                    }
                }
            } else {
                return Err(SoapError::InvalidEnvelope(format!(
                    "unexpected element {} in Envelope",
                    section.name
                )));
            }
        }

        if !seen_body {
            return Err(SoapError::InvalidEnvelope("missing Body".to_string()));
        }
        if !not_understood.is_empty() {
            message.insert(MUST_UNDERSTAND_KEY.to_string(), Value::List(not_understood));
        }

        self.faults.classify(&mut message);
        Ok(Value::Map(message))
    }

    fn is_mandatory(&self, entry: &Element) -> bool {
        matches!(
            entry.attribute(&QName::new(self.envelope_ns.as_str(), "mustUnderstand")),
            Some("1") | Some("true")
        )
    }
}

/// Decode one child with the matching part reader, or keep it raw under
/// its qualified name. Returns whether a part matched.
fn read_part(message: &mut Map, readers: &[LabeledReader], child: &Element) -> Result<bool, SoapError> {
    let (key, value, known) = match readers.iter().find(|r| r.element == child.name) {
        Some(r) => (r.label.clone(), (r.reader)(child)?, true),
        None => (child.name.to_string(), Value::Node(child.clone()), false),
    };
    insert_repeated(message, key, value);
    Ok(known)
}
