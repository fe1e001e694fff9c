//! Fault encoding, decoding and classification.
//!
//! SOAP 1.1 has one Fault shape for every error. On encode, each
//! registered fault wraps its detail payload into that shape. On decode,
//! the detail children are decoded individually and the fault is
//! classified back into a named record.

use crate::descriptor::FaultRegistration;
use crate::envelope::{part_reader, part_writer, FaultHandler, LabeledWriter};
use crate::error::SoapError;
use crate::role::{role_abbreviation, role_uri};
use crate::schema::{CompileOptions, ElementReader, ElementWriter, NamespaceFilter, ReadHook, SchemaRegistry};
use crate::value::{insert_repeated, Map, Value};
use crate::xml::{Element, QName};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Key of the generic Fault part and of the decoded Fault record.
pub const FAULT: &str = "Fault";

/// Marker on the decoded Fault record naming its classification.
pub const NAME_KEY: &str = "_NAME";

/// Detail entry listing child types in document order, duplicates kept.
pub const ELEMENT_ORDER_KEY: &str = "_ELEMENT_ORDER";

/// Writers for the generic `Fault` label and every registered fault.
pub fn fault_writers(
    envelope_ns: &str,
    registry: &Arc<dyn SchemaRegistry>,
    faults: &IndexMap<String, FaultRegistration>,
) -> Result<Vec<LabeledWriter>, SoapError> {
    let options = CompileOptions {
        include_namespaces: NamespaceFilter::AllExcept(vec![envelope_ns.to_string()]),
        ..Default::default()
    };
    let generic = registry.writer(&QName::new(envelope_ns, "Fault"), &options)?;

    let mut writers = Vec::with_capacity(faults.len() + 1);
    writers.push(LabeledWriter {
        label: FAULT.to_string(),
        writer: generic_fault_writer(envelope_ns, generic.clone()),
    });

    for (name, registration) in faults {
        let detail = part_writer(registry.as_ref(), &registration.part, "fault")?;
        let detail_name = registration.part.element_name("fault")?;
        debug!(fault = %name, detail = %detail_name, "Compiled fault writer");
        writers.push(LabeledWriter {
            label: name.clone(),
            writer: registered_fault_writer(envelope_ns, generic.clone(), detail_name, detail.writer),
        });
    }

    Ok(writers)
}

fn generic_fault_writer(envelope_ns: &str, generic: ElementWriter) -> ElementWriter {
    let envelope_ns = envelope_ns.to_string();
    Arc::new(move |value: &Value| -> Result<Option<Element>, SoapError> {
        if value.is_null() {
            return Ok(None);
        }
        let record = prepare_record(&envelope_ns, value)?;
        generic(&Value::Map(record))
    })
}

fn registered_fault_writer(
    envelope_ns: &str,
    generic: ElementWriter,
    detail_name: QName,
    detail_writer: ElementWriter,
) -> ElementWriter {
    let envelope_ns = envelope_ns.to_string();
    let key = detail_name.to_string();
    Arc::new(move |value: &Value| -> Result<Option<Element>, SoapError> {
        if value.is_null() {
            return Ok(None);
        }
        let mut record = prepare_record(&envelope_ns, value)?;

        let mut nodes = Vec::new();
        for item in record.shift_remove("detail").unwrap_or_default().into_items() {
            match item {
                Value::Node(node) => nodes.push(Value::Node(node)),
                item => {
                    if let Some(node) = detail_writer(&item)? {
                        nodes.push(Value::Node(node));
                    }
                }
            }
        }

        // An empty map still emits the detail element
        let mut detail = Map::new();
        if !nodes.is_empty() {
            detail.insert(key.clone(), Value::List(nodes));
        }
        record.insert("detail".to_string(), Value::Map(detail));

        generic(&Value::Map(record))
    })
}

/// Copy a caller's Fault record into its wire form.
fn prepare_record(envelope_ns: &str, value: &Value) -> Result<Map, SoapError> {
    let mut record = value
        .as_map()
        .cloned()
        .ok_or_else(|| SoapError::Encode("Fault record must be a map".to_string()))?;
    record.retain(|key, _| !key.starts_with('_'));

    if let Some(Value::Text(code)) = record.get_mut("faultcode") {
        if !code.starts_with('{') && !code.contains(':') {
            *code = QName::new(envelope_ns, code.as_str()).to_string();
        }
    }
    if let Some(Value::Text(actor)) = record.get_mut("faultactor") {
        let uri = role_uri(actor).to_string();
        *actor = uri;
    }

    Ok(record)
}

/// Decodes Fault elements and classifies them against registrations.
pub struct FaultDecoder {
    reader: ElementReader,
    /// qualified detail element → fault name
    registered: IndexMap<String, String>,
    details: Arc<DetailReaders>,
}

impl FaultDecoder {
    pub fn compile(
        envelope_ns: &str,
        registry: &Arc<dyn SchemaRegistry>,
        faults: &IndexMap<String, FaultRegistration>,
    ) -> Result<Self, SoapError> {
        let mut registered = IndexMap::with_capacity(faults.len());
        let mut readers = Vec::with_capacity(faults.len());
        for (name, registration) in faults {
            let detail = part_reader(registry.as_ref(), &registration.part, "fault")?;
            registered.insert(detail.element.to_string(), name.clone());
            readers.push((detail.element, detail.reader));
        }

        let details = Arc::new(DetailReaders {
            registry: Arc::clone(registry),
            registered: readers,
            compiled: RwLock::new(HashMap::new()),
        });
        let options = CompileOptions {
            hooks: vec![ReadHook {
                field: "detail".to_string(),
                replace: detail_hook(Arc::clone(&details)),
            }],
            ..Default::default()
        };
        let reader = registry.reader(&QName::new(envelope_ns, "Fault"), &options)?;

        Ok(Self {
            reader,
            registered,
            details,
        })
    }
}

impl FaultHandler for FaultDecoder {
    fn read(&self, fault: &Element) -> Result<Value, SoapError> {
        (self.reader)(fault)
    }

    fn classify(&self, message: &mut Map) {
        let Some(Value::Map(fault)) = message.get_mut(FAULT) else {
            return;
        };

        let class = FaultClass::of(fault, &self.registered);
        let record = class.record(fault);
        let name = class.name().to_string();
        fault.insert(NAME_KEY.to_string(), Value::Text(name.clone()));

        debug!(name = %name, class = ?class, "Classified fault");
        message.insert(name, Value::Map(record));
    }
}

/// Readers for detail children: registered faults first, then registry
/// readers compiled on first sight of an element.
struct DetailReaders {
    registry: Arc<dyn SchemaRegistry>,
    registered: Vec<(QName, ElementReader)>,
    /// `None` marks an element the registry cannot read
    compiled: RwLock<HashMap<QName, Option<ElementReader>>>,
}

impl DetailReaders {
    fn reader(&self, element: &QName) -> Result<ElementReader, SoapError> {
        if let Some((_, reader)) = self.registered.iter().find(|(name, _)| name == element) {
            return Ok(reader.clone());
        }
        if let Some(cached) = self.compiled.read().get(element) {
            return cached
                .clone()
                .ok_or_else(|| SoapError::UnknownElement(element.to_string()));
        }

        let reader = self.registry.reader(element, &CompileOptions::default());
        trace!(element = %element, readable = reader.is_ok(), "Compiled fault detail reader");
        self.compiled
            .write()
            .insert(element.clone(), reader.as_ref().ok().cloned());
        reader
    }

    fn decode(&self, child: &Element) -> Result<Value, SoapError> {
        let reader = self.reader(&child.name)?;
        reader(child)
    }
}

/// Decode every detail child on its own, keyed by qualified element name.
fn detail_hook(details: Arc<DetailReaders>) -> ElementReader {
    Arc::new(move |detail: &Element| -> Result<Value, SoapError> {
        let mut keyed = Map::new();
        let mut order = Vec::new();

        for child in detail.child_elements() {
            let key = child.name.to_string();
            let value = match details.decode(child) {
                Ok(value) => value,
                Err(e) => {
                    warn!(element = %key, error = %e, "Keeping undecodable fault detail as raw XML");
                    Value::Node(child.clone())
                }
            };
            insert_repeated(&mut keyed, key.clone(), value);
            order.push(Value::Text(key));
        }

        keyed.insert(ELEMENT_ORDER_KEY.to_string(), Value::List(order));
        Ok(Value::Map(keyed))
    })
}

/// Outcome of fault classification.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultClass {
    /// No detail children
    NoDetail,
    /// First detail child matches a registered fault
    Named {
        name: String,
        key: String,
        single: bool,
    },
    /// One unregistered detail child
    SyntheticScalar { name: String, value: Value },
    /// One unregistered detail type, repeated
    SyntheticSequence { name: String, values: Vec<Value> },
    /// Several unregistered detail types
    Generic,
}

impl FaultClass {
    /// Classify a decoded Fault record. `registered` maps qualified detail
    /// element names to fault names.
    pub fn of(fault: &Map, registered: &IndexMap<String, String>) -> Self {
        let Some(detail) = fault.get("detail").and_then(Value::as_map) else {
            return FaultClass::NoDetail;
        };
        let order = detail_order(detail);
        let Some(first) = order.first() else {
            return FaultClass::NoDetail;
        };

        if let Some(name) = registered.get(first) {
            return FaultClass::Named {
                name: name.clone(),
                key: first.clone(),
                single: order.len() == 1,
            };
        }

        let distinct: IndexSet<&str> = order.iter().map(String::as_str).collect();
        if distinct.len() > 1 {
            return FaultClass::Generic;
        }

        let mut values: Vec<Value> = detail
            .get(first)
            .cloned()
            .unwrap_or_default()
            .into_items()
            .into_iter()
            .map(node_text)
            .collect();
        if values.len() == 1 {
            FaultClass::SyntheticScalar {
                name: first.clone(),
                value: values.remove(0),
            }
        } else {
            FaultClass::SyntheticSequence {
                name: first.clone(),
                values,
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FaultClass::NoDetail => "error",
            FaultClass::Generic => "generic",
            FaultClass::Named { name, .. }
            | FaultClass::SyntheticScalar { name, .. }
            | FaultClass::SyntheticSequence { name, .. } => name.as_str(),
        }
    }

    /// Build the normalized record stored under the classified name.
    pub fn record(&self, fault: &Map) -> Map {
        let code = fault.get("faultcode").and_then(Value::as_str).unwrap_or_default();
        let mut record = Map::new();
        record.insert("code".to_string(), Value::from(code));
        record.insert("class".to_string(), Value::List(fault_class(code)));
        record.insert(
            "reason".to_string(),
            fault.get("faultstring").cloned().unwrap_or_default(),
        );
        if let Some(actor) = fault.get("faultactor").and_then(Value::as_str) {
            record.insert("role".to_string(), Value::from(role_abbreviation(actor)));
        }

        match self {
            FaultClass::NoDetail | FaultClass::Generic => {}
            FaultClass::Named { key, single, .. } => {
                let value = fault
                    .get("detail")
                    .and_then(|d| d.get(key))
                    .cloned()
                    .unwrap_or_default();
                match value {
                    Value::Map(fields) if *single => {
                        for (field, v) in fields {
                            record.entry(field).or_insert(v);
                        }
                    }
                    value => {
                        record.insert("details".to_string(), value);
                    }
                }
            }
            FaultClass::SyntheticScalar { name, value } => {
                record.insert(name.clone(), value.clone());
            }
            FaultClass::SyntheticSequence { name, values } => {
                record.insert(name.clone(), Value::List(values.clone()));
            }
        }

        record
    }
}

/// `[namespace, kind, subcodes…]` for a Clark-notation faultcode.
fn fault_class(code: &str) -> Vec<Value> {
    let (namespace, path) = match code.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
        Some((ns, local)) => (ns, local),
        None => ("", code),
    };

    let mut segments = path.split('.');
    let kind = match segments.next().unwrap_or_default() {
        "Server" => "Receiver",
        "Client" => "Sender",
        other => other,
    };

    let mut class = vec![Value::from(namespace), Value::from(kind)];
    class.extend(segments.map(Value::from));
    class
}

fn detail_order(detail: &Map) -> Vec<String> {
    match detail.get(ELEMENT_ORDER_KEY).and_then(Value::as_list) {
        Some(order) => order
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        None => detail
            .iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .flat_map(|(key, value)| {
                let count = value.as_list().map_or(1, <[Value]>::len);
                std::iter::repeat(key.clone()).take(count)
            })
            .collect(),
    }
}

/// Raw nodes reduce to their text; values a schema decoded are kept.
fn node_text(value: Value) -> Value {
    match value {
        Value::Node(element) => Value::Text(element.text_content()),
        other => other,
    }
}
