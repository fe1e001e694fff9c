//! In-memory schema registry.
//!
//! `ElementSchema` compiles element readers and writers from
//! [`Definitions`]: global elements bound to simple or complex types,
//! complex types being ordered field lists. It is deliberately small;
//! it covers what SOAP envelopes and typical document/literal payloads
//! need, not XML Schema.

use crate::error::SoapError;
use crate::parser::{resolve_qname_text, XSD_NS};
use crate::schema::{
    Codec, CompileOptions, DeclareDefinitions, Definitions, ElementForm, ElementReader,
    ElementWriter, Mode, NamespaceFilter, ReadHook, SchemaRegistry,
};
use crate::value::{Map, Value};
use crate::xml::{Element, Node, QName};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

const SIMPLE_TYPES: &[&str] = &[
    "string", "int", "integer", "long", "short", "boolean", "decimal", "double", "float",
    "anyURI", "date", "dateTime", "token",
];

#[derive(Debug, Clone, PartialEq)]
enum TypeRef {
    Simple,
    QName,
    Any,
    Complex(QName),
}

impl TypeRef {
    /// Parse a type reference as written in definitions.
    fn parse(raw: &str, namespace: &str) -> Result<Self, SoapError> {
        match raw {
            "qname" | "QName" => Ok(TypeRef::QName),
            "any" | "anyType" => Ok(TypeRef::Any),
            s if SIMPLE_TYPES.contains(&s) => Ok(TypeRef::Simple),
            s if s.starts_with('{') => Ok(Self::from_qname(&s.parse()?)),
            s => Ok(TypeRef::Complex(QName::new(namespace, s))),
        }
    }

    fn from_qname(name: &QName) -> Self {
        if name.namespace() == XSD_NS {
            match name.local_name() {
                "QName" => TypeRef::QName,
                "anyType" => TypeRef::Any,
                _ => TypeRef::Simple,
            }
        } else {
            TypeRef::Complex(name.clone())
        }
    }
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: QName,
    type_ref: TypeRef,
    optional: bool,
    repeated: bool,
}

enum Compiled {
    Simple,
    QName,
    Any,
    Complex(Vec<CompiledField>),
}

struct CompiledField {
    name: QName,
    kind: Compiled,
    optional: bool,
    repeated: bool,
    hook: Option<ElementReader>,
}

type InitGuard = Arc<OnceLock<Result<(), String>>>;

/// Registry of element and type definitions.
#[derive(Default)]
pub struct ElementSchema {
    elements: RwLock<HashMap<QName, TypeRef>>,
    types: RwLock<HashMap<QName, Vec<FieldSpec>>>,
    /// namespace → prefix
    prefixes: RwLock<IndexMap<String, String>>,
    declared: RwLock<HashMap<(Mode, QName), Codec>>,
    init_guards: Mutex<HashMap<&'static str, InitGuard>>,
}

impl ElementSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_element(&self, element: &QName) -> bool {
        self.elements.read().contains_key(element)
    }

    fn element_type(&self, element: &QName) -> Result<TypeRef, SoapError> {
        self.elements
            .read()
            .get(element)
            .cloned()
            .ok_or_else(|| SoapError::UnknownElement(element.to_string()))
    }

    fn compile(
        &self,
        type_ref: &TypeRef,
        hooks: &[ReadHook],
        visiting: &mut Vec<QName>,
    ) -> Result<Compiled, SoapError> {
        let name = match type_ref {
            TypeRef::Simple => return Ok(Compiled::Simple),
            TypeRef::QName => return Ok(Compiled::QName),
            TypeRef::Any => return Ok(Compiled::Any),
            TypeRef::Complex(name) => name,
        };

        if visiting.contains(name) {
            return Err(SoapError::Config(format!("Recursive type {}", name)));
        }
        let fields = self
            .types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SoapError::UnknownType(name.to_string()))?;

        visiting.push(name.clone());
        let mut compiled = Vec::with_capacity(fields.len());
        for field in fields {
            let hook = hooks
                .iter()
                .find(|h| h.field == field.name.local_name())
                .map(|h| h.replace.clone());
            compiled.push(CompiledField {
                kind: self.compile(&field.type_ref, hooks, visiting)?,
                name: field.name,
                optional: field.optional,
                repeated: field.repeated,
                hook,
            });
        }
        visiting.pop();

        Ok(Compiled::Complex(compiled))
    }

    fn build(
        &self,
        mode: Mode,
        element: QName,
        type_ref: &TypeRef,
        options: &CompileOptions,
    ) -> Result<Codec, SoapError> {
        let kind = Arc::new(self.compile(type_ref, &options.hooks, &mut Vec::new())?);
        trace!(element = %element, mode = ?mode, "Compiled element codec");

        Ok(match mode {
            Mode::Read => {
                Codec::Reader(Arc::new(move |node: &Element| read_value(node, &kind)))
            }
            Mode::Write => {
                let filter = options.include_namespaces.clone();
                Codec::Writer(Arc::new(move |value: &Value| -> Result<Option<Element>, SoapError> {
                    if value.is_null() {
                        return Ok(None);
                    }
                    let mut node = write_value(&element, &kind, value)?;
                    if filter != NamespaceFilter::None {
                        node.declare = node
                            .namespaces_used()
                            .into_iter()
                            .filter(|ns| filter.includes(ns))
                            .collect();
                    }
                    Ok(Some(node))
                }))
            }
        })
    }

    fn element_codec(
        &self,
        mode: Mode,
        element: &QName,
        options: &CompileOptions,
    ) -> Result<Codec, SoapError> {
        if options.is_default() {
            if let Some(codec) = self.declared.read().get(&(mode, element.clone())) {
                return Ok(codec.clone());
            }
        }
        let type_ref = self.element_type(element)?;
        self.build(mode, element.clone(), &type_ref, options)
    }
}

impl SchemaRegistry for ElementSchema {
    fn import_definitions(&self, definitions: Definitions) -> Result<(), SoapError> {
        let ns = definitions.namespace.as_str();

        let mut elements = Vec::with_capacity(definitions.elements.len());
        for (local, type_ref) in &definitions.elements {
            elements.push((QName::new(ns, local.as_str()), TypeRef::parse(type_ref, ns)?));
        }

        let mut types = Vec::with_capacity(definitions.types.len());
        for (local, fields) in &definitions.types {
            let mut specs = Vec::with_capacity(fields.len());
            for field in fields {
                let field_ns = match definitions.element_form {
                    ElementForm::Qualified => ns,
                    ElementForm::Unqualified => "",
                };
                specs.push(FieldSpec {
                    name: QName::new(field_ns, field.name.as_str()),
                    type_ref: TypeRef::parse(&field.type_ref, ns)?,
                    optional: field.optional,
                    repeated: field.repeated,
                });
            }
            types.push((QName::new(ns, local.as_str()), specs));
        }

        debug!(
            namespace = ns,
            elements = elements.len(),
            types = types.len(),
            "Importing schema definitions"
        );

        self.elements.write().extend(elements);
        self.types.write().extend(types);
        if let Some(prefix) = definitions.prefix {
            self.prefixes
                .write()
                .entry(definitions.namespace)
                .or_insert(prefix);
        }
        Ok(())
    }

    fn add_prefixes(&self, prefixes: &[(String, String)]) {
        let mut table = self.prefixes.write();
        for (prefix, namespace) in prefixes {
            table.insert(namespace.clone(), prefix.clone());
        }
    }

    fn prefix_for(&self, namespace: &str) -> Option<String> {
        self.prefixes.read().get(namespace).cloned()
    }

    fn compile_type(
        &self,
        mode: Mode,
        type_ref: &QName,
        options: &CompileOptions,
    ) -> Result<Codec, SoapError> {
        let element = options
            .element
            .clone()
            .unwrap_or_else(|| type_ref.clone());
        self.build(mode, element, &TypeRef::from_qname(type_ref), options)
    }

    fn reader(&self, element: &QName, options: &CompileOptions) -> Result<ElementReader, SoapError> {
        self.element_codec(Mode::Read, element, options)?.into_reader()
    }

    fn writer(&self, element: &QName, options: &CompileOptions) -> Result<ElementWriter, SoapError> {
        self.element_codec(Mode::Write, element, options)?.into_writer()
    }

    fn initialize_once(
        &self,
        key: &'static str,
        init: &dyn Fn() -> Result<(), SoapError>,
    ) -> Result<(), SoapError> {
        let guard = self.init_guards.lock().entry(key).or_default().clone();
        match guard.get_or_init(|| init().map_err(|e| e.to_string())) {
            Ok(()) => Ok(()),
            Err(msg) => Err(SoapError::Init(msg.clone())),
        }
    }

    fn declarations(&self) -> Option<&dyn DeclareDefinitions> {
        Some(self)
    }
}

impl DeclareDefinitions for ElementSchema {
    fn declare(&self, mode: Mode, names: &[QName]) -> Result<(), SoapError> {
        for name in names {
            let codec = self.element_codec(mode, name, &CompileOptions::default())?;
            self.declared.write().insert((mode, name.clone()), codec);
        }
        Ok(())
    }
}

fn write_value(name: &QName, kind: &Compiled, value: &Value) -> Result<Element, SoapError> {
    let mut node = Element::new(name.clone());

    match kind {
        Compiled::Simple => {
            if !value.is_null() {
                let text = value.text_content().ok_or_else(|| {
                    SoapError::Encode(format!("{} expects a scalar value", name))
                })?;
                node.push_text(text);
            }
        }
        Compiled::QName => {
            let text = value
                .as_str()
                .ok_or_else(|| SoapError::Encode(format!("{} expects a qualified name", name)))?;
            if text.starts_with('{') {
                node.children.push(Node::QName(text.parse()?));
            } else {
                node.push_text(text);
            }
        }
        Compiled::Any => write_any(&mut node, value),
        Compiled::Complex(fields) => {
            let map = value
                .as_map()
                .ok_or_else(|| SoapError::Encode(format!("{} expects a map of fields", name)))?;

            if let Some(unknown) = map
                .keys()
                .find(|key| !fields.iter().any(|f| f.name.local_name() == key.as_str()))
            {
                return Err(SoapError::Encode(format!(
                    "Unknown field '{}' for {}",
                    unknown, name
                )));
            }

            for field in fields {
                match map.get(field.name.local_name()) {
                    None | Some(Value::Null) => {
                        if !field.optional {
                            return Err(SoapError::Encode(format!(
                                "Missing required field '{}' for {}",
                                field.name.local_name(),
                                name
                            )));
                        }
                    }
                    Some(Value::List(items)) if field.repeated => {
                        for item in items {
                            node.push_child(write_value(&field.name, &field.kind, item)?);
                        }
                    }
                    Some(v) => node.push_child(write_value(&field.name, &field.kind, v)?),
                }
            }
        }
    }

    Ok(node)
}

fn write_any(node: &mut Element, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => node.push_text(b.to_string()),
        Value::Text(t) => node.push_text(t.clone()),
        Value::Node(e) => node.push_child(e.clone()),
        Value::List(items) => {
            for item in items {
                write_any(node, item);
            }
        }
        Value::Map(map) => {
            for (key, item) in map {
                if !key.starts_with('_') {
                    write_any(node, item);
                }
            }
        }
    }
}

fn read_value(node: &Element, kind: &Compiled) -> Result<Value, SoapError> {
    match kind {
        Compiled::Simple => Ok(Value::Text(node.text_content())),
        Compiled::QName => {
            let name = resolve_qname_text(node, &node.text_content())?;
            Ok(Value::Text(name.to_string()))
        }
        Compiled::Any => Ok(Value::Node(node.clone())),
        Compiled::Complex(fields) => {
            let mut map = Map::new();

            for child in node.child_elements() {
                let field = fields.iter().find(|f| f.name == child.name).ok_or_else(|| {
                    SoapError::Decode(format!(
                        "Unexpected element {} in {}",
                        child.name, node.name
                    ))
                })?;

                let value = match &field.hook {
                    Some(hook) => hook(child)?,
                    None => read_value(child, &field.kind)?,
                };

                let key = field.name.local_name().to_string();
                if field.repeated {
                    if let Value::List(items) =
                        map.entry(key).or_insert_with(|| Value::List(Vec::new()))
                    {
                        items.push(value);
                    }
                } else if map.insert(key, value).is_some() {
                    return Err(SoapError::Decode(format!(
                        "Element {} occurs more than once in {}",
                        child.name, node.name
                    )));
                }
            }

            if let Some(missing) = fields
                .iter()
                .find(|f| !f.optional && !map.contains_key(f.name.local_name()))
            {
                return Err(SoapError::Decode(format!(
                    "Missing element {} in {}",
                    missing.name, node.name
                )));
            }

            Ok(Value::Map(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const APP: &str = "http://example.org/app";

    fn schema() -> ElementSchema {
        let schema = ElementSchema::new();
        schema
            .import_definitions(
                Definitions::from_yaml(
                    r#"
namespace: http://example.org/app
prefix: app
elements:
  Trans: string
  Problem: ProblemType
types:
  ProblemType:
    - name: id
    - name: note
      optional: true
      repeated: true
"#,
                )
                .unwrap(),
            )
            .unwrap();
        schema
    }

    fn problem() -> QName {
        QName::new(APP, "Problem")
    }

    #[test]
    fn test_writer_builds_fields_in_order() {
        let schema = schema();
        let writer = schema.writer(&problem(), &CompileOptions::default()).unwrap();
        let value = Value::map([
            ("note", Value::List(vec!["a".into(), "b".into()])),
            ("id", "7".into()),
        ]);
        let node = writer(&value).unwrap().unwrap();
        let xml = crate::xml::write_document(&node, &|ns: &str| schema.prefix_for(ns), false).unwrap();
        assert_eq!(
            xml,
            r#"<app:Problem xmlns:app="http://example.org/app"><app:id>7</app:id><app:note>a</app:note><app:note>b</app:note></app:Problem>"#
        );
    }

    #[test]
    fn test_writer_rejects_unknown_and_missing_fields() {
        let schema = schema();
        let writer = schema.writer(&problem(), &CompileOptions::default()).unwrap();
        assert!(writer(&Value::map([("id", "1".into()), ("bogus", "x".into())])).is_err());
        assert!(writer(&Value::map([("note", "x".into())])).is_err());
        assert!(writer(&Value::Null).unwrap().is_none());
    }

    #[test]
    fn test_reader_decodes_and_rejects_unexpected() {
        let schema = schema();
        let reader = schema.reader(&problem(), &CompileOptions::default()).unwrap();

        let node = parse_document(
            br#"<a:Problem xmlns:a="http://example.org/app"><a:id>7</a:id><a:note>x</a:note></a:Problem>"#,
        )
        .unwrap();
        let value = reader(&node).unwrap();
        assert_eq!(value.get("id"), Some(&Value::from("7")));
        assert_eq!(value.get("note"), Some(&Value::List(vec!["x".into()])));

        let bad = parse_document(
            br#"<a:Problem xmlns:a="http://example.org/app"><a:id>7</a:id><a:other/></a:Problem>"#,
        )
        .unwrap();
        assert!(matches!(reader(&bad), Err(SoapError::Decode(_))));
    }

    #[test]
    fn test_unknown_element() {
        let schema = schema();
        let err = schema
            .reader(&QName::new(APP, "Nope"), &CompileOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, SoapError::UnknownElement(_)));
    }

    #[test]
    fn test_compile_type_with_element_name() {
        let schema = schema();
        let options = CompileOptions {
            element: Some(QName::new(APP, "fault2")),
            ..Default::default()
        };
        let writer = schema
            .compile_type(Mode::Write, &QName::new(APP, "ProblemType"), &options)
            .unwrap()
            .into_writer()
            .unwrap();
        let node = writer(&Value::map([("id", "1".into())])).unwrap().unwrap();
        assert_eq!(node.name, QName::new(APP, "fault2"));
    }

    #[test]
    fn test_include_namespaces_filter() {
        let schema = schema();
        let options = CompileOptions {
            include_namespaces: NamespaceFilter::AllExcept(vec!["urn:skip".to_string()]),
            ..Default::default()
        };
        let writer = schema.writer(&problem(), &options).unwrap();
        let node = writer(&Value::map([("id", "1".into())])).unwrap().unwrap();
        assert_eq!(node.declare, vec![APP.to_string()]);
    }

    #[test]
    fn test_read_hook_replaces_field() {
        let schema = schema();
        let options = CompileOptions {
            hooks: vec![ReadHook {
                field: "id".to_string(),
                replace: Arc::new(|_: &Element| -> Result<Value, SoapError> {
                    Ok(Value::from("hooked"))
                }),
            }],
            ..Default::default()
        };
        let reader = schema.reader(&problem(), &options).unwrap();
        let node = parse_document(
            br#"<a:Problem xmlns:a="http://example.org/app"><a:id>7</a:id></a:Problem>"#,
        )
        .unwrap();
        assert_eq!(reader(&node).unwrap().get("id"), Some(&Value::from("hooked")));
    }

    #[test]
    fn test_initialize_once_runs_once() {
        let schema = schema();
        let runs = AtomicUsize::new(0);
        let init = || -> Result<(), SoapError> {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        schema.initialize_once("proto", &init).unwrap();
        schema.initialize_once("proto", &init).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Guards are per registry instance
        let other = ElementSchema::new();
        other.initialize_once("proto", &init).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_initialize_once_concurrent() {
        let schema = Arc::new(schema());
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let schema = Arc::clone(&schema);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    schema
                        .initialize_once("proto", &|| -> Result<(), SoapError> {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_declare_caches_codecs() {
        let schema = schema();
        let declarations = schema.declarations().unwrap();
        declarations.declare(Mode::Write, &[problem()]).unwrap();
        assert!(schema.declared.read().contains_key(&(Mode::Write, problem())));
        assert!(declarations
            .declare(Mode::Read, &[QName::new(APP, "Missing")])
            .is_err());
    }
}
