//! Schema registry interface.
//!
//! The registry owns element and type definitions and hands out
//! single-element readers and writers. The envelope compiler composes
//! those codecs; it never inspects the definitions itself.

use crate::error::SoapError;
use crate::value::Value;
use crate::xml::{Element, QName};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Encodes one value as one element. `Ok(None)` means nothing to emit.
pub type ElementWriter = Arc<dyn Fn(&Value) -> Result<Option<Element>, SoapError> + Send + Sync>;

/// Decodes one element.
pub type ElementReader = Arc<dyn Fn(&Element) -> Result<Value, SoapError> + Send + Sync>;

/// Codec access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
}

/// Compiled single-element codec.
#[derive(Clone)]
pub enum Codec {
    Reader(ElementReader),
    Writer(ElementWriter),
}

impl Codec {
    pub fn into_reader(self) -> Result<ElementReader, SoapError> {
        match self {
            Codec::Reader(r) => Ok(r),
            Codec::Writer(_) => Err(SoapError::Config("expected a reader codec".to_string())),
        }
    }

    pub fn into_writer(self) -> Result<ElementWriter, SoapError> {
        match self {
            Codec::Writer(w) => Ok(w),
            Codec::Reader(_) => Err(SoapError::Config("expected a writer codec".to_string())),
        }
    }
}

/// Replaces the decoding of every field with the given local name.
#[derive(Clone)]
pub struct ReadHook {
    pub field: String,
    pub replace: ElementReader,
}

/// Which namespaces a writer declares on the element it produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NamespaceFilter {
    /// Declare lazily where first used
    #[default]
    None,
    /// Declare every namespace used in the produced subtree
    All,
    /// Like `All`, minus the listed namespaces
    AllExcept(Vec<String>),
}

impl NamespaceFilter {
    pub fn includes(&self, namespace: &str) -> bool {
        match self {
            NamespaceFilter::None => false,
            NamespaceFilter::All => true,
            NamespaceFilter::AllExcept(skip) => !skip.iter().any(|s| s == namespace),
        }
    }
}

/// Options for compiling a reader or writer.
#[derive(Clone, Default)]
pub struct CompileOptions {
    /// Element name for codecs compiled from a type
    pub element: Option<QName>,
    pub hooks: Vec<ReadHook>,
    pub include_namespaces: NamespaceFilter,
}

impl CompileOptions {
    pub fn is_default(&self) -> bool {
        self.element.is_none()
            && self.hooks.is_empty()
            && self.include_namespaces == NamespaceFilter::None
    }
}

/// Source of element readers and writers.
pub trait SchemaRegistry: Send + Sync {
    fn import_definitions(&self, definitions: Definitions) -> Result<(), SoapError>;

    /// Register prefixes, given as (prefix, namespace) pairs.
    fn add_prefixes(&self, prefixes: &[(String, String)]);

    /// Registered prefix for a namespace, if any.
    fn prefix_for(&self, namespace: &str) -> Option<String>;

    fn compile_type(
        &self,
        mode: Mode,
        type_ref: &QName,
        options: &CompileOptions,
    ) -> Result<Codec, SoapError>;

    fn reader(&self, element: &QName, options: &CompileOptions) -> Result<ElementReader, SoapError>;

    fn writer(&self, element: &QName, options: &CompileOptions) -> Result<ElementWriter, SoapError>;

    /// Run `init` at most once per `key` for this registry.
    ///
    /// Concurrent callers block until the first run completes and all
    /// observe its outcome.
    fn initialize_once(
        &self,
        key: &'static str,
        init: &dyn Fn() -> Result<(), SoapError>,
    ) -> Result<(), SoapError>;

    /// Declaration support, when the registry offers it.
    fn declarations(&self) -> Option<&dyn DeclareDefinitions> {
        None
    }
}

/// Optional registry capability: pre-compile codecs for named elements.
pub trait DeclareDefinitions {
    fn declare(&self, mode: Mode, names: &[QName]) -> Result<(), SoapError>;
}

/// Element form for the fields of complex types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElementForm {
    #[default]
    Qualified,
    Unqualified,
}

/// Schema definitions for one target namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definitions {
    pub namespace: String,

    /// Preferred prefix for the namespace
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub element_form: ElementForm,

    /// Global elements: local name → type reference
    #[serde(default)]
    pub elements: IndexMap<String, String>,

    /// Complex types: local name → ordered fields
    #[serde(default)]
    pub types: IndexMap<String, Vec<FieldDef>>,
}

/// Field of a complex type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,

    /// `string`, `qname`, `any`, or a complex type reference
    #[serde(rename = "type", default = "default_field_type")]
    pub type_ref: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub repeated: bool,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl Definitions {
    pub fn from_yaml(source: &str) -> Result<Self, SoapError> {
        serde_yaml::from_str(source)
            .map_err(|e| SoapError::Config(format!("Invalid schema definitions: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, SoapError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
