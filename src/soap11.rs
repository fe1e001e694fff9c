//! SOAP 1.1 envelope protocol.

use crate::descriptor::{normalize, Direction, MessageDescriptor, MessageOptions};
use crate::envelope::{compile_message, CompiledMessage, EnvelopeProtocol, FaultHandler, LabeledWriter};
use crate::error::SoapError;
use crate::fault::{fault_writers, FaultDecoder, FAULT};
use crate::header::route_headers;
use crate::parser::{SOAP_11_NS, XSD_NS, XSI_NS};
use crate::schema::{Definitions, Mode, SchemaRegistry};
use crate::value::Value;
use crate::xml::QName;
use std::sync::Arc;
use tracing::debug;

const ENVELOPE_DEFINITIONS: &str = include_str!("../schemas/soap11-envelope.yaml");

/// Initialization key for SOAP 1.1 setup on a registry.
const INIT_KEY: &str = "soap11";

/// Bundled SOAP 1.1 envelope definitions.
pub fn envelope_definitions() -> Result<Definitions, SoapError> {
    Definitions::from_yaml(ENVELOPE_DEFINITIONS)
}

/// SOAP 1.1 protocol bound to a schema registry.
#[derive(Clone)]
pub struct Soap11 {
    registry: Arc<dyn SchemaRegistry>,
}

impl Soap11 {
    /// Bind to `registry`, running the SOAP 1.1 setup once per registry.
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Result<Self, SoapError> {
        registry.initialize_once(INIT_KEY, &|| -> Result<(), SoapError> {
            setup(registry.as_ref())
        })?;
        Ok(Self { registry })
    }

    /// Normalize `options` and compile a sender or receiver.
    pub fn compile_message(
        &self,
        direction: Direction,
        options: MessageOptions,
    ) -> Result<CompiledMessage, SoapError> {
        let descriptor = normalize(direction, options)?;
        compile_message(self, direction, &descriptor)
    }

    /// Canned Fault answering an unrecognised mandatory header.
    pub fn reply_must_understand_fault(&self, element_type: &str) -> Value {
        Value::map([(
            FAULT,
            Value::map([
                ("faultcode", Value::from(QName::new(SOAP_11_NS, "MustUnderstand").to_string())),
                ("faultstring", Value::from(format!("SOAP mustUnderstand {}", element_type))),
            ]),
        )])
    }
}

fn setup(registry: &dyn SchemaRegistry) -> Result<(), SoapError> {
    debug!("Initializing SOAP 1.1 schema support");
    registry.add_prefixes(&[
        ("SOAP-ENV".to_string(), SOAP_11_NS.to_string()),
        ("xsd".to_string(), XSD_NS.to_string()),
        ("xsi".to_string(), XSI_NS.to_string()),
    ]);
    registry.import_definitions(envelope_definitions()?)?;

    if let Some(declarations) = registry.declarations() {
        let fault = [QName::new(SOAP_11_NS, "Fault")];
        declarations.declare(Mode::Read, &fault)?;
        declarations.declare(Mode::Write, &fault)?;
    }
    Ok(())
}

impl EnvelopeProtocol for Soap11 {
    fn namespace(&self) -> &str {
        SOAP_11_NS
    }

    fn registry(&self) -> &Arc<dyn SchemaRegistry> {
        &self.registry
    }

    fn writer_header(
        &self,
        descriptor: &MessageDescriptor,
        writers: Vec<LabeledWriter>,
    ) -> Result<Vec<LabeledWriter>, SoapError> {
        route_headers(
            SOAP_11_NS,
            &descriptor.header,
            writers,
            &descriptor.must_understand,
            &descriptor.destination,
        )
    }

    fn writer_faults(&self, descriptor: &MessageDescriptor) -> Result<Vec<LabeledWriter>, SoapError> {
        fault_writers(SOAP_11_NS, &self.registry, &descriptor.faults)
    }

    fn reader_faults(
        &self,
        descriptor: &MessageDescriptor,
    ) -> Result<Arc<dyn FaultHandler>, SoapError> {
        Ok(Arc::new(FaultDecoder::compile(
            SOAP_11_NS,
            &self.registry,
            &descriptor.faults,
        )?))
    }
}
