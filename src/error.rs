//! Error types for the SOAP codec.

use crate::config::SoapVersion;
use thiserror::Error;

/// SOAP codec errors.
///
/// Compile-time configuration errors (incomplete parts, routing options for
/// unknown headers, unsupported envelope versions) surface from message
/// compilation; the remaining variants come from encode and decode calls.
#[derive(Error, Debug)]
pub enum SoapError {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("XML writing error: {0}")]
    XmlWrite(String),

    #[error("Invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),

    #[error("XXE attack detected: {0}")]
    XxeDetected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{field} must be a list of label/element pairs, got {len} items")]
    OddPairs { field: &'static str, len: usize },

    #[error("{kind} part '{name}' has neither element nor type")]
    IncompletePart { kind: &'static str, name: String },

    #[error("mustUnderstand for unknown header {}", .0.join(", "))]
    MustUnderstandUnknown(Vec<String>),

    #[error("destination for unknown header {}", .0.join(", "))]
    DestinationUnknown(Vec<String>),

    #[error("SOAP version {0:?} has no envelope protocol implementation")]
    UnsupportedVersion(SoapVersion),

    #[error("Unknown element {0}")]
    UnknownElement(String),

    #[error("Unknown type {0}")]
    UnknownType(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Data for unknown parts: {}", .0.join(", "))]
    UnusedData(Vec<String>),

    #[error("Schema initialization failed: {0}")]
    Init(String),

    #[error("Message body size {size} exceeds maximum {max}")]
    BodyTooLarge { size: usize, max: usize },

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("message '{name}': {source}")]
    Message {
        name: String,
        #[source]
        source: Box<SoapError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SoapError {
    /// Whether this error was raised while compiling a message definition.
    pub fn is_compile_error(&self) -> bool {
        if let Self::Message { source, .. } = self {
            return source.is_compile_error();
        }
        matches!(
            self,
            Self::Config(_)
                | Self::OddPairs { .. }
                | Self::IncompletePart { .. }
                | Self::MustUnderstandUnknown(_)
                | Self::DestinationUnknown(_)
                | Self::UnsupportedVersion(_)
                | Self::UnknownElement(_)
                | Self::UnknownType(_)
                | Self::Init(_)
        )
    }
}

pub(crate) fn xml_write_err<E: std::fmt::Display>(e: E) -> SoapError {
    SoapError::XmlWrite(e.to_string())
}

pub(crate) fn xml_parse_err<E: std::fmt::Display>(e: E) -> SoapError {
    SoapError::XmlParse(e.to_string())
}
