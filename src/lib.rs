//! SOAP 1.1 envelope codec for Zentinel
//!
//! Compiles declarative message descriptors into envelope encoders
//! (senders) and decoders (receivers), composing per-element codecs
//! supplied by a schema registry.
//!
//! # Features
//!
//! - Terse or structured header, body and fault descriptors
//! - Header routing: `mustUnderstand` and `actor` attributes
//! - Fault encoding with application-namespace detail payloads
//! - Fault decoding with classification into named records
//! - XXE (XML External Entity) rejection on decode
//! - YAML-configured message catalog and CLI
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zentinel_soap_codec::{Direction, ElementSchema, MessageOptions, Soap11};
//!
//! let soap = Soap11::new(Arc::new(ElementSchema::new()))?;
//! let message = soap.compile_message(
//!     Direction::Outbound,
//!     MessageOptions::new()
//!         .header_pairs(["trans", "{http://example.org/app}Trans"])
//!         .must_understand("trans"),
//! )?;
//! ```

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod header;
pub mod parser;
pub mod registry;
pub mod role;
pub mod schema;
pub mod soap11;
pub mod value;
pub mod xml;

pub use catalog::MessageCatalog;
pub use config::{SoapCodecConfig, SoapVersion};
pub use descriptor::{Direction, MessageOptions, Part};
pub use envelope::{CompiledMessage, EnvelopeProtocol, Receiver, Sender};
pub use error::SoapError;
pub use fault::FaultClass;
pub use registry::ElementSchema;
pub use schema::{Definitions, SchemaRegistry};
pub use soap11::Soap11;
pub use value::Value;
pub use xml::QName;
