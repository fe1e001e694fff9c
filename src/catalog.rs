//! Named message catalog built from configuration.
//!
//! Compiles every configured message once and dispatches encode and
//! decode calls by message name.

use crate::config::{SoapCodecConfig, SoapVersion};
use crate::descriptor::Direction;
use crate::envelope::CompiledMessage;
use crate::error::SoapError;
use crate::registry::ElementSchema;
use crate::schema::{Definitions, SchemaRegistry};
use crate::soap11::Soap11;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Counters for catalog traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub encoded: u64,
    pub decoded: u64,
}

/// Compiled messages keyed by name.
pub struct MessageCatalog {
    config: SoapCodecConfig,
    protocol: Soap11,
    messages: IndexMap<String, CompiledMessage>,
    encoded: AtomicU64,
    decoded: AtomicU64,
}

impl MessageCatalog {
    /// Build the registry and compile every configured message.
    ///
    /// `extra_definitions` are imported after the inline `schemas`; the
    /// binary uses them for `schema_files`.
    pub fn new(
        config: SoapCodecConfig,
        extra_definitions: Vec<Definitions>,
    ) -> Result<Self, SoapError> {
        if config.version != SoapVersion::Soap11 {
            return Err(SoapError::UnsupportedVersion(config.version));
        }

        let schema = Arc::new(ElementSchema::new());
        let prefixes: Vec<(String, String)> = config
            .prefixes
            .iter()
            .map(|(prefix, ns)| (prefix.clone(), ns.clone()))
            .collect();
        schema.add_prefixes(&prefixes);

        for definitions in config.schemas.iter().cloned().chain(extra_definitions) {
            schema.import_definitions(definitions)?;
        }

        let protocol = Soap11::new(schema)?;

        let mut messages = IndexMap::with_capacity(config.messages.len());
        for (name, message) in &config.messages {
            debug!(message = %name, direction = ?message.direction, "Compiling configured message");
            let compiled = protocol
                .compile_message(message.direction, message.options.clone())
                .map_err(|e| SoapError::Message {
                    name: name.clone(),
                    source: Box::new(e),
                })?;
            messages.insert(name.clone(), compiled);
        }

        info!(
            version = ?config.version,
            messages = messages.len(),
            "Message catalog ready"
        );

        Ok(Self {
            config,
            protocol,
            messages,
            encoded: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
        })
    }

    pub fn protocol(&self) -> &Soap11 {
        &self.protocol
    }

    /// Configured message names, in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn message(&self, name: &str) -> Result<&CompiledMessage, SoapError> {
        self.messages
            .get(name)
            .ok_or_else(|| SoapError::UnknownMessage(name.to_string()))
    }

    /// Encode `data` with an outbound message.
    pub fn encode(&self, name: &str, data: &Value) -> Result<String, SoapError> {
        let sender = self
            .message(name)?
            .as_sender()
            .ok_or_else(|| direction_mismatch(name, Direction::Outbound))?;

        let xml = sender.to_xml(data, self.config.settings.xml_declaration)?;
        self.encoded.fetch_add(1, Ordering::Relaxed);
        Ok(xml)
    }

    /// Decode an envelope with an inbound message.
    pub fn decode(&self, name: &str, body: &[u8]) -> Result<Value, SoapError> {
        let max = self.config.settings.max_body_size;
        if body.len() > max {
            return Err(SoapError::BodyTooLarge {
                size: body.len(),
                max,
            });
        }

        let receiver = self
            .message(name)?
            .as_receiver()
            .ok_or_else(|| direction_mismatch(name, Direction::Inbound))?;

        let value = receiver.decode(body)?;
        self.decoded.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Canned Fault record for an unrecognised mandatory header.
    pub fn reply_must_understand_fault(&self, element_type: &str) -> Value {
        self.protocol.reply_must_understand_fault(element_type)
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            encoded: self.encoded.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
        }
    }
}

fn direction_mismatch(name: &str, expected: Direction) -> SoapError {
    let direction = match expected {
        Direction::Outbound => "outbound",
        Direction::Inbound => "inbound",
    };
    SoapError::Config(format!("message '{}' is not {}", name, direction))
}
