//! Configuration types for the SOAP codec.

use crate::descriptor::{Direction, MessageOptions};
use crate::error::SoapError;
use crate::schema::Definitions;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the SOAP codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoapCodecConfig {
    /// Envelope version
    pub version: SoapVersion,

    /// General settings
    pub settings: SettingsConfig,

    /// Extra namespace prefixes (prefix → URI)
    pub prefixes: IndexMap<String, String>,

    /// Inline schema definitions
    pub schemas: Vec<Definitions>,

    /// Schema definition files, loaded by the binary
    pub schema_files: Vec<PathBuf>,

    /// Named message definitions
    pub messages: IndexMap<String, MessageConfig>,
}

impl Default for SoapCodecConfig {
    fn default() -> Self {
        Self {
            version: SoapVersion::Soap11,
            settings: SettingsConfig::default(),
            prefixes: IndexMap::new(),
            schemas: Vec::new(),
            schema_files: Vec::new(),
            messages: IndexMap::new(),
        }
    }
}

impl SoapCodecConfig {
    pub fn from_yaml(source: &str) -> Result<Self, SoapError> {
        serde_yaml::from_str(source)
            .map_err(|e| SoapError::Config(format!("Invalid configuration: {}", e)))
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Emit an XML declaration on encoded envelopes
    pub xml_declaration: bool,

    /// Maximum envelope size to decode (bytes)
    pub max_body_size: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            xml_declaration: true,
            max_body_size: 1_048_576, // 1MB
        }
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

/// One named message: its direction plus header, body and fault parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    pub direction: Direction,

    #[serde(flatten)]
    pub options: MessageOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FaultSpec, PartSpec};

    #[test]
    fn test_default_config() {
        let config = SoapCodecConfig::default();
        assert_eq!(config.version, SoapVersion::Soap11);
        assert!(config.settings.xml_declaration);
        assert_eq!(config.settings.max_body_size, 1_048_576);
        assert!(config.messages.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = SoapCodecConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = SoapCodecConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.settings.max_body_size, config.settings.max_body_size);
        assert_eq!(parsed.version, config.version);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
version: "1.1"
settings:
  xml_declaration: false
  max_body_size: 2048
prefixes:
  app: http://example.org/app
schemas:
  - namespace: http://example.org/app
    elements:
      Trans: string
schema_files:
  - schemas/app.yaml
messages:
  getPrice:
    direction: outbound
    header: [trans, "{http://example.org/app}Trans"]
    must_understand: [trans]
    destination:
      trans: NEXT
  priceFault:
    direction: inbound
    faults:
      fault1:
        element: "{http://example.org/app}elemA"
"#;
        let config = SoapCodecConfig::from_yaml(yaml).unwrap();
        assert!(!config.settings.xml_declaration);
        assert_eq!(config.settings.max_body_size, 2048);
        assert_eq!(config.prefixes["app"], "http://example.org/app");
        assert_eq!(config.schemas[0].elements["Trans"], "string");
        assert_eq!(config.schema_files.len(), 1);

        let get_price = &config.messages["getPrice"];
        assert_eq!(get_price.direction, Direction::Outbound);
        assert!(matches!(get_price.options.header, PartSpec::Pairs(ref p) if p.len() == 2));
        assert_eq!(get_price.options.must_understand, vec!["trans".to_string()]);

        let fault = &config.messages["priceFault"];
        assert_eq!(fault.direction, Direction::Inbound);
        assert!(matches!(fault.options.faults, FaultSpec::Registrations(ref r) if r.len() == 1));
    }

    #[test]
    fn test_unknown_version_rejected() {
        assert!(SoapCodecConfig::from_yaml("version: \"2.0\"").is_err());
    }
}
