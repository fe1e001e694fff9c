//! Message descriptors and their normalization.
//!
//! Callers may describe header, body and fault parts tersely, as flat
//! `label, element, label, element, …` lists, or in structured form.
//! [`normalize`] rewrites both into a [`MessageDescriptor`].

use crate::error::SoapError;
use crate::xml::QName;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Compile a sender (encoder)
    Outbound,
    /// Compile a receiver (decoder)
    Inbound,
}

/// One message part. Parts are always literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Label, unique within its list
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub element: Option<QName>,

    #[serde(default, rename = "type")]
    pub type_ref: Option<QName>,
}

impl Part {
    pub fn element(name: impl Into<String>, element: QName) -> Self {
        Self {
            name: name.into(),
            element: Some(element),
            type_ref: None,
        }
    }

    pub fn typed(name: impl Into<String>, type_ref: QName) -> Self {
        Self {
            name: name.into(),
            element: None,
            type_ref: Some(type_ref),
        }
    }

    /// Element name on the wire: the declared element, or one synthesized
    /// from the part name in the type's namespace.
    pub fn element_name(&self, kind: &'static str) -> Result<QName, SoapError> {
        match (&self.element, &self.type_ref) {
            (Some(element), _) => Ok(element.clone()),
            (None, Some(type_ref)) => Ok(QName::new(type_ref.namespace(), self.name.as_str())),
            (None, None) => Err(SoapError::IncompletePart {
                kind,
                name: self.name.clone(),
            }),
        }
    }
}

/// Actor target(s) for a header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    /// Whitespace-separated roles
    Single(String),
    /// Ordered roles
    Roles(Vec<String>),
}

impl From<&str> for Destination {
    fn from(role: &str) -> Self {
        Destination::Single(role.to_string())
    }
}

impl From<Vec<&str>> for Destination {
    fn from(roles: Vec<&str>) -> Self {
        Destination::Roles(roles.into_iter().map(String::from).collect())
    }
}

/// Header part plus its routing flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderEntry {
    #[serde(flatten)]
    pub part: Part,

    #[serde(default)]
    pub must_understand: Option<bool>,

    #[serde(default)]
    pub destination: Option<Destination>,
}

impl From<Part> for HeaderEntry {
    fn from(part: Part) -> Self {
        Self {
            part,
            must_understand: None,
            destination: None,
        }
    }
}

/// Registered fault: its detail part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRegistration {
    #[serde(flatten)]
    pub part: Part,
}

/// Part list in flat pair form or structured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartSpec<T> {
    Pairs(Vec<String>),
    Structured(Vec<T>),
}

impl<T> Default for PartSpec<T> {
    fn default() -> Self {
        PartSpec::Structured(Vec::new())
    }
}

/// Fault list in flat pair form or as a name → registration mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FaultSpec {
    Pairs(Vec<String>),
    Registrations(IndexMap<String, FaultRegistration>),
}

impl Default for FaultSpec {
    fn default() -> Self {
        FaultSpec::Registrations(IndexMap::new())
    }
}

/// Message options as given by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    pub header: PartSpec<HeaderEntry>,
    pub body: PartSpec<Part>,
    pub faults: FaultSpec,

    /// Header labels that must be understood
    #[serde(deserialize_with = "one_or_many")]
    pub must_understand: Vec<String>,

    /// Header label → actor
    pub destination: IndexMap<String, Destination>,
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = PartSpec::Pairs(pairs.into_iter().map(Into::into).collect());
        self
    }

    pub fn headers(mut self, entries: Vec<HeaderEntry>) -> Self {
        self.header = PartSpec::Structured(entries);
        self
    }

    pub fn body_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.body = PartSpec::Pairs(pairs.into_iter().map(Into::into).collect());
        self
    }

    pub fn body(mut self, parts: Vec<Part>) -> Self {
        self.body = PartSpec::Structured(parts);
        self
    }

    pub fn fault_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.faults = FaultSpec::Pairs(pairs.into_iter().map(Into::into).collect());
        self
    }

    pub fn fault(mut self, name: impl Into<String>, part: Part) -> Self {
        let name = name.into();
        if !matches!(self.faults, FaultSpec::Registrations(_)) {
            self.faults = FaultSpec::default();
        }
        if let FaultSpec::Registrations(registrations) = &mut self.faults {
            registrations.insert(name, FaultRegistration { part });
        }
        self
    }

    pub fn must_understand(mut self, label: impl Into<String>) -> Self {
        self.must_understand.push(label.into());
        self
    }

    pub fn destination(mut self, label: impl Into<String>, actor: impl Into<Destination>) -> Self {
        self.destination.insert(label.into(), actor.into());
        self
    }
}

/// Normalized message description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDescriptor {
    pub header: Vec<HeaderEntry>,
    pub body: Vec<Part>,
    pub faults: IndexMap<String, FaultRegistration>,
    pub must_understand: Vec<String>,
    pub destination: IndexMap<String, Destination>,
}

/// Rewrite flat pair lists into structured descriptors.
///
/// The direction does not change the shape; it is validated by the
/// compiler that consumes the descriptor.
pub fn normalize(
    _direction: Direction,
    options: MessageOptions,
) -> Result<MessageDescriptor, SoapError> {
    let header = match options.header {
        PartSpec::Pairs(pairs) => parts_from_pairs("header", &pairs)?
            .into_iter()
            .map(HeaderEntry::from)
            .collect(),
        PartSpec::Structured(entries) => entries,
    };

    let body = match options.body {
        PartSpec::Pairs(pairs) => parts_from_pairs("body", &pairs)?,
        PartSpec::Structured(parts) => parts,
    };

    let faults = match options.faults {
        FaultSpec::Pairs(pairs) => parts_from_pairs("faults", &pairs)?
            .into_iter()
            .map(|part| (part.name.clone(), FaultRegistration { part }))
            .collect(),
        FaultSpec::Registrations(registrations) => registrations
            .into_iter()
            .map(|(name, mut registration)| {
                if registration.part.name.is_empty() {
                    registration.part.name = name.clone();
                }
                (name, registration)
            })
            .collect(),
    };

    Ok(MessageDescriptor {
        header,
        body,
        faults,
        must_understand: options.must_understand,
        destination: options.destination,
    })
}

fn parts_from_pairs(field: &'static str, pairs: &[String]) -> Result<Vec<Part>, SoapError> {
    if pairs.len() % 2 != 0 {
        return Err(SoapError::OddPairs {
            field,
            len: pairs.len(),
        });
    }

    pairs
        .chunks(2)
        .map(|pair| -> Result<Part, SoapError> {
            Ok(Part::element(pair[0].as_str(), pair[1].parse()?))
        })
        .collect()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(label) => vec![label],
        OneOrMany::Many(labels) => labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = "http://example.org/app";

    #[test]
    fn test_flat_pairs_become_parts() {
        let options = MessageOptions::new()
            .body_pairs(["req", "{http://example.org/app}GetPrice"])
            .header_pairs(["trans", "{http://example.org/app}Trans", "auth", "{http://example.org/app}Auth"])
            .fault_pairs(["fault1", "{http://example.org/app}elemA"]);

        let desc = normalize(Direction::Outbound, options).unwrap();
        assert_eq!(desc.body, vec![Part::element("req", QName::new(APP, "GetPrice"))]);
        assert_eq!(desc.header.len(), 2);
        assert_eq!(desc.header[1].part.name, "auth");
        assert_eq!(desc.header[1].must_understand, None);
        assert_eq!(
            desc.faults["fault1"].part,
            Part::element("fault1", QName::new(APP, "elemA"))
        );
    }

    #[test]
    fn test_odd_pairs_rejected() {
        let options = MessageOptions::new().body_pairs(["req"]);
        let err = normalize(Direction::Outbound, options).unwrap_err();
        assert!(matches!(err, SoapError::OddPairs { field: "body", len: 1 }));

        let options = MessageOptions::new().fault_pairs(["a", "{urn:x}b", "c"]);
        assert!(matches!(
            normalize(Direction::Inbound, options),
            Err(SoapError::OddPairs { field: "faults", len: 3 })
        ));
    }

    #[test]
    fn test_structured_form_passes_through() {
        let entry = HeaderEntry {
            part: Part::element("trans", QName::new(APP, "Trans")),
            must_understand: Some(false),
            destination: Some("NEXT".into()),
        };
        let options = MessageOptions::new()
            .headers(vec![entry.clone()])
            .fault("fault2", Part::typed("", QName::new(APP, "ProblemType")));

        let desc = normalize(Direction::Outbound, options).unwrap();
        assert_eq!(desc.header, vec![entry]);
        // Registration name fills an empty part name
        assert_eq!(desc.faults["fault2"].part.name, "fault2");
    }

    #[test]
    fn test_element_name_synthesis() {
        let typed = Part::typed("fault2", QName::new(APP, "ProblemType"));
        assert_eq!(typed.element_name("fault").unwrap(), QName::new(APP, "fault2"));

        let empty = Part {
            name: "broken".to_string(),
            element: None,
            type_ref: None,
        };
        assert!(matches!(
            empty.element_name("fault"),
            Err(SoapError::IncompletePart { kind: "fault", .. })
        ));
    }

    #[test]
    fn test_options_from_yaml() {
        let options: MessageOptions = serde_yaml::from_str(
            r#"
header: [trans, "{http://example.org/app}Trans"]
body:
  - name: req
    element: "{http://example.org/app}GetPrice"
faults:
  fault1:
    element: "{http://example.org/app}elemA"
must_understand: trans
destination:
  trans: NEXT
"#,
        )
        .unwrap();

        assert!(matches!(options.header, PartSpec::Pairs(ref p) if p.len() == 2));
        assert!(matches!(options.body, PartSpec::Structured(ref p) if p[0].name == "req"));
        assert!(matches!(options.faults, FaultSpec::Registrations(ref r) if r.contains_key("fault1")));
        assert_eq!(options.must_understand, vec!["trans".to_string()]);
        assert_eq!(options.destination["trans"], Destination::Single("NEXT".to_string()));
    }
}
