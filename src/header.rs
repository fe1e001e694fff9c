//! Header routing: mustUnderstand and actor attributes on header entries.

use crate::descriptor::{Destination, HeaderEntry};
use crate::envelope::LabeledWriter;
use crate::error::SoapError;
use crate::role::role_uri;
use crate::schema::ElementWriter;
use crate::value::Value;
use crate::xml::{Element, QName};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tracing::debug;

/// Routing resolved for one header entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderRouting {
    pub must_understand: Option<bool>,
    pub actor: Option<String>,
}

impl HeaderRouting {
    pub fn is_empty(&self) -> bool {
        self.must_understand.is_none() && self.actor.is_none()
    }
}

/// Resolve routing for each header and wrap the writers that need it.
///
/// `writers` must be the base-compiled writers for `entries`, in the same
/// order. Flags on the entry take precedence over call-time options; the
/// matching option is consumed either way. Options naming no header are
/// an error.
pub fn route_headers(
    envelope_ns: &str,
    entries: &[HeaderEntry],
    writers: Vec<LabeledWriter>,
    must_understand: &[String],
    destination: &IndexMap<String, Destination>,
) -> Result<Vec<LabeledWriter>, SoapError> {
    let mut pending_mu: IndexSet<&str> = must_understand.iter().map(String::as_str).collect();
    let mut pending_dest: IndexMap<&str, &Destination> =
        destination.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut routed = Vec::with_capacity(writers.len());
    for (entry, labeled) in entries.iter().zip(writers) {
        let from_option_mu = pending_mu.shift_remove(labeled.label.as_str());
        let from_option_dest = pending_dest.shift_remove(labeled.label.as_str());

        let routing = HeaderRouting {
            must_understand: entry.must_understand.or(from_option_mu.then_some(true)),
            actor: entry
                .destination
                .as_ref()
                .or(from_option_dest)
                .map(actor_uris)
                .filter(|actor| !actor.is_empty()),
        };

        if routing.is_empty() {
            routed.push(labeled);
            continue;
        }

        debug!(
            header = %labeled.label,
            must_understand = ?routing.must_understand,
            actor = ?routing.actor,
            "Decorating header writer"
        );
        routed.push(LabeledWriter {
            writer: decorate(envelope_ns, labeled.writer, routing),
            label: labeled.label,
        });
    }

    if !pending_mu.is_empty() {
        return Err(SoapError::MustUnderstandUnknown(
            pending_mu.into_iter().map(String::from).collect(),
        ));
    }
    if !pending_dest.is_empty() {
        return Err(SoapError::DestinationUnknown(
            pending_dest.into_keys().map(String::from).collect(),
        ));
    }

    Ok(routed)
}

/// Space-separated actor URIs for a destination.
pub fn actor_uris(destination: &Destination) -> String {
    let uris: Vec<&str> = match destination {
        Destination::Roles(roles) => roles.iter().map(|r| role_uri(r)).collect(),
        Destination::Single(roles) => roles.split_whitespace().map(role_uri).collect(),
    };
    uris.join(" ")
}

/// Wrap a header writer so it sets the routing attributes.
pub fn decorate(envelope_ns: &str, writer: ElementWriter, routing: HeaderRouting) -> ElementWriter {
    let mu_attr = QName::new(envelope_ns, "mustUnderstand");
    let actor_attr = QName::new(envelope_ns, "actor");

    Arc::new(move |value: &Value| -> Result<Option<Element>, SoapError> {
        let Some(mut element) = writer(value)? else {
            return Ok(None);
        };
        if let Some(mu) = routing.must_understand {
            element.set_attribute(mu_attr.clone(), if mu { "1" } else { "0" });
        }
        if let Some(actor) = &routing.actor {
            element.set_attribute(actor_attr.clone(), actor.as_str());
        }
        Ok(Some(element))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Part;
    use crate::parser::SOAP_11_NS;
    use crate::role::ACTOR_NEXT;
    use crate::xml::Node;

    const APP: &str = "http://example.org/app";

    fn plain_writer() -> ElementWriter {
        Arc::new(|value: &Value| -> Result<Option<Element>, SoapError> {
            let text = value.as_str().unwrap_or_default();
            Ok(Some(Element::new(QName::new(APP, "Trans")).with_text(text)))
        })
    }

    fn entry(label: &str) -> HeaderEntry {
        HeaderEntry::from(Part::element(label, QName::new(APP, "Trans")))
    }

    fn labeled(label: &str) -> LabeledWriter {
        LabeledWriter {
            label: label.to_string(),
            writer: plain_writer(),
        }
    }

    fn write(writers: &[LabeledWriter], label: &str) -> Element {
        let lw = writers.iter().find(|w| w.label == label).unwrap();
        (lw.writer)(&Value::from("234")).unwrap().unwrap()
    }

    fn mu_attr() -> QName {
        QName::new(SOAP_11_NS, "mustUnderstand")
    }

    fn actor_attr() -> QName {
        QName::new(SOAP_11_NS, "actor")
    }

    #[test]
    fn test_undecorated_headers_keep_writer() {
        let original = labeled("trans");
        let original_writer = original.writer.clone();
        let routed = route_headers(
            SOAP_11_NS,
            &[entry("trans")],
            vec![original],
            &[],
            &IndexMap::new(),
        )
        .unwrap();

        assert!(Arc::ptr_eq(&routed[0].writer, &original_writer));
        let out = write(&routed, "trans");
        assert!(out.attributes.is_empty());
        assert_eq!(out.to_xml().unwrap(), original_writer(&Value::from("234")).unwrap().unwrap().to_xml().unwrap());
    }

    #[test]
    fn test_must_understand_from_options() {
        let routed = route_headers(
            SOAP_11_NS,
            &[entry("trans"), entry("other")],
            vec![labeled("trans"), labeled("other")],
            &["trans".to_string()],
            &IndexMap::new(),
        )
        .unwrap();

        assert_eq!(write(&routed, "trans").attribute(&mu_attr()), Some("1"));
        assert_eq!(write(&routed, "other").attribute(&mu_attr()), None);
    }

    #[test]
    fn test_explicit_false_emits_zero() {
        let mut e = entry("trans");
        e.must_understand = Some(false);
        let routed =
            route_headers(SOAP_11_NS, &[e], vec![labeled("trans")], &[], &IndexMap::new()).unwrap();
        assert_eq!(write(&routed, "trans").attribute(&mu_attr()), Some("0"));
    }

    #[test]
    fn test_entry_flag_wins_and_consumes_option() {
        let mut e = entry("trans");
        e.must_understand = Some(false);
        let routed = route_headers(
            SOAP_11_NS,
            &[e],
            vec![labeled("trans")],
            &["trans".to_string()],
            &IndexMap::new(),
        )
        .unwrap();
        assert_eq!(write(&routed, "trans").attribute(&mu_attr()), Some("0"));
    }

    #[test]
    fn test_destination_roles_are_translated() {
        let mut destination = IndexMap::new();
        destination.insert("trans".to_string(), Destination::from(vec!["NEXT", "urn:gateway"]));
        destination.insert("other".to_string(), Destination::from("urn:a NEXT"));

        let routed = route_headers(
            SOAP_11_NS,
            &[entry("trans"), entry("other")],
            vec![labeled("trans"), labeled("other")],
            &[],
            &destination,
        )
        .unwrap();

        let trans = write(&routed, "trans");
        assert_eq!(
            trans.attribute(&actor_attr()),
            Some(format!("{} urn:gateway", ACTOR_NEXT).as_str())
        );
        assert_eq!(trans.attribute(&mu_attr()), None);

        let other = write(&routed, "other");
        assert_eq!(
            other.attribute(&actor_attr()),
            Some(format!("urn:a {}", ACTOR_NEXT).as_str())
        );
    }

    #[test]
    fn test_empty_destination_not_decorated() {
        let mut destination = IndexMap::new();
        destination.insert("trans".to_string(), Destination::from("  "));
        let original = labeled("trans");
        let original_writer = original.writer.clone();
        let routed =
            route_headers(SOAP_11_NS, &[entry("trans")], vec![original], &[], &destination).unwrap();
        assert!(Arc::ptr_eq(&routed[0].writer, &original_writer));
    }

    #[test]
    fn test_unknown_labels_reported_separately() {
        let err = route_headers(
            SOAP_11_NS,
            &[entry("trans")],
            vec![labeled("trans")],
            &["nope".to_string(), "ghost".to_string()],
            &IndexMap::new(),
        )
        .unwrap_err();
        match err {
            SoapError::MustUnderstandUnknown(labels) => assert_eq!(labels, vec!["nope", "ghost"]),
            other => panic!("unexpected error: {other}"),
        }

        let mut destination = IndexMap::new();
        destination.insert("elsewhere".to_string(), Destination::from("NEXT"));
        let err = route_headers(
            SOAP_11_NS,
            &[entry("trans")],
            vec![labeled("trans")],
            &[],
            &destination,
        )
        .unwrap_err();
        match err {
            SoapError::DestinationUnknown(labels) => assert_eq!(labels, vec!["elsewhere"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decorated_writer_keeps_content() {
        let routing = HeaderRouting {
            must_understand: Some(true),
            actor: Some(ACTOR_NEXT.to_string()),
        };
        let writer = decorate(SOAP_11_NS, plain_writer(), routing);
        let out = writer(&Value::from("234")).unwrap().unwrap();
        assert_eq!(out.children, vec![Node::Text("234".to_string())]);
        assert_eq!(out.attributes.len(), 2);
    }
}
