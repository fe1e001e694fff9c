//! XML parsing into namespace-resolved element trees.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).

use crate::error::{xml_parse_err, SoapError};
use crate::xml::{Element, QName};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// SOAP 1.1 envelope namespace.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// XML Schema namespace.
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
/// XML Schema instance namespace.
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse raw bytes into the document element.
pub fn parse_document(data: &[u8]) -> Result<Element, SoapError> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| SoapError::XmlParse(format!("Invalid UTF-8: {}", e)))?;

    // Pre-scan for XXE patterns (belt-and-suspenders with quick-xml's safety)
    check_xxe_patterns(xml_str)?;

    let mut reader = Reader::from_str(xml_str);
    reader.config_mut().trim_text(true);

    // Prefix bindings in scope, plus the binding count at each open element
    let mut bindings: Vec<(String, String)> = vec![("xml".to_string(), XML_NS.to_string())];
    let mut marks: Vec<usize> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                marks.push(bindings.len());
                let element = open_element(e, &mut bindings)?;
                stack.push(element);
            }

            Ok(Event::Empty(ref e)) => {
                let mark = bindings.len();
                let element = open_element(e, &mut bindings)?;
                bindings.truncate(mark);
                attach(element, &mut stack, &mut root)?;
            }

            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SoapError::XmlParse("Unbalanced end tag".to_string()))?;
                if let Some(mark) = marks.pop() {
                    bindings.truncate(mark);
                }
                attach(element, &mut stack, &mut root)?;
            }

            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(xml_parse_err)?;
                if let Some(current) = stack.last_mut() {
                    current.push_text(text.into_owned());
                }
            }

            Ok(Event::CData(ref e)) => {
                let text = std::str::from_utf8(e).map_err(xml_parse_err)?;
                if let Some(current) = stack.last_mut() {
                    current.push_text(text);
                }
            }

            Ok(Event::DocType(_)) => {
                return Err(SoapError::XxeDetected(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SoapError::XmlParse(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }

            _ => {}
        }

        buf.clear();
    }

    if !stack.is_empty() {
        return Err(SoapError::XmlParse("Unexpected end of document".to_string()));
    }
    root.ok_or_else(|| SoapError::XmlParse("Document has no root element".to_string()))
}

/// Check for XXE attack patterns.
fn check_xxe_patterns(xml: &str) -> Result<(), SoapError> {
    // DOCTYPE detection
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(SoapError::XxeDetected(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    // External entity patterns
    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(SoapError::XxeDetected(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), SoapError> {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(SoapError::XmlParse(
                "Multiple root elements".to_string(),
            ))
        }
    }
    Ok(())
}

/// Build an element from a start tag, pushing its namespace declarations.
fn open_element(
    e: &BytesStart,
    bindings: &mut Vec<(String, String)>,
) -> Result<Element, SoapError> {
    let mut plain_attributes = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(xml_parse_err)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_parse_err)?;
        let value = attr.unescape_value().map_err(xml_parse_err)?.into_owned();

        if key == "xmlns" {
            bindings.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.push((prefix.to_string(), value));
        } else {
            plain_attributes.push((key.to_string(), value));
        }
    }

    let raw_name = std::str::from_utf8(e.name().as_ref())
        .map_err(xml_parse_err)?
        .to_string();
    let name = resolve_name(&raw_name, bindings, true)?;

    let mut element = Element::new(name);
    for (key, value) in plain_attributes {
        // Unprefixed attributes are never in the default namespace
        let attr_name = resolve_name(&key, bindings, false)?;
        element.attributes.push((attr_name, value));
    }
    element.namespaces = bindings.clone();

    Ok(element)
}

fn resolve_name(
    raw: &str,
    bindings: &[(String, String)],
    use_default: bool,
) -> Result<QName, SoapError> {
    let (prefix, local) = match raw.split_once(':') {
        Some((p, l)) => (p, l),
        None if use_default => ("", raw),
        None => return Ok(QName::unqualified(raw)),
    };

    match bindings.iter().rev().find(|(p, _)| p == prefix) {
        Some((_, uri)) => Ok(QName::new(uri.as_str(), local)),
        None if prefix.is_empty() => Ok(QName::unqualified(local)),
        None => Err(SoapError::XmlParse(format!(
            "Undeclared namespace prefix '{}' in '{}'",
            prefix, raw
        ))),
    }
}

/// Resolve QName-valued text (`prefix:local`) in the scope of `element`.
pub fn resolve_qname_text(element: &Element, text: &str) -> Result<QName, SoapError> {
    let text = text.trim();
    let (prefix, local) = text.split_once(':').unwrap_or(("", text));
    match element.resolve_prefix(prefix) {
        Some(uri) => Ok(QName::new(uri, local)),
        None if prefix.is_empty() => Ok(QName::unqualified(local)),
        None => Err(SoapError::Decode(format!(
            "Undeclared namespace prefix '{}' in QName '{}'",
            prefix, text
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_11_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <m:Trans xmlns:m="http://example.org/trans" soap:mustUnderstand="1">234</m:Trans>
  </soap:Header>
  <soap:Body>
    <GetPrice xmlns="http://example.org/stock">
      <Item>Apples</Item>
    </GetPrice>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_soap_11() {
        let root = parse_document(SOAP_11_SAMPLE.as_bytes()).unwrap();
        assert_eq!(root.name, QName::new(SOAP_11_NS, "Envelope"));

        let sections: Vec<_> = root.child_elements().collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, QName::new(SOAP_11_NS, "Header"));

        let trans = sections[0].child_elements().next().unwrap();
        assert_eq!(trans.name, QName::new("http://example.org/trans", "Trans"));
        assert_eq!(trans.text_content(), "234");
        assert_eq!(
            trans.attribute(&QName::new(SOAP_11_NS, "mustUnderstand")),
            Some("1")
        );

        let op = sections[1].child_elements().next().unwrap();
        assert_eq!(op.name, QName::new("http://example.org/stock", "GetPrice"));
        let item = op.child_elements().next().unwrap();
        assert_eq!(item.name, QName::new("http://example.org/stock", "Item"));
        assert_eq!(item.text_content(), "Apples");
    }

    #[test]
    fn test_xxe_detection() {
        let xxe_payload = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>&xxe;</soap:Body>
</soap:Envelope>"#;

        let result = parse_document(xxe_payload.as_bytes());
        assert!(matches!(result, Err(SoapError::XxeDetected(_))));
    }

    #[test]
    fn test_undeclared_prefix_rejected() {
        let result = parse_document(b"<x:Envelope/>");
        assert!(matches!(result, Err(SoapError::XmlParse(_))));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        let result = parse_document(b"<a><b></a>");
        assert!(matches!(result, Err(SoapError::XmlParse(_))));
    }

    #[test]
    fn test_resolve_qname_text() {
        let root = parse_document(
            br#"<f xmlns:e="http://schemas.xmlsoap.org/soap/envelope/"><c>e:Server.first</c></f>"#,
        )
        .unwrap();
        let code = root.child_elements().next().unwrap();
        let q = resolve_qname_text(code, &code.text_content()).unwrap();
        assert_eq!(q, QName::new(SOAP_11_NS, "Server.first"));

        assert!(resolve_qname_text(code, "zz:Client").is_err());
    }

    #[test]
    fn test_cdata_kept_as_text() {
        let root = parse_document(b"<m><![CDATA[a < b]]></m>").unwrap();
        assert_eq!(root.text_content(), "a < b");
    }
}
