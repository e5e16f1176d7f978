//! Micro-parser for the handful of XML documents S3 sends back
//!
//! Matches elements by local name so namespace-qualified and unqualified
//! documents both work; leading XML declarations are skipped by the
//! reader. Not an XPath engine: paths are exact root-to-leaf element
//! chains.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Text content of the first element matching `path` from the root.
///
/// Missing element is an [`Error::XmlMalformed`] naming the path.
pub fn first_text(xml: &[u8], path: &[&str]) -> Result<String> {
    let mut texts = collect_texts(xml, path, true)?;
    texts.pop().ok_or_else(|| Error::XmlMalformed(path.join("/")))
}

/// Text content of every element matching `path`, in document order.
pub fn all_texts(xml: &[u8], path: &[&str]) -> Result<Vec<String>> {
    collect_texts(xml, path, false)
}

/// `(Code, Message)` from a root `<Error>` document, when the body is one.
pub fn parse_error_doc(xml: &[u8]) -> Option<(String, String)> {
    let code = first_text(xml, &["Error", "Code"]).ok()?;
    let message = first_text(xml, &["Error", "Message"]).unwrap_or_default();
    Some((code, message))
}

fn collect_texts(xml: &[u8], path: &[&str], first_only: bool) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut stack: Vec<String> = Vec::with_capacity(path.len());
    let mut results = Vec::new();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(name);
                current_text.clear();
            }
            Ok(Event::Empty(_)) => {
                // Self-closing elements carry no text
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| Error::XmlMalformed(format!("unescape: {err}")))?;
                current_text.push_str(&text);
            }
            Ok(Event::End(_)) => {
                if stack_matches(&stack, path) {
                    results.push(std::mem::take(&mut current_text));
                    if first_only {
                        return Ok(results);
                    }
                }
                stack.pop();
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::XmlMalformed(format!("parse error: {e}"))),
            _ => {}
        }
    }

    Ok(results)
}

fn stack_matches(stack: &[String], path: &[&str]) -> bool {
    stack.len() == path.len() && stack.iter().zip(path).all(|(s, p)| s == p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_text_simple() {
        let xml = b"<InitiateMultipartUploadResult><Bucket>b</Bucket>\
                    <Key>k</Key><UploadId>abc123</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(
            first_text(xml, &["InitiateMultipartUploadResult", "UploadId"]).unwrap(),
            "abc123"
        );
    }

    #[test]
    fn test_first_text_missing_element() {
        let xml = b"<InitiateMultipartUploadResult></InitiateMultipartUploadResult>";
        let err = first_text(xml, &["InitiateMultipartUploadResult", "UploadId"]).unwrap_err();
        assert!(matches!(err, Error::XmlMalformed(_)));
    }

    #[test]
    fn test_all_texts_siblings() {
        let xml = br#"<?xml version="1.0"?>
<ListAllMyBucketsResult><Buckets>
  <Bucket><Name>alpha</Name></Bucket>
  <Bucket><Name>beta</Name></Bucket>
</Buckets></ListAllMyBucketsResult>"#;
        let names = all_texts(
            xml,
            &["ListAllMyBucketsResult", "Buckets", "Bucket", "Name"],
        )
        .unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_namespace_qualified_names_match() {
        let xml = br#"<ns:CompleteMultipartUploadResult xmlns:ns="http://s3.amazonaws.com/doc/2006-03-01/">
<ns:ETag>"etag-1"</ns:ETag></ns:CompleteMultipartUploadResult>"#;
        assert_eq!(
            first_text(xml, &["CompleteMultipartUploadResult", "ETag"]).unwrap(),
            "\"etag-1\""
        );
    }

    #[test]
    fn test_parse_error_doc() {
        let xml = b"<Error><Code>InvalidPart</Code>\
                    <Message>One or more parts could not be found</Message></Error>";
        let (code, message) = parse_error_doc(xml).unwrap();
        assert_eq!(code, "InvalidPart");
        assert_eq!(message, "One or more parts could not be found");
    }

    #[test]
    fn test_parse_error_doc_rejects_non_error() {
        assert!(parse_error_doc(b"<Ok/>").is_none());
        assert!(parse_error_doc(b"not xml at all").is_none());
    }
}
