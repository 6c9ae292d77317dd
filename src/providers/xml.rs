//! Minimal quick-xml walkers for the S3 and Azure list/key responses

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

use crate::error::TransferError;

/// One page of a list response
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Listing {
    pub names: Vec<String>,
    /// Continuation token / marker for the next page
    pub next: Option<String>,
}

fn parse_err(e: impl std::fmt::Display) -> TransferError {
    TransferError::Parse(format!("XML: {}", e))
}

/// Walk `xml`, calling `on_element(parents, name, text)` as each element closes.
/// `text` is the element's own character data with entities resolved.
fn walk<F>(xml: &str, mut on_element: F) -> Result<(), TransferError>
where
    F: FnMut(&[String], &str, String),
{
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<(String, String)> = Vec::new();
    let mut parents: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(parse_err)? {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push((name, String::new()));
            }
            Event::Text(ref e) => {
                if let Some((_, text)) = stack.last_mut() {
                    text.push_str(&e.decode().map_err(parse_err)?);
                }
            }
            Event::CData(ref e) => {
                if let Some((_, text)) = stack.last_mut() {
                    text.push_str(&e.decode().map_err(parse_err)?);
                }
            }
            Event::GeneralRef(ref e) => {
                if let Some((_, text)) = stack.last_mut() {
                    if e.is_char_ref() {
                        if let Some(ch) = e.resolve_char_ref().map_err(parse_err)? {
                            text.push(ch);
                        }
                    } else {
                        let entity = e.decode().map_err(parse_err)?;
                        match quick_xml::escape::resolve_predefined_entity(&entity) {
                            Some(resolved) => text.push_str(resolved),
                            None => return Err(parse_err(format!("unknown entity &{};", entity))),
                        }
                    }
                }
            }
            Event::End(_) => {
                if let Some((name, text)) = stack.pop() {
                    parents.clear();
                    parents.extend(stack.iter().map(|(n, _)| n.clone()));
                    on_element(&parents, &name, text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Collect the text of every `leaf` directly inside an `item`, plus the `marker` value
pub(crate) fn parse_listing(
    xml: &str,
    item: &str,
    leaf: &str,
    marker: &str,
) -> Result<Listing, TransferError> {
    let mut listing = Listing::default();
    walk(xml, |parents, name, text| {
        if name == leaf && parents.last().map(String::as_str) == Some(item) {
            listing.names.push(text);
        } else if name == marker && !text.trim().is_empty() {
            listing.next = Some(text.trim().to_string());
        }
    })?;
    Ok(listing)
}

/// First text value of each wanted element, wherever it appears
pub(crate) fn parse_fields(xml: &str, wanted: &[&str]) -> Result<HashMap<String, String>, TransferError> {
    let mut fields = HashMap::new();
    walk(xml, |_, name, text| {
        if wanted.contains(&name) {
            fields.entry(name.to_string()).or_insert_with(|| text.trim().to_string());
        }
    })?;
    Ok(fields)
}
