// src/core/parser/xml.rs

//! XML parsers: the generic flattener and the Tomcat status page.

use super::{Parser, insert_value, sanitize_key};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Events beyond this abort the parse; hostile documents stay bounded.
const MAX_EVENTS: usize = 10_000;

/// Flattens XML into dot-joined paths: element text under the element path,
/// attributes under `path.attr`. Only values that read as floats are kept.
pub struct XmlSimpleParser {
    min_keys: usize,
}

impl XmlSimpleParser {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {
            min_keys: frag.take_parsed_or("min_keys", 1usize)?,
        })
    }
}

impl Parser for XmlSimpleParser {
    fn driver(&self) -> &'static str {
        "xml_simple"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let text = std::str::from_utf8(payload)?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut content = Content::new();
        let mut stack: Vec<String> = Vec::new();
        let mut events = 0usize;

        loop {
            events += 1;
            if events > MAX_EVENTS {
                return Err(GatherError::Parse("XML document too large".into()));
            }
            match reader.read_event() {
                Err(e) => return Err(GatherError::Parse(format!("bad XML: {e}"))),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    stack.push(sanitize_key(&String::from_utf8_lossy(e.name().as_ref())));
                    collect_attrs(&e, &stack.join("."), &mut content)?;
                }
                Ok(Event::Empty(e)) => {
                    let mut path = stack.join(".");
                    let name = sanitize_key(&String::from_utf8_lossy(e.name().as_ref()));
                    if path.is_empty() {
                        path = name;
                    } else {
                        path = format!("{path}.{name}");
                    }
                    collect_attrs(&e, &path, &mut content)?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| GatherError::Parse(format!("bad XML text: {e}")))?;
                    if let Ok(v) = text.trim().parse::<f64>()
                        && !stack.is_empty()
                    {
                        insert_value(&mut content, stack.join("."), v)?;
                    }
                }
                Ok(_) => {}
            }
        }

        if content.len() < self.min_keys {
            return Err(GatherError::Parse(format!(
                "only {} numeric keys (minimum {})",
                content.len(),
                self.min_keys
            )));
        }
        Ok(content)
    }
}

fn collect_attrs(e: &BytesStart, path: &str, content: &mut Content) -> Result<(), GatherError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| GatherError::Parse(format!("bad XML attribute: {e}")))?;
        let value = attr
            .unescape_value()
            .map_err(|e| GatherError::Parse(format!("bad XML attribute: {e}")))?;
        if let Ok(v) = value.trim().parse::<f64>() {
            let name = sanitize_key(&String::from_utf8_lossy(attr.key.as_ref()));
            insert_value(content, format!("{path}.{name}"), v)?;
        }
    }
    Ok(())
}

/// Parses the Tomcat `/status?XML=true` page: JVM memory figures plus the
/// thread and request counters of every connector.
pub struct TomcatParser {}

impl TomcatParser {
    pub fn from_fragment(_frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {})
    }

    fn element(
        &self,
        e: &BytesStart,
        connector: &Option<String>,
        content: &mut Content,
    ) -> Result<(), GatherError> {
        match e.name().as_ref() {
            b"memory" => collect_attrs(e, "jvm.memory", content),
            b"threadInfo" | b"requestInfo" => {
                let Some(conn) = connector else {
                    return Ok(());
                };
                let elem = sanitize_key(&String::from_utf8_lossy(e.name().as_ref()));
                collect_attrs(e, &format!("{conn}.{elem}"), content)
            }
            _ => Ok(()),
        }
    }
}

impl Parser for TomcatParser {
    fn driver(&self) -> &'static str {
        "tomcat"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let text = std::str::from_utf8(payload)?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut content = Content::new();
        let mut connector: Option<String> = None;
        let mut events = 0usize;

        loop {
            events += 1;
            if events > MAX_EVENTS {
                return Err(GatherError::Parse("XML document too large".into()));
            }
            match reader.read_event() {
                Err(e) => return Err(GatherError::Parse(format!("bad XML: {e}"))),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    if e.name().as_ref() == b"connector" {
                        connector = connector_name(&e)?;
                    } else {
                        self.element(&e, &connector, &mut content)?;
                    }
                }
                Ok(Event::Empty(e)) => self.element(&e, &connector, &mut content)?,
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"connector" {
                        connector = None;
                    }
                }
                Ok(_) => {}
            }
        }

        if content.is_empty() {
            return Err(GatherError::Parse("no Tomcat status figures found".into()));
        }
        Ok(content)
    }
}

fn connector_name(e: &BytesStart) -> Result<Option<String>, GatherError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| GatherError::Parse(format!("bad XML attribute: {e}")))?;
        if attr.key.as_ref() == b"name" {
            let value = attr
                .unescape_value()
                .map_err(|e| GatherError::Parse(format!("bad XML attribute: {e}")))?;
            // Tomcat wraps connector names in literal quotes.
            return Ok(Some(sanitize_key(value.trim_matches('"'))));
        }
    }
    Ok(None)
}
