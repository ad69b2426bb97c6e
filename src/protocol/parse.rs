//! OAI-PMH response parsing.
//!
//! Responses are scanned with a streaming XML reader; only the parts of the
//! envelope the harvester needs are collected (error elements, identification
//! fields, set and format lists, the resumption token, and a record count).
//! The payload inside each `record` is never interpreted.
//!
//! # Degraded mode
//!
//! Some repositories emit pages that are not well-formed XML (unescaped
//! ampersands inside metadata, truncated bodies). For `ListRecords` only, a
//! document that fails to parse is searched with a regular expression for a
//! `resumptionToken` element so pagination can continue. This path cannot
//! validate the response shape: it does not read the server's cursor or
//! `completeListSize`, so the page is flagged [`RecordsPage::degraded`] and
//! the tracker resets the declared size to zero and advances the cursor by
//! one. A malformed page without a token element is reported as an error
//! (and retried), because "no token" cannot be told apart from "truncated".

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use tracing::{debug, warn};

use super::{
    MetadataFormat, NO_RECORDS_MATCH, PageResult, ProtocolErrorElement, RecordsPage,
    RepositoryInfo, SetDescriptor,
};

/// Local name of the OAI-PMH root element.
const ROOT_ELEMENT: &str = "OAI-PMH";

/// Matches a (possibly namespace-prefixed) resumptionToken element, either
/// self-closing or with text content.
#[allow(clippy::expect_used)]
static RESUMPTION_TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<(?:[A-Za-z_][\w.-]*:)?resumptionToken\b[^>]*?(?:/>|>(.*?)</(?:[A-Za-z_][\w.-]*:)?resumptionToken\s*>)",
    )
    .expect("resumptionToken regex is valid") // Static pattern, safe to panic
});

/// Why a response body could not be read as an OAI-PMH envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The body is not well-formed XML.
    NotWellFormed(String),
    /// The body is XML, but not an OAI-PMH document.
    NotOaiPmh(String),
}

impl EnvelopeError {
    /// Human readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::NotWellFormed(reason) | Self::NotOaiPmh(reason) => reason,
        }
    }
}

/// A resumption token as found in a response.
///
/// `value` is empty when the element was present but had no content, which
/// marks the last page of a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumptionToken {
    /// The token text, trimmed.
    pub value: String,
    /// The `cursor` attribute, if the server sent one.
    pub cursor: Option<u64>,
    /// The `completeListSize` attribute, if the server sent one.
    pub complete_list_size: Option<u64>,
}

impl ResumptionToken {
    /// Returns the token when it asks for another request.
    #[must_use]
    pub fn next(&self) -> Option<&str> {
        if self.value.is_empty() {
            None
        } else {
            Some(&self.value)
        }
    }
}

/// The parts of an OAI-PMH envelope the harvester reads.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// `error` elements directly below the root.
    pub errors: Vec<ProtocolErrorElement>,
    /// Identification fields, when the response answered `Identify`.
    pub identify: Option<RepositoryInfo>,
    /// Sets listed by a `ListSets` response, in document order.
    pub sets: Vec<SetDescriptor>,
    /// Formats listed by a `ListMetadataFormats` response.
    pub formats: Vec<MetadataFormat>,
    /// The resumption token; `None` when the element is absent.
    pub resumption_token: Option<ResumptionToken>,
    /// Number of `record` elements in a `ListRecords` response.
    pub record_count: u64,
}

impl Envelope {
    /// Returns the token that requests the next page, if any.
    ///
    /// Both "no token element" and "empty token element" mean the list is
    /// complete.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        self.resumption_token
            .as_ref()
            .and_then(ResumptionToken::next)
    }
}

/// Parses a response body as an OAI-PMH envelope.
///
/// # Errors
///
/// Returns [`EnvelopeError::NotWellFormed`] if the body is not well-formed
/// XML (or not UTF-8), and [`EnvelopeError::NotOaiPmh`] if the root element
/// is not `OAI-PMH`.
pub fn parse_envelope(body: &[u8]) -> Result<Envelope, EnvelopeError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| EnvelopeError::NotWellFormed(format!("invalid UTF-8: {e}")))?;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut scanner = Scanner::default();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(error) => {
                return Err(EnvelopeError::NotWellFormed(format!(
                    "XML error at byte {}: {error}",
                    reader.buffer_position()
                )));
            }
        };
        match event {
            Event::Start(start) => scanner.open(&start, false)?,
            Event::Empty(start) => scanner.open(&start, true)?,
            Event::End(_) => scanner.close(),
            Event::Text(content) => {
                let unescaped = content
                    .unescape()
                    .map_err(|e| EnvelopeError::NotWellFormed(format!("bad text: {e}")))?;
                scanner.text(&unescaped)?;
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                scanner.text(&String::from_utf8_lossy(&raw))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    scanner.finish()
}

/// Returns true when a body is an OAI-PMH envelope carrying `error` elements.
///
/// Used to accept protocol answers delivered with a non-2xx HTTP status.
#[must_use]
pub fn carries_protocol_errors(body: &[u8]) -> bool {
    parse_envelope(body).is_ok_and(|envelope| !envelope.errors.is_empty())
}

/// Interprets a `ListRecords` response body.
///
/// # Errors
///
/// Returns the reason the body is unusable when it is not an OAI-PMH
/// envelope and the degraded token search found nothing either.
pub fn interpret_list_records(body: Vec<u8>) -> Result<PageResult, String> {
    match parse_envelope(&body) {
        Ok(envelope) => Ok(page_from_envelope(envelope, body)),
        Err(EnvelopeError::NotWellFormed(reason)) => {
            let text = String::from_utf8_lossy(&body);
            match extract_token_fallback(&text) {
                Some(token) => {
                    warn!(
                        %reason,
                        has_next = !token.is_empty(),
                        "ListRecords response is not well-formed XML; using degraded resumptionToken extraction"
                    );
                    let next_token = (!token.is_empty()).then_some(token);
                    Ok(PageResult::Records(RecordsPage {
                        raw: body,
                        next_token,
                        cursor: None,
                        complete_list_size: None,
                        record_count: 0,
                        degraded: true,
                    }))
                }
                None => Err(reason),
            }
        }
        Err(error @ EnvelopeError::NotOaiPmh(_)) => Err(error.reason().to_string()),
    }
}

fn page_from_envelope(envelope: Envelope, raw: Vec<u8>) -> PageResult {
    if let Some(first) = envelope.errors.first() {
        if envelope
            .errors
            .iter()
            .any(|error| error.code == NO_RECORDS_MATCH)
        {
            return PageResult::EmptySet;
        }
        let message = envelope
            .errors
            .iter()
            .map(|error| error.message.as_str())
            .filter(|message| !message.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        return PageResult::ProtocolError {
            code: first.code.clone(),
            message,
        };
    }

    let next_token = envelope.next_token().map(str::to_string);
    let (cursor, complete_list_size) = envelope
        .resumption_token
        .as_ref()
        .map_or((None, None), |token| (token.cursor, token.complete_list_size));

    PageResult::Records(RecordsPage {
        raw,
        next_token,
        cursor,
        complete_list_size,
        record_count: envelope.record_count,
        degraded: false,
    })
}

/// Best-effort search for a resumptionToken element in text that is not
/// well-formed XML.
///
/// Returns `Some("")` for an empty or self-closing element and `None` when no
/// element was found.
#[must_use]
pub fn extract_token_fallback(text: &str) -> Option<String> {
    let captures = RESUMPTION_TOKEN_PATTERN.captures(text)?;
    let raw = captures.get(1).map_or("", |m| m.as_str()).trim();
    let token = quick_xml::escape::unescape(raw).map_or_else(
        |error| {
            debug!(%error, "token unescape failed, using raw text");
            raw.to_string()
        },
        Cow::into_owned,
    );
    Some(token)
}

/// Decodes a percent-encoded set title; undecodable input is kept as is.
fn decode_title(raw: &str) -> String {
    if !raw.contains('%') {
        return raw.to_string();
    }
    urlencoding::decode(raw).map_or_else(
        |error| {
            debug!(title = %raw, %error, "setName URL decoding failed, using raw title");
            raw.to_string()
        },
        Cow::into_owned,
    )
}

/// Which collected field a text capture belongs to.
#[derive(Debug, Clone)]
enum Field {
    Error { code: String },
    Identify(String),
    SetSpec,
    SetName,
    FormatPrefix,
    FormatSchema,
    FormatNamespace,
    Token,
}

#[derive(Debug)]
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

/// Streaming collector driven by reader events.
#[derive(Debug, Default)]
struct Scanner {
    stack: Vec<String>,
    root_seen: bool,
    capture: Option<Capture>,
    envelope: Envelope,
}

impl Scanner {
    fn open(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), EnvelopeError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let depth = self.stack.len();

        if depth == 0 {
            if self.root_seen {
                return Err(EnvelopeError::NotWellFormed(
                    "multiple root elements".to_string(),
                ));
            }
            self.root_seen = true;
            if name != ROOT_ELEMENT {
                return Err(EnvelopeError::NotOaiPmh(format!(
                    "root element is <{name}>, expected <{ROOT_ELEMENT}>"
                )));
            }
        } else if self.capture.is_none() {
            self.collect(start, &name, depth)?;
        }

        if empty {
            if self
                .capture
                .as_ref()
                .is_some_and(|capture| capture.depth == depth)
            {
                self.finalize();
            }
        } else {
            self.stack.push(name);
        }
        Ok(())
    }

    fn collect(
        &mut self,
        start: &BytesStart<'_>,
        name: &str,
        depth: usize,
    ) -> Result<(), EnvelopeError> {
        let verb = self.stack.get(1).map(String::as_str);
        let parent = self.stack.last().map(String::as_str);

        let field = match (depth, verb, parent, name) {
            (1, _, _, "error") => Some(Field::Error {
                code: attribute(start, "code")?.unwrap_or_default(),
            }),
            (1, _, _, "Identify") => {
                self.envelope.identify = Some(RepositoryInfo::default());
                None
            }
            (2, Some("Identify"), _, field) => Some(Field::Identify(field.to_string())),
            (2, Some("ListSets"), _, "set") => {
                self.envelope.sets.push(SetDescriptor::default());
                None
            }
            (3, Some("ListSets"), Some("set"), "setSpec") => Some(Field::SetSpec),
            (3, Some("ListSets"), Some("set"), "setName") => Some(Field::SetName),
            (2, Some("ListMetadataFormats"), _, "metadataFormat") => {
                self.envelope.formats.push(MetadataFormat::default());
                None
            }
            (3, Some("ListMetadataFormats"), Some("metadataFormat"), "metadataPrefix") => {
                Some(Field::FormatPrefix)
            }
            (3, Some("ListMetadataFormats"), Some("metadataFormat"), "schema") => {
                Some(Field::FormatSchema)
            }
            (3, Some("ListMetadataFormats"), Some("metadataFormat"), "metadataNamespace") => {
                Some(Field::FormatNamespace)
            }
            (2, Some(_), _, "resumptionToken") => {
                self.envelope.resumption_token = Some(ResumptionToken {
                    value: String::new(),
                    cursor: numeric_attribute(start, "cursor")?,
                    complete_list_size: numeric_attribute(start, "completeListSize")?,
                });
                Some(Field::Token)
            }
            (2, Some("ListRecords"), _, "record") => {
                self.envelope.record_count += 1;
                None
            }
            _ => None,
        };

        if let Some(field) = field {
            self.capture = Some(Capture {
                field,
                depth,
                text: String::new(),
            });
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stack.pop();
        if self
            .capture
            .as_ref()
            .is_some_and(|capture| capture.depth == self.stack.len())
        {
            self.finalize();
        }
    }

    fn text(&mut self, text: &str) -> Result<(), EnvelopeError> {
        if self.stack.is_empty() {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(EnvelopeError::NotWellFormed(
                "text content outside the root element".to_string(),
            ));
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.text.push_str(text);
        }
        Ok(())
    }

    fn finalize(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        let value = capture.text.trim().to_string();
        let envelope = &mut self.envelope;

        match capture.field {
            Field::Error { code } => envelope.errors.push(ProtocolErrorElement {
                code,
                message: value,
            }),
            Field::Identify(name) => {
                if let Some(info) = envelope.identify.as_mut() {
                    match name.as_str() {
                        "repositoryName" => info.repository_name = value,
                        "baseURL" => info.base_url = value,
                        "protocolVersion" => info.protocol_version = value,
                        "adminEmail" => info.admin_emails.push(value),
                        "earliestDatestamp" => info.earliest_datestamp = value,
                        "deletedRecord" => info.deleted_record = value,
                        "granularity" => info.granularity = value,
                        _ => {}
                    }
                }
            }
            Field::SetSpec => {
                if let Some(set) = envelope.sets.last_mut() {
                    set.spec = value;
                }
            }
            Field::SetName => {
                if let Some(set) = envelope.sets.last_mut() {
                    set.name = decode_title(&value);
                }
            }
            Field::FormatPrefix => {
                if let Some(format) = envelope.formats.last_mut() {
                    format.metadata_prefix = value;
                }
            }
            Field::FormatSchema => {
                if let Some(format) = envelope.formats.last_mut() {
                    format.schema = value;
                }
            }
            Field::FormatNamespace => {
                if let Some(format) = envelope.formats.last_mut() {
                    format.metadata_namespace = value;
                }
            }
            Field::Token => {
                if let Some(token) = envelope.resumption_token.as_mut() {
                    token.value = value;
                }
            }
        }
    }

    fn finish(mut self) -> Result<Envelope, EnvelopeError> {
        if !self.root_seen {
            return Err(EnvelopeError::NotWellFormed(
                "document has no root element".to_string(),
            ));
        }
        if let Some(open) = self.stack.last() {
            return Err(EnvelopeError::NotWellFormed(format!(
                "unexpected end of document inside <{open}>"
            )));
        }
        // Sets without a setSpec cannot be requested.
        self.envelope.sets.retain(|set| !set.spec.is_empty());
        Ok(self.envelope)
    }
}

fn attribute(start: &BytesStart<'_>, key: &str) -> Result<Option<String>, EnvelopeError> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| EnvelopeError::NotWellFormed(format!("bad attribute: {e}")))?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| EnvelopeError::NotWellFormed(format!("bad attribute value: {e}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn numeric_attribute(start: &BytesStart<'_>, key: &str) -> Result<Option<u64>, EnvelopeError> {
    let Some(raw) = attribute(start, key)? else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            debug!(attribute = key, value = %raw, "ignoring non-numeric resumptionToken attribute");
            Ok(None)
        }
    }
}
