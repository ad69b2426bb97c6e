//! OAI-PMH response builders and wiremock mounting helpers.

use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock repository answers on.
pub const OAI_PATH: &str = "/oai";

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-01T00:00:00Z</responseDate>"#;

const FOOTER: &str = "\n</OAI-PMH>\n";

/// A resumptionToken element to place at the end of a list.
#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub value: &'a str,
    pub cursor: Option<u64>,
    pub size: Option<u64>,
}

impl<'a> Token<'a> {
    pub fn next(value: &'a str) -> Self {
        Self {
            value,
            cursor: None,
            size: None,
        }
    }

    /// The empty token that closes a list.
    pub fn last() -> Self {
        Self::next("")
    }

    pub fn at(mut self, cursor: u64, size: u64) -> Self {
        self.cursor = Some(cursor);
        self.size = Some(size);
        self
    }

    fn render(&self) -> String {
        let mut attrs = String::new();
        if let Some(cursor) = self.cursor {
            attrs.push_str(&format!(r#" cursor="{cursor}""#));
        }
        if let Some(size) = self.size {
            attrs.push_str(&format!(r#" completeListSize="{size}""#));
        }
        format!("<resumptionToken{attrs}>{}</resumptionToken>", self.value)
    }
}

pub fn identify(name: &str) -> String {
    format!(
        r#"{HEADER}
  <request verb="Identify">http://localhost/oai</request>
  <Identify>
    <repositoryName>{name}</repositoryName>
    <baseURL>http://localhost/oai</baseURL>
    <protocolVersion>2.0</protocolVersion>
    <adminEmail>admin@example.org</adminEmail>
    <earliestDatestamp>2000-01-01</earliestDatestamp>
    <deletedRecord>no</deletedRecord>
    <granularity>YYYY-MM-DD</granularity>
  </Identify>{FOOTER}"#
    )
}

pub fn metadata_formats(prefixes: &[&str]) -> String {
    let formats: String = prefixes
        .iter()
        .map(|prefix| {
            format!(
                "\n    <metadataFormat><metadataPrefix>{prefix}</metadataPrefix><schema>http://example.org/{prefix}.xsd</schema><metadataNamespace>http://example.org/{prefix}/</metadataNamespace></metadataFormat>"
            )
        })
        .collect();
    format!("{HEADER}\n  <request>http://localhost/oai</request>\n  <ListMetadataFormats>{formats}\n  </ListMetadataFormats>{FOOTER}")
}

pub fn list_sets(sets: &[(&str, &str)], token: Option<Token<'_>>) -> String {
    let items: String = sets
        .iter()
        .map(|(spec, name)| {
            format!("\n    <set><setSpec>{spec}</setSpec><setName>{name}</setName></set>")
        })
        .collect();
    let token = token.map(|token| token.render()).unwrap_or_default();
    format!("{HEADER}\n  <request>http://localhost/oai</request>\n  <ListSets>{items}\n    {token}\n  </ListSets>{FOOTER}")
}

/// A `ListRecords` page with one record per identifier.
pub fn records_page(identifiers: &[&str], token: Option<Token<'_>>) -> String {
    let records: String = identifiers
        .iter()
        .map(|id| {
            format!(
                "\n    <record><header><identifier>{id}</identifier><datestamp>2024-01-01</datestamp></header><metadata><dc><title>Record {id}</title></dc></metadata></record>"
            )
        })
        .collect();
    let token = token.map(|token| token.render()).unwrap_or_default();
    format!("{HEADER}\n  <request>http://localhost/oai</request>\n  <ListRecords>{records}\n    {token}\n  </ListRecords>{FOOTER}")
}

pub fn oai_error(code: &str, message: &str) -> String {
    format!(
        "{HEADER}\n  <request>http://localhost/oai</request>\n  <error code=\"{code}\">{message}</error>{FOOTER}"
    )
}

pub fn xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Content-Type", "text/xml; charset=utf-8")
        .set_body_string(body)
}

/// Mounts `Identify` and `ListMetadataFormats` answers (oai_dc only).
pub async fn mount_repository_info(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(OAI_PATH))
        .and(query_param("verb", "Identify"))
        .respond_with(xml(identify(name)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(OAI_PATH))
        .and(query_param("verb", "ListMetadataFormats"))
        .respond_with(xml(metadata_formats(&["oai_dc"])))
        .mount(server)
        .await;
}

/// Mounts a single-page `ListSets` answer.
pub async fn mount_sets(server: &MockServer, sets: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(OAI_PATH))
        .and(query_param("verb", "ListSets"))
        .respond_with(xml(list_sets(sets, None)))
        .mount(server)
        .await;
}

/// Matches the first `ListRecords` request of `set`.
pub fn first_page_of(set: &str) -> wiremock::MockBuilder {
    Mock::given(method("GET"))
        .and(path(OAI_PATH))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .and(query_param("set", set))
        .and(query_param_is_missing("resumptionToken"))
}

/// Matches a `ListRecords` continuation request carrying `token`.
pub fn page_for_token(token: &str) -> wiremock::MockBuilder {
    Mock::given(method("GET"))
        .and(path(OAI_PATH))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("resumptionToken", token))
}

pub fn base_url(server: &MockServer) -> String {
    format!("{}{OAI_PATH}", server.uri())
}
