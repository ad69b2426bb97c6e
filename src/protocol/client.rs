//! HTTP client for OAI-PMH repositories.
//!
//! The client is created once per job and reused for every request, taking
//! advantage of connection pooling. It holds no pagination state: callers
//! pass resumption tokens in and receive the next one back.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::OaiError;
use super::parse::{self, Envelope, EnvelopeError};
use super::{
    MetadataFormat, NO_SET_HIERARCHY, PageResult, RepositoryInfo, SetDescriptor, verb,
};
use crate::config::RepositoryConfig;
use crate::user_agent;

/// One page of a `ListSets` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetsPage {
    /// Sets on this page, in document order.
    pub sets: Vec<SetDescriptor>,
    /// Token for the next page, if any.
    pub next_token: Option<String>,
}

/// HTTP client speaking OAI-PMH to a single repository.
#[derive(Debug, Clone)]
pub struct OaiClient {
    client: Client,
    base_url: Url,
    metadata_prefix: String,
}

/// A response body together with the URL it came from.
struct Fetched {
    url: String,
    body: Vec<u8>,
}

impl OaiClient {
    /// Creates a client for `base_url` harvesting `metadata_prefix`.
    ///
    /// The connect timeout bounds connection establishment; the read timeout
    /// bounds each whole request so a stalled server cannot hang the job.
    ///
    /// # Errors
    ///
    /// Returns [`OaiError::ClientBuild`] if the HTTP client cannot be built.
    #[instrument(level = "debug", fields(base_url = %base_url))]
    pub fn new(
        base_url: &Url,
        metadata_prefix: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, OaiError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .gzip(true)
            .user_agent(user_agent::default_harvester_user_agent())
            .build()
            .map_err(|source| OaiError::ClientBuild { source })?;

        Ok(Self {
            client,
            base_url: base_url.clone(),
            metadata_prefix: metadata_prefix.to_string(),
        })
    }

    /// Creates a client from a validated repository configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OaiError::ClientBuild`] if the HTTP client cannot be built.
    pub fn from_config(config: &RepositoryConfig) -> Result<Self, OaiError> {
        Self::new(
            config.base_url(),
            config.metadata_prefix(),
            config.connect_timeout(),
            config.read_timeout(),
        )
    }

    /// Returns the repository base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the metadata prefix requested by `ListRecords`.
    #[must_use]
    pub fn metadata_prefix(&self) -> &str {
        &self.metadata_prefix
    }

    /// Issues `Identify`.
    ///
    /// # Errors
    ///
    /// Returns transport errors, [`OaiError::Malformed`] if the response has
    /// no `Identify` element, and [`OaiError::Protocol`] if the server
    /// answered with an error.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn identify(&self) -> Result<RepositoryInfo, OaiError> {
        let fetched = self.get(verb::IDENTIFY, &[]).await?;
        let envelope = envelope_or_error(&fetched, verb::IDENTIFY)?;
        envelope
            .identify
            .ok_or_else(|| OaiError::malformed(fetched.url, "response has no Identify element"))
    }

    /// Issues `ListMetadataFormats`.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`OaiError::Protocol`] for server errors.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn list_metadata_formats(&self) -> Result<Vec<MetadataFormat>, OaiError> {
        let fetched = self.get(verb::LIST_METADATA_FORMATS, &[]).await?;
        let envelope = envelope_or_error(&fetched, verb::LIST_METADATA_FORMATS)?;
        Ok(envelope.formats)
    }

    /// Issues `ListSets` and follows resumption tokens until the list is
    /// complete, merging all pages.
    ///
    /// A duplicate `setSpec` across pages is logged; the last title wins.
    /// `noSetHierarchy` yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered on any page, and
    /// [`OaiError::Malformed`] if the server hands out a token it already
    /// issued, which would otherwise loop forever.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn list_sets(&self) -> Result<Vec<SetDescriptor>, OaiError> {
        let mut sets = Vec::new();
        let mut token: Option<String> = None;
        let mut seen_tokens = HashSet::new();
        loop {
            let page = self.list_sets_page(token.as_deref()).await?;
            merge_sets(&mut sets, page.sets);
            match page.next_token {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    return Err(OaiError::malformed(
                        self.base_url.as_str(),
                        format!("ListSets resumption token {next:?} repeated"),
                    ));
                }
                Some(next) => token = Some(next),
                None => return Ok(sets),
            }
        }
    }

    /// Issues a single `ListSets` request.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`OaiError::Protocol`] for server errors
    /// other than `noSetHierarchy`.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn list_sets_page(&self, token: Option<&str>) -> Result<SetsPage, OaiError> {
        let params: Vec<(&str, &str)> = token
            .map(|token| vec![("resumptionToken", token)])
            .unwrap_or_default();
        let fetched = self.get(verb::LIST_SETS, &params).await?;
        let envelope = parse_required(&fetched)?;

        if envelope
            .errors
            .iter()
            .any(|error| error.code == NO_SET_HIERARCHY)
        {
            debug!("repository has no set hierarchy");
            return Ok(SetsPage::default());
        }
        protocol_errors(&envelope, verb::LIST_SETS)?;

        let next_token = envelope.next_token().map(str::to_string);
        Ok(SetsPage {
            sets: envelope.sets,
            next_token,
        })
    }

    /// Issues a single `ListRecords` request.
    ///
    /// With a `token`, only the resumption token is sent (it is an exclusive
    /// argument). Without one, the request carries `metadataPrefix` and, for
    /// any set other than the default set, `set`.
    ///
    /// # Errors
    ///
    /// Returns transport errors, and [`OaiError::Malformed`] when the body is
    /// unusable even for the degraded token search.
    #[instrument(skip(self, set), fields(set = set.map_or("", |s| s.spec.as_str()), has_token = token.is_some()))]
    pub async fn list_records(
        &self,
        set: Option<&SetDescriptor>,
        token: Option<&str>,
    ) -> Result<PageResult, OaiError> {
        let mut params: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(token) = token {
            params.push(("resumptionToken", token));
        } else {
            params.push(("metadataPrefix", self.metadata_prefix.as_str()));
            if let Some(set) = set.filter(|set| !set.is_default()) {
                params.push(("set", set.spec.as_str()));
            }
        }

        let Fetched { url, body } = self.get(verb::LIST_RECORDS, &params).await?;
        parse::interpret_list_records(body).map_err(|reason| OaiError::malformed(url, reason))
    }

    fn request_url(&self, verb: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("verb", verb);
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    async fn get(&self, verb: &str, params: &[(&str, &str)]) -> Result<Fetched, OaiError> {
        let url = self.request_url(verb, params);
        let url_string = url.to_string();
        debug!(url = %url_string, "sending request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_request_error(&url_string, e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| map_request_error(&url_string, e))?
            .to_vec();

        if !status.is_success() {
            // Some repositories send protocol errors (e.g. badResumptionToken)
            // with a 4xx status; those are answers, not transport failures.
            if parse::carries_protocol_errors(&body) {
                debug!(status = status.as_u16(), "non-2xx response carries OAI-PMH error");
            } else {
                return Err(OaiError::http_status_with_retry_after(
                    url_string,
                    status.as_u16(),
                    retry_after,
                ));
            }
        }

        Ok(Fetched {
            url: url_string,
            body,
        })
    }
}

/// Merges a page of sets into `sets`, keeping first-seen order.
///
/// A duplicate `setSpec` is logged as a warning and its title replaced (last
/// value wins).
pub fn merge_sets(sets: &mut Vec<SetDescriptor>, page: Vec<SetDescriptor>) {
    let mut index: HashMap<String, usize> = sets
        .iter()
        .enumerate()
        .map(|(position, set)| (set.spec.clone(), position))
        .collect();

    for set in page {
        if let Some(&position) = index.get(&set.spec) {
            warn!(set = %set.spec, "duplicate setSpec in ListSets response; last value wins");
            sets[position] = set;
        } else {
            index.insert(set.spec.clone(), sets.len());
            sets.push(set);
        }
    }
}

fn map_request_error(url: &str, error: reqwest::Error) -> OaiError {
    if error.is_timeout() {
        OaiError::timeout(url)
    } else {
        OaiError::network(url, error)
    }
}

fn parse_required(fetched: &Fetched) -> Result<Envelope, OaiError> {
    parse::parse_envelope(&fetched.body)
        .map_err(|error: EnvelopeError| OaiError::malformed(fetched.url.clone(), error.reason()))
}

fn protocol_errors(envelope: &Envelope, verb: &'static str) -> Result<(), OaiError> {
    match envelope.errors.first() {
        Some(first) => Err(OaiError::protocol(verb, first.code.clone(), first.message.clone())),
        None => Ok(()),
    }
}

fn envelope_or_error(fetched: &Fetched, verb: &'static str) -> Result<Envelope, OaiError> {
    let envelope = parse_required(fetched)?;
    protocol_errors(&envelope, verb)?;
    Ok(envelope)
}
