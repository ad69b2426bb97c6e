//! Shared User-Agent string for repository and object-store HTTP clients.
//!
//! OAI-PMH repository operators frequently ask harvesters to identify
//! themselves; every request sent by this crate carries the same string.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/oai-harvester";

/// Default User-Agent for harvesting requests (identifies the tool).
#[must_use]
pub(crate) fn default_harvester_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("oai-harvester/{version} (metadata-harvester; +{PROJECT_UA_URL})")
}
