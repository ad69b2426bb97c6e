//! Read-only inspection commands: `identify`, `sets`, `formats`.
//!
//! Each issues a single verb and prints a plain-text listing to stdout.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use oai_harvester::config::DEFAULT_METADATA_PREFIX;
use oai_harvester::protocol::{MetadataFormat, OaiClient, RepositoryInfo, SetDescriptor};
use url::Url;

use crate::cli::RepositoryArgs;

fn client(args: &RepositoryArgs) -> Result<OaiClient> {
    let base_url = Url::parse(args.base_url.trim())
        .with_context(|| format!("Invalid base URL '{}'", args.base_url))?;
    let timeout = Duration::from_secs(args.timeout);
    Ok(OaiClient::new(
        &base_url,
        DEFAULT_METADATA_PREFIX,
        timeout,
        timeout,
    )?)
}

pub(crate) async fn run_identify(args: &RepositoryArgs) -> Result<()> {
    let info = client(args)?.identify().await?;
    print!("{}", render_identify(&info));
    Ok(())
}

pub(crate) async fn run_sets(args: &RepositoryArgs) -> Result<()> {
    let sets = client(args)?.list_sets().await?;
    print!("{}", render_sets(&sets));
    Ok(())
}

pub(crate) async fn run_formats(args: &RepositoryArgs) -> Result<()> {
    let formats = client(args)?.list_metadata_formats().await?;
    print!("{}", render_formats(&formats));
    Ok(())
}

fn render_identify(info: &RepositoryInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "repositoryName:    {}", info.repository_name);
    let _ = writeln!(out, "baseURL:           {}", info.base_url);
    let _ = writeln!(out, "protocolVersion:   {}", info.protocol_version);
    for email in &info.admin_emails {
        let _ = writeln!(out, "adminEmail:        {email}");
    }
    let _ = writeln!(out, "earliestDatestamp: {}", info.earliest_datestamp);
    let _ = writeln!(out, "deletedRecord:     {}", info.deleted_record);
    let _ = writeln!(out, "granularity:       {}", info.granularity);
    out
}

fn render_sets(sets: &[SetDescriptor]) -> String {
    if sets.is_empty() {
        return "(repository has no sets)\n".to_string();
    }
    let width = sets.iter().map(|set| set.spec.len()).max().unwrap_or(0);
    let mut out = String::new();
    for set in sets {
        let _ = writeln!(out, "{:<width$}  {}", set.spec, set.name);
    }
    out
}

fn render_formats(formats: &[MetadataFormat]) -> String {
    let mut out = String::new();
    for format in formats {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            format.metadata_prefix, format.schema, format.metadata_namespace
        );
    }
    out
}
