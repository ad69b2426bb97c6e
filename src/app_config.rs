//! Optional config file supplying defaults for `harvest` flags.
//!
//! Flat `key = value` lines; strings are double-quoted, `#` starts a comment.
//! Values given on the command line always win.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::cli::HarvestArgs;

/// Defaults read from the config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub repo_prefix: Option<String>,
    pub metadata_prefix: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub attempt_delay_secs: Option<u64>,
    pub fail_on_error: Option<bool>,
    pub allow_list: Option<PathBuf>,
    pub deny_list: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub object_store_url: Option<String>,
    pub checkpoint_dir: Option<PathBuf>,
    /// `false` disables checkpointing.
    pub checkpoint: Option<bool>,
}

impl FileConfig {
    /// Validates config values against the CLI ranges.
    pub fn validate(&self) -> Result<()> {
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1, 3600)?;
        validate_range(
            "max_attempts",
            self.max_attempts.map(u64::from),
            1,
            20,
        )?;
        validate_range("attempt_delay_secs", self.attempt_delay_secs, 0, 3600)?;
        if self.output_dir.is_some() && self.object_store_url.is_some() {
            bail!("`output_dir` and `object_store_url` are mutually exclusive");
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/oai-harvester/config.toml`
/// 2. `$HOME/.config/oai-harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("oai-harvester")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("oai-harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. Without one, the default path is used if it
/// exists; otherwise there is no file config.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Fills every flag not given on the command line from `file`.
#[must_use]
pub fn apply_file_defaults(mut args: HarvestArgs, file: &FileConfig) -> HarvestArgs {
    fn fill<T: Clone>(slot: &mut Option<T>, default: Option<&T>) {
        if slot.is_none() {
            *slot = default.cloned();
        }
    }

    fill(&mut args.base_url, file.base_url.as_ref());
    fill(&mut args.repo_prefix, file.repo_prefix.as_ref());
    fill(&mut args.metadata_prefix, file.metadata_prefix.as_ref());
    fill(&mut args.connect_timeout, file.connect_timeout_secs.as_ref());
    fill(&mut args.read_timeout, file.read_timeout_secs.as_ref());
    fill(&mut args.max_attempts, file.max_attempts.as_ref());
    fill(&mut args.attempt_delay, file.attempt_delay_secs.as_ref());
    fill(&mut args.allow_list, file.allow_list.as_ref());
    fill(&mut args.deny_list, file.deny_list.as_ref());
    fill(&mut args.checkpoint_dir, file.checkpoint_dir.as_ref());

    // A sink chosen on the command line replaces the file's sink entirely.
    if args.output_dir.is_none() && args.object_store_url.is_none() {
        args.output_dir.clone_from(&file.output_dir);
        args.object_store_url.clone_from(&file.object_store_url);
    }

    if !args.fail_on_error {
        args.fail_on_error = file.fail_on_error.unwrap_or(false);
    }
    if !args.no_checkpoint && args.checkpoint_dir.is_none() {
        args.no_checkpoint = file.checkpoint == Some(false);
    }
    args
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let line_no = line_index + 1;
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(invalid)?),
            "repo_prefix" => {
                cfg.repo_prefix = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "metadata_prefix" => {
                cfg.metadata_prefix = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_attempts" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_attempts out of range for u32"))?;
                cfg.max_attempts = Some(n);
            }
            "attempt_delay_secs" => {
                cfg.attempt_delay_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "fail_on_error" => cfg.fail_on_error = Some(parse_boolean(value).with_context(invalid)?),
            "allow_list" => {
                cfg.allow_list = Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "deny_list" => {
                cfg.deny_list = Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "object_store_url" => {
                cfg.object_store_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "checkpoint_dir" => {
                cfg.checkpoint_dir =
                    Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "checkpoint" => cfg.checkpoint = Some(parse_boolean(value).with_context(invalid)?),
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
