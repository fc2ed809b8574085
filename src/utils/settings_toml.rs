//! Load `grantmap.toml` from a directory (CLI only). Lib callers build [`Opts`] directly.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::config::PackagePaths;
use crate::{Opts, Phase};

/// Misconfiguration detected before any account is processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {message}")]
    Parse { path: String, message: String },
    #[error("unknown phase in [timeouts]: {0}")]
    UnknownPhase(String),
    #[error("invalid setting {name}: {message}")]
    Invalid { name: String, message: String },
    #[error("scanner {scanner}: {message}")]
    Scanner { scanner: String, message: String },
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsToml {
    #[serde(default)]
    settings: SettingsSection,
    /// `phase name -> seconds`, plus `default`.
    #[serde(default)]
    timeouts: HashMap<String, u64>,
    #[serde(default)]
    cache_ttl: CacheTtlSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    db_path: Option<String>,
    dry_run: Option<bool>,
    verbose: Option<bool>,
    disable_access_cache: Option<bool>,
    disable_access_simulation: Option<bool>,
    disable_resource_filter: Option<bool>,
    log_access_observations: Option<bool>,
    monitor_interval: Option<u64>,
    batch_size: Option<usize>,
    max_workers: Option<usize>,
    rate_limit: Option<u64>,
    retries: Option<u32>,
    retry_delay: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheTtlSection {
    default: Option<i64>,
    #[serde(default)]
    accounts: HashMap<String, i64>,
}

/// Load the settings file from `dir`. Missing file is `Ok(None)`; a malformed one is an error.
pub fn load_settings_toml(dir: &Path) -> Result<Option<SettingsToml>, ConfigError> {
    let path = dir.join(PackagePaths::get().settings_filename());
    let Ok(s) = std::fs::read_to_string(&path) else {
        return Ok(None);
    };
    toml::from_str(&s).map(Some).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$opts_field = v;
        }
    };
    ($sec:expr, $opts:expr, secs $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$opts_field = Duration::from_secs(v);
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI.
pub fn apply_file_to_opts(file: &SettingsToml, opts: &mut Opts) -> Result<(), ConfigError> {
    let s = &file.settings;
    if let Some(ref p) = s.db_path {
        opts.db_path = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, opts, dry_run => dry_run);
    apply_file_opt!(s, opts, verbose => verbose);
    apply_file_opt!(s, opts, disable_access_cache => disable_access_cache);
    apply_file_opt!(s, opts, disable_access_simulation => disable_access_simulation);
    apply_file_opt!(s, opts, disable_resource_filter => disable_resource_filter);
    apply_file_opt!(s, opts, log_access_observations => log_access_observations);
    apply_file_opt!(s, opts, secs monitor_interval => monitor_interval);
    apply_file_opt!(s, opts, batch_size => batch_size);
    apply_file_opt!(s, opts, max_workers => max_workers);
    apply_file_opt!(s, opts, secs rate_limit => rate_limit);
    apply_file_opt!(s, opts, retries => retries);
    apply_file_opt!(s, opts, secs retry_delay => retry_delay);

    for (name, secs) in &file.timeouts {
        let timeout = Duration::from_secs(*secs);
        if name == "default" {
            opts.default_stage_timeout = timeout;
            continue;
        }
        let phase = Phase::parse(name).ok_or_else(|| ConfigError::UnknownPhase(name.clone()))?;
        opts.stage_timeouts.insert(phase, timeout);
    }

    if let Some(ttl) = file.cache_ttl.default {
        opts.cache_ttl = ttl;
    }
    opts.cache_ttl_overrides
        .extend(file.cache_ttl.accounts.iter().map(|(k, v)| (k.clone(), *v)));

    validate_opts(opts)
}

/// Reject settings that would stall or spin the pipeline.
pub fn validate_opts(opts: &Opts) -> Result<(), ConfigError> {
    let invalid = |name: &str, message: &str| ConfigError::Invalid {
        name: name.to_string(),
        message: message.to_string(),
    };
    if opts.batch_size == 0 {
        return Err(invalid("batch_size", "must be at least 1"));
    }
    if opts.max_workers == 0 {
        return Err(invalid("max_workers", "must be at least 1"));
    }
    if opts.monitor_interval.is_zero() {
        return Err(invalid("monitor_interval", "must be positive"));
    }
    if opts.cache_ttl <= 0 || opts.cache_ttl_overrides.values().any(|ttl| *ttl <= 0) {
        return Err(invalid("cache_ttl", "must be positive"));
    }
    Ok(())
}
