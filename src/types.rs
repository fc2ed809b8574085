//! Public and internal types for the grantmap API and pipeline.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::utils::config::{
    AccessConsts, CacheConsts, MonitorConsts, PackagePaths, QUEUE_POLL_TIMEOUT,
    RegistrationConsts, resource_statuses,
};

/// Errors raised while building resources from scanner output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid ARN: {0}")]
    InvalidArn(String),
    #[error("unknown {service} resource status: {status:?}")]
    UnknownStatus { service: String, status: String },
}

/// Compound resource identity: `arn:partition:service:region:account:resource`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Arn {
    pub arn: String,
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource_type: Option<String>,
    pub resource: String,
}

impl Arn {
    const NAME_DELIM: &'static str = "-";

    /// Parse an ARN string. The resource part is split into type and name on the first `/` or `:`.
    pub fn parse(arn: &str) -> Result<Self, ResourceError> {
        let elements: Vec<&str> = arn.splitn(6, ':').collect();
        if elements.len() != 6 {
            return Err(ResourceError::InvalidArn(arn.to_string()));
        }
        let (resource_type, resource) = match elements[5].find(['/', ':']) {
            Some(idx) => (
                Some(elements[5][..idx].to_string()),
                elements[5][idx + 1..].to_string(),
            ),
            None => (None, elements[5].to_string()),
        };
        Ok(Self {
            arn: arn.to_string(),
            partition: elements[1].to_string(),
            service: elements[2].to_string(),
            region: elements[3].to_string(),
            account_id: elements[4].to_string(),
            resource_type,
            resource,
        })
    }

    /// S3 ARNs are global and omit account and region; fill them in from the scan context.
    pub fn s3(bucket: &str, account_id: &str, region: &str) -> Self {
        Self {
            arn: format!("arn:aws:s3:::{bucket}"),
            partition: "aws".to_string(),
            service: "s3".to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource_type: None,
            resource: bucket.to_string(),
        }
    }

    /// Catalog-safe dataset name: ARN elements joined with `-`, slashes replaced.
    pub fn catalog_name(&self) -> String {
        let mut elements = vec![
            self.partition.as_str(),
            self.account_id.as_str(),
            self.region.as_str(),
            self.service.as_str(),
        ];
        if let Some(ref t) = self.resource_type {
            elements.push(t.as_str());
        }
        elements.push(self.resource.as_str());
        elements.join(Self::NAME_DELIM).replace('/', Self::NAME_DELIM)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arn)
    }
}

/// Open property value attached to a resource (tags, retention, encryption, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// One discovered resource. Immutable once built; every downstream phase reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    arn: Arn,
    /// Epoch seconds. `None` means unknown; never used for staleness decisions.
    creation_time: Option<i64>,
    status: String,
    properties: Properties,
}

impl Resource {
    /// Build a resource, rejecting a status outside the service's allow-list.
    pub fn new(
        arn: Arn,
        creation_time: Option<i64>,
        status: &str,
        properties: Properties,
    ) -> Result<Self, ResourceError> {
        let allowed = resource_statuses(&arn.service).unwrap_or(&[]);
        if status.is_empty() || !allowed.contains(&status) {
            return Err(ResourceError::UnknownStatus {
                service: arn.service.clone(),
                status: status.to_string(),
            });
        }
        Ok(Self {
            arn,
            creation_time,
            status: status.to_string(),
            properties,
        })
    }

    pub fn arn(&self) -> &Arn {
        &self.arn
    }

    /// Stable identifier used as cache key and grant resource id.
    pub fn id(&self) -> &str {
        &self.arn.arn
    }

    pub fn service(&self) -> &str {
        &self.arn.service
    }

    pub fn creation_time(&self) -> Option<i64> {
        self.creation_time
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Collapse service statuses to ACTIVE / INACTIVE.
    pub fn normalized_status(&self) -> &'static str {
        match (self.arn.service.as_str(), self.status.as_str()) {
            ("dynamodb", "ARCHIVING" | "ARCHIVED" | "DELETING") => "INACTIVE",
            ("kinesis", "DELETING") => "INACTIVE",
            _ => "ACTIVE",
        }
    }

    /// Case-insensitive lookup in the `Tags` property (list of `{Key, Value}` maps). Empty values are skipped.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        let PropertyValue::List(tags) = self.properties.get("Tags")? else {
            return None;
        };
        tags.iter().find_map(|tag| {
            let PropertyValue::Map(tag) = tag else {
                return None;
            };
            let k = tag.get("Key").and_then(PropertyValue::as_str)?;
            let v = tag.get("Value").and_then(PropertyValue::as_str)?;
            (k.eq_ignore_ascii_case(key) && !v.is_empty()).then_some(v)
        })
    }
}

/// Coarse permission class derived from fine-grained action names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
}

/// Capabilities one principal holds on one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub principal_id: String,
    pub resource_id: String,
    pub capabilities: BTreeSet<Capability>,
}

/// Identity kinds whose policies are evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Group,
    Role,
    User,
}

/// A principal evaluated against resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub kind: SubjectKind,
}

impl Subject {
    /// Build from a principal ARN; the kind comes from the ARN resource type.
    pub fn from_arn(arn: &str) -> Result<Self, ResourceError> {
        let parsed = Arn::parse(arn)?;
        let kind = match parsed.resource_type.as_deref() {
            Some("group") => SubjectKind::Group,
            Some("role") => SubjectKind::Role,
            Some("user") => SubjectKind::User,
            _ => return Err(ResourceError::InvalidArn(arn.to_string())),
        };
        Ok(Self {
            id: arn.to_string(),
            kind,
        })
    }
}

/// One step of the per-account pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Scan,
    Filter,
    AccessEvaluation,
    Registration,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Scan,
        Phase::Filter,
        Phase::AccessEvaluation,
        Phase::Registration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Scan => "scan",
            Phase::Filter => "filter",
            Phase::AccessEvaluation => "access_simulation",
            Phase::Registration => "registration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(account, phase)` entry in the active stage set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageKey {
    pub account_id: String,
    pub phase: Phase,
}

impl StageKey {
    pub fn new(account_id: &str, phase: Phase) -> Self {
        Self {
            account_id: account_id.to_string(),
            phase,
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.account_id, self.phase)
    }
}

/// `resource id -> grants` produced by access evaluation.
pub type GrantMap = HashMap<String, Vec<AccessGrant>>;

/// Full options for a run (CLI, settings file, lib callers).
#[derive(Clone, Debug)]
pub struct Opts {
    /// State database. When None, uses the package db filename in the working directory.
    pub db_path: Option<PathBuf>,
    /// Disable metastore, cache, and catalog writes.
    pub dry_run: bool,
    pub verbose: bool,
    /// Process a single account instead of every configured one.
    pub account: Option<String>,
    pub disable_access_cache: bool,
    /// Skip remote policy evaluation; every resource gets empty grants.
    pub disable_access_simulation: bool,
    pub disable_resource_filter: bool,
    /// Log every (principal, resource, capabilities) observation at info level.
    pub log_access_observations: bool,
    pub monitor_interval: Duration,
    pub default_stage_timeout: Duration,
    /// Per-phase overrides of `default_stage_timeout`.
    pub stage_timeouts: HashMap<Phase, Duration>,
    pub queue_poll: Duration,
    pub batch_size: usize,
    pub max_items: usize,
    pub max_workers: usize,
    pub rate_limit: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub fan_out_timeout: Duration,
    /// Access cache TTL in seconds, plus per-account overrides.
    pub cache_ttl: i64,
    pub cache_ttl_overrides: HashMap<String, i64>,
    pub cache_jitter_ratio: f64,
    pub catalog_rate_limit: Duration,
}

impl Default for Opts {
    fn default() -> Self {
        let mut stage_timeouts = HashMap::new();
        stage_timeouts.insert(
            Phase::Registration,
            Duration::from_secs(MonitorConsts::REGISTRATION_STAGE_TIMEOUT_SECS),
        );
        Self {
            db_path: None,
            dry_run: false,
            verbose: false,
            account: None,
            disable_access_cache: false,
            disable_access_simulation: false,
            disable_resource_filter: false,
            log_access_observations: false,
            monitor_interval: Duration::from_secs(MonitorConsts::INTERVAL_SECS),
            default_stage_timeout: Duration::from_secs(MonitorConsts::DEFAULT_STAGE_TIMEOUT_SECS),
            stage_timeouts,
            queue_poll: QUEUE_POLL_TIMEOUT,
            batch_size: AccessConsts::BATCH_SIZE,
            max_items: AccessConsts::MAX_ITEMS,
            max_workers: AccessConsts::MAX_WORKERS,
            rate_limit: Duration::from_secs(AccessConsts::RATE_LIMIT_SECS),
            retries: AccessConsts::RETRIES,
            retry_delay: Duration::from_secs(AccessConsts::RETRY_DELAY_SECS),
            fan_out_timeout: Duration::from_secs(AccessConsts::FAN_OUT_TIMEOUT_SECS),
            cache_ttl: CacheConsts::DEFAULT_TTL_SECS,
            cache_ttl_overrides: HashMap::new(),
            cache_jitter_ratio: CacheConsts::JITTER_RATIO,
            catalog_rate_limit: RegistrationConsts::CATALOG_RATE_LIMIT,
        }
    }
}

impl Opts {
    /// Progress timeout for a phase: override if configured, else the default.
    pub fn stage_timeout(&self, phase: Phase) -> Duration {
        self.stage_timeouts
            .get(&phase)
            .copied()
            .unwrap_or(self.default_stage_timeout)
    }

    pub fn cache_ttl_for(&self, account_id: &str) -> i64 {
        self.cache_ttl_overrides
            .get(account_id)
            .copied()
            .unwrap_or(self.cache_ttl)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().db_filename()))
    }
}

/// Current wall clock as epoch seconds.
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
