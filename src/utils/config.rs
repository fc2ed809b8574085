//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    db_filename: String,
    settings_filename: String,
    catalog_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                db_filename: format!(".{pkg}.db"),
                settings_filename: format!("{pkg}.toml"),
                catalog_filename: format!("{pkg}.catalog.jsonl"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default state database (metastore, access cache, stage markers).
    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn settings_filename(&self) -> &str {
        &self.settings_filename
    }

    /// Default JSON-lines output for the offline catalog.
    pub fn catalog_filename(&self) -> &str {
        &self.catalog_filename
    }

    /// Prefix of the environment variables read for credentials.
    pub fn env_prefix(&self) -> String {
        self.pkg_name.to_uppercase()
    }
}

// ---- Credentials ----

/// Environment credentials are re-read after this long.
pub const CREDENTIAL_LIFETIME: Duration = Duration::from_secs(3600);

// ---- Queues ----

/// Poll timeout for consumers waiting on a completion queue.
pub const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(100);

// ---- Liveness monitoring ----

/// Watchdog cadence and stage progress timeouts (seconds).
pub struct MonitorConsts;

impl MonitorConsts {
    /// Period between watchdog samples.
    pub const INTERVAL_SECS: u64 = 120;
    /// Stage progress timeout used when a phase has no override.
    pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1200;
    /// Registration is rate limited against the catalog and legitimately slow.
    pub const REGISTRATION_STAGE_TIMEOUT_SECS: u64 = 7200;
    /// How long a "last completed" stage marker is kept in the stage store.
    pub const STAGE_RECORD_TTL_SECS: i64 = 1_209_600;
}

/// Exit code used when the watchdog terminates the process. A supervisor should retry, not alert.
pub const EXIT_TEMPFAIL: i32 = 75; // sysexits EX_TEMPFAIL

// ---- Access evaluation ----

/// Batching, fan-out and retry tuning for the policy simulation calls.
pub struct AccessConsts;

impl AccessConsts {
    /// Resources per simulation call; also the batch size pulled off the filtered queue.
    pub const BATCH_SIZE: usize = 50;
    /// Page size requested from the simulator.
    pub const MAX_ITEMS: usize = 200;
    /// Subjects evaluated concurrently per account.
    pub const MAX_WORKERS: usize = 6;
    /// Minimum interval between calls in one subject chain.
    pub const RATE_LIMIT_SECS: u64 = 15;
    /// Retries after a transient failure before giving up on a subject.
    pub const RETRIES: u32 = 5;
    pub const RETRY_DELAY_SECS: u64 = 120;
    /// Upper bound on waiting for every subject of one batch.
    pub const FAN_OUT_TIMEOUT_SECS: u64 = 7200;
}

// ---- Access cache ----

pub struct CacheConsts;

impl CacheConsts {
    pub const DEFAULT_TTL_SECS: i64 = 86_400;
    /// Fraction of the TTL that jitter may remove.
    pub const JITTER_RATIO: f64 = 0.25;
}

// ---- Registration ----

pub struct RegistrationConsts;

impl RegistrationConsts {
    /// Resources registered more recently than this are filtered out.
    pub const EXCLUSION_MIN_SECS: i64 = 43_200;
    /// Upper bound of the jittered refresh window written after registration.
    pub const EXCLUSION_MAX_SECS: i64 = 86_400;
    /// Minimum interval between catalog calls.
    pub const CATALOG_RATE_LIMIT: Duration = Duration::from_secs(1);
}

// ---- Metastore ----

/// Prefix of the first-seen copy of a timestamp field (`init_observed`, `init_registered`).
pub const INIT_TS_FIELD_PREFIX: &str = "init_";

/// Fields that make a regional metastore record take precedence over the global one.
pub const SUPPLEMENTAL_FIELDS: [&str; 5] = [
    "annotations",
    "contains_pii",
    "project",
    "records_classes",
    "schema",
];

/// SQLite busy timeout for the shared state database.
pub const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ---- Resources ----

/// Allowed status values per service. A resource with any other status is rejected.
pub fn resource_statuses(service: &str) -> Option<&'static [&'static str]> {
    let statuses: &'static [&'static str] = match service {
        "dax" => &["ACTIVE"],
        "dynamodb" => &[
            "CREATING",
            "UPDATING",
            "DELETING",
            "ACTIVE",
            "INACCESSIBLE_ENCRYPTION_CREDENTIALS",
            "ARCHIVING",
            "ARCHIVED",
        ],
        "elasticache" => &[
            "available",
            "creating",
            "deleted",
            "deleting",
            "incompatible-network",
            "modifying",
            "rebooting cluster nodes",
            "restore-failed",
            "snapshotting",
        ],
        "kinesis" => &["CREATING", "DELETING", "ACTIVE", "UPDATING"],
        "s3" => &["ACTIVE"],
        "sqs" => &["ACTIVE"],
        _ => return None,
    };
    Some(statuses)
}
