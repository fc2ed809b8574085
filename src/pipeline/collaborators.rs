//! Contracts of the per-account collaborators the pipeline drives.

use anyhow::Result;
use std::sync::Arc;

use crate::access::PolicySimulator;
use crate::store::Record;
use crate::types::ResourceError;
use crate::utils::{ConfigError, Session};
use crate::{AccessGrant, Resource, Subject};

/// Static description of one scanner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannerSpec {
    pub name: String,
    pub service: String,
    /// Key of the entity list in the listing response.
    pub entities_key: String,
    /// Listing method; required unless `method_exempt`.
    pub scan_method: Option<String>,
    /// Scanners that list through a custom path rather than one method.
    pub method_exempt: bool,
}

impl ScannerSpec {
    pub fn new(name: &str, service: &str, entities_key: &str, scan_method: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            service: service.to_string(),
            entities_key: entities_key.to_string(),
            scan_method: scan_method.map(str::to_string),
            method_exempt: false,
        }
    }

    pub fn exempt(mut self) -> Self {
        self.method_exempt = true;
        self
    }

    /// Fail fast on an incomplete scanner definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |message: &str| ConfigError::Scanner {
            scanner: self.name.clone(),
            message: message.to_string(),
        };
        if self.name.is_empty() {
            return Err(err("empty name"));
        }
        if self.service.is_empty() {
            return Err(err("empty service"));
        }
        if self.entities_key.is_empty() {
            return Err(err("empty entities key"));
        }
        if !self.method_exempt && self.scan_method.as_deref().is_none_or(str::is_empty) {
            return Err(err("missing scan method"));
        }
        Ok(())
    }
}

/// Enumerates resources of one kind.
pub trait Scanner: Send + Sync {
    fn spec(&self) -> &ScannerSpec;

    /// Emit every resource found. A per-resource error does not stop the scan.
    fn scan(&self, emit: &mut dyn FnMut(Result<Resource, ResourceError>)) -> Result<()>;
}

/// Enumerates principals whose access is evaluated.
pub trait SubjectSource: Send + Sync {
    fn subjects(&self) -> Result<Vec<Subject>>;
}

/// Everything the catalog receives for one resource.
#[derive(Clone, Debug)]
pub struct DatasetRegistration<'a> {
    pub resource: &'a Resource,
    pub grants: &'a [AccessGrant],
    /// Catalog-safe dataset name.
    pub name: String,
    /// Regional or global metastore record (project, schema, annotations, ...).
    pub metadata: Option<Record>,
}

/// Publishes a dataset and its grants to the catalog.
pub trait Registrar: Send + Sync {
    fn register(&self, dataset: &DatasetRegistration<'_>) -> Result<()>;
}

/// Collaborators for one account.
pub struct AccountCollaborators {
    pub scanners: Vec<Box<dyn Scanner>>,
    pub subjects: Box<dyn SubjectSource>,
    pub simulator: Arc<dyn PolicySimulator>,
    pub registrar: Arc<dyn Registrar>,
}

impl AccountCollaborators {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scanners.iter().try_for_each(|s| s.spec().validate())
    }
}

/// Source of accounts and their collaborators.
pub trait CollaboratorFactory: Send + Sync {
    fn accounts(&self) -> Result<Vec<String>>;

    fn for_account(&self, account_id: &str, session: &Session) -> Result<AccountCollaborators>;
}
