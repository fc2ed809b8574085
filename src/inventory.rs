//! Offline collaborators: accounts, resources, subjects and allowed actions from a JSON file,
//! registrations appended to a JSON-lines catalog.
//!
//! ```json
//! { "accounts": { "111122223333": {
//!     "region": "us-east-1",
//!     "resources": [ { "arn": "arn:aws:sqs:us-east-1:111122223333:jobs", "status": "ACTIVE" } ],
//!     "subjects": [ "arn:aws:iam::111122223333:role/worker" ],
//!     "allowed": { "arn:aws:iam::111122223333:role/worker": {
//!         "arn:aws:sqs:us-east-1:111122223333:jobs": [ "sqs:ReceiveMessage" ] } } } } }
//! ```

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::access::{
    EvaluationResult, PolicySimulator, SimulationError, SimulationPage, SimulationRequest,
};
use crate::pipeline::{
    AccountCollaborators, CollaboratorFactory, DatasetRegistration, Registrar, Scanner,
    ScannerSpec, SubjectSource,
};
use crate::types::{Arn, Properties, Resource, ResourceError, Subject};
use crate::utils::Session;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountInventory>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountInventory {
    pub region: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// `subject -> resource -> allowed actions`
    #[serde(default)]
    pub allowed: HashMap<String, HashMap<String, Vec<String>>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceEntry {
    pub arn: String,
    pub status: String,
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub properties: Properties,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read inventory {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse inventory {}", path.display()))
    }
}

impl AccountInventory {
    /// Build a resource from an entry; S3 ARNs get this account and region filled in.
    fn resource(&self, account_id: &str, entry: &ResourceEntry) -> Result<Resource, ResourceError> {
        let mut arn = Arn::parse(&entry.arn)?;
        if arn.service == "s3" {
            let region = self.region.as_deref().unwrap_or(DEFAULT_REGION);
            arn = Arn::s3(&arn.resource, account_id, region);
        }
        Resource::new(
            arn,
            entry.creation_time,
            &entry.status,
            entry.properties.clone(),
        )
    }
}

/// One scanner per service found in the inventory.
struct InventoryScanner {
    spec: ScannerSpec,
    account_id: String,
    account: Arc<AccountInventory>,
}

impl Scanner for InventoryScanner {
    fn spec(&self) -> &ScannerSpec {
        &self.spec
    }

    fn scan(&self, emit: &mut dyn FnMut(Result<Resource, ResourceError>)) -> Result<()> {
        for entry in &self.account.resources {
            let service = entry.arn.split(':').nth(2).unwrap_or_default();
            if service == self.spec.service {
                emit(self.account.resource(&self.account_id, entry));
            }
        }
        Ok(())
    }
}

struct InventorySubjects(Arc<AccountInventory>);

impl SubjectSource for InventorySubjects {
    fn subjects(&self) -> Result<Vec<Subject>> {
        self.0
            .subjects
            .iter()
            .map(|arn| Subject::from_arn(arn).map_err(|e| anyhow!(e)))
            .collect()
    }
}

/// Answers simulation requests from the `allowed` table, paging by `max_items`.
pub struct InventorySimulator {
    account: Arc<AccountInventory>,
}

impl InventorySimulator {
    pub fn new(account: Arc<AccountInventory>) -> Self {
        Self { account }
    }
}

impl PolicySimulator for InventorySimulator {
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationPage, SimulationError> {
        if !self.account.subjects.contains(&request.subject_id) {
            return Err(SimulationError::NoSuchEntity(request.subject_id.clone()));
        }
        let offset = match request.marker {
            Some(ref m) => m
                .parse::<usize>()
                .map_err(|_| SimulationError::Malformed(format!("bad marker {m:?}")))?,
            None => 0,
        };
        let allowed = self.account.allowed.get(&request.subject_id);
        let pairs = request
            .resource_ids
            .iter()
            .flat_map(|r| request.actions.iter().map(move |a| (r, a)));
        let page_size = request.max_items.max(1);
        let results: Vec<EvaluationResult> = pairs
            .skip(offset)
            .take(page_size)
            .map(|(resource_id, action)| EvaluationResult {
                allowed: allowed
                    .and_then(|m| m.get(resource_id))
                    .is_some_and(|actions| actions.contains(action)),
                action: action.clone(),
                resource_id: resource_id.clone(),
            })
            .collect();
        let total = request.resource_ids.len() * request.actions.len();
        let next = offset + results.len();
        Ok(SimulationPage {
            results,
            marker: (next < total).then(|| next.to_string()),
        })
    }
}

#[derive(Serialize)]
struct CatalogLine<'a> {
    name: &'a str,
    arn: &'a str,
    service: &'a str,
    status: &'a str,
    normalized_status: &'a str,
    created_at: Option<i64>,
    grants: &'a [crate::AccessGrant],
    metadata: Option<&'a crate::store::Record>,
}

/// Appends one JSON line per registered dataset.
pub struct JsonlRegistrar {
    out: Mutex<BufWriter<File>>,
}

impl JsonlRegistrar {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open catalog {}", path.display()))?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Registrar for JsonlRegistrar {
    fn register(&self, dataset: &DatasetRegistration<'_>) -> Result<()> {
        let r = dataset.resource;
        let line = CatalogLine {
            name: &dataset.name,
            arn: r.id(),
            service: r.service(),
            status: r.status(),
            normalized_status: r.normalized_status(),
            created_at: r.creation_time(),
            grants: dataset.grants,
            metadata: dataset.metadata.as_ref(),
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *out, &line)?;
        out.write_all(b"\n")?;
        out.flush().context("flush catalog")?;
        Ok(())
    }
}

pub struct InventoryFactory {
    inventory: Inventory,
    registrar: Arc<JsonlRegistrar>,
}

impl InventoryFactory {
    pub fn new(inventory: Inventory, registrar: Arc<JsonlRegistrar>) -> Self {
        Self {
            inventory,
            registrar,
        }
    }
}

impl CollaboratorFactory for InventoryFactory {
    fn accounts(&self) -> Result<Vec<String>> {
        Ok(self.inventory.accounts.keys().cloned().collect())
    }

    fn for_account(&self, account_id: &str, session: &Session) -> Result<AccountCollaborators> {
        session.credentials()?;
        let account = Arc::new(
            self.inventory
                .accounts
                .get(account_id)
                .cloned()
                .ok_or_else(|| anyhow!("{account_id}: not in inventory"))?,
        );
        let mut services: Vec<&str> = account
            .resources
            .iter()
            .filter_map(|e| e.arn.split(':').nth(2))
            .collect();
        services.sort_unstable();
        services.dedup();
        let scanners = services
            .into_iter()
            .map(|service| {
                Box::new(InventoryScanner {
                    spec: ScannerSpec::new(
                        &format!("{service}_scanner"),
                        service,
                        "resources",
                        Some("inventory"),
                    ),
                    account_id: account_id.to_string(),
                    account: Arc::clone(&account),
                }) as Box<dyn Scanner>
            })
            .collect();
        Ok(AccountCollaborators {
            scanners,
            subjects: Box::new(InventorySubjects(Arc::clone(&account))),
            simulator: Arc::new(InventorySimulator::new(Arc::clone(&account))),
            registrar: Arc::clone(&self.registrar) as Arc<dyn Registrar>,
        })
    }
}
