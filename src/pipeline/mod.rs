//! Pipeline components: queues, phases, and the per-account driver.

pub mod collaborators;
pub mod context;
pub mod error_handler;
pub mod evaluation;
pub mod filter;
pub mod orchestrator;
pub mod queue;
pub mod registration;
pub mod scan;
pub mod stages;

pub use collaborators::{
    AccountCollaborators, CollaboratorFactory, DatasetRegistration, Registrar, Scanner,
    ScannerSpec, SubjectSource,
};
pub use context::{AccountQueues, EvaluatedResource, RunContext, RunStores};
pub use error_handler::PhaseFailure;
pub use evaluation::run_access_phase;
pub use filter::{run_filter_phase, should_exclude};
pub use orchestrator::{RunSummary, run_pipeline};
pub use queue::CompletionQueue;
pub use registration::{RegistrationPhase, next_refresh_at, run_registration_phase};
pub use scan::run_scan_phase;
pub use stages::{StageRun, batch_process_completion_queue, process_completion_queue};
