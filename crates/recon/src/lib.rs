//! `vra-recon`: revenue assurance jobs.
//!
//! Each job is a plain function over explicitly passed collaborator handles
//! (see `vra_core::store`) and a [`ReconSettings`] value built fresh for the
//! invocation. No job keeps state between runs.

pub mod classify;
pub mod config;
pub mod dispute;
pub mod error;
pub mod evidence;
pub mod expected;
pub mod ingest;
pub mod matcher;
pub mod redact;
pub mod stats;
pub mod storage;

pub use classify::{reconcile_window, ReconcileOutcome, RuleSkip, WindowAmounts};
pub use config::{
    fetch_limit, within_limit, Caps, IngestSettings, MatchOptions, ReconSettings, RunFlags, StorageBackend,
    StorageSettings, Thresholds,
};
pub use dispute::{build_dispute_kit, verify_kit, KitOutcome, KitRequest, KitVerification, DRY_RUN_URI};
pub use error::ReconError;
pub use expected::{build_expected, ExpectedOutcome, ExpectedSources};
pub use ingest::{ingest, IngestOutcome, IngestRequest};
pub use matcher::{match_statements, MatchOutput};
pub use redact::Redactor;
pub use storage::{EvidenceStorage, FsStorage, MemoryStorage, ObjectStorage, StorageError};
