//! Durable state for optimization jobs
//!
//! One record per job plus one checkpoint blob per job, both keyed by job id
//! and readable across process restarts:
//! - [`JobRecord`]: identity, status, config snapshot, progress, timestamps
//! - [`Checkpoint`]: versioned, fingerprinted snapshot of optimization
//!   progress, written atomically with an integrity digest
//! - [`JobStore`]: the storage contract; [`FileJobStore`] is the JSON-file
//!   implementation
//!
//! Updates are whole-record and last-write-wins, so replaying an update can
//! never corrupt state.

pub mod checkpoint;
pub mod error;
pub mod record;
pub mod store;

pub use checkpoint::{config_fingerprint, Checkpoint, CHECKPOINT_VERSION};
pub use error::StoreError;
pub use record::{JobId, JobRecord, JobStatus};
pub use store::{FileJobStore, JobStore};
