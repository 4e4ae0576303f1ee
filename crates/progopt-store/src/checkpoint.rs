//! Versioned, fingerprinted checkpoints
//!
//! A checkpoint is sufficient to resume an optimization run without redoing
//! completed work. The schema version and config fingerprint let `resume`
//! reject a checkpoint written under an incompatible configuration instead
//! of silently misinterpreting it.

use progopt_eval::Candidate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current checkpoint schema version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serializable snapshot of optimization progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version this blob was written under
    pub version: u32,
    /// Fingerprint of the job configuration the progress belongs to
    pub config_fingerprint: String,
    /// Iterations completed when the checkpoint was taken
    pub iteration: u32,
    /// Best candidate found so far
    pub best_candidate: Option<Candidate>,
    /// Score of the best candidate
    pub best_score: Option<f64>,
    /// Opaque strategy-internal state
    pub strategy_state: serde_json::Value,
}

impl Checkpoint {
    /// Checkpoint for the current schema version
    #[must_use]
    pub fn new(config_fingerprint: String, iteration: u32) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            config_fingerprint,
            iteration,
            best_candidate: None,
            best_score: None,
            strategy_state: serde_json::Value::Null,
        }
    }

    /// Whether this checkpoint may seed a resume under the given config
    #[must_use]
    pub fn is_compatible_with(&self, config_fingerprint: &str) -> bool {
        self.version == CHECKPOINT_VERSION && self.config_fingerprint == config_fingerprint
    }
}

/// Canonical fingerprint of a configuration snapshot
///
/// Computed over the sorted-key JSON form, so semantically equal configs
/// fingerprint equally regardless of field order at the call site.
#[must_use]
pub fn config_fingerprint(config: &serde_json::Value) -> String {
    let canonical = config.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    to_hex(&digest)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
