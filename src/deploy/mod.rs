//! Deploy history and pending-change reconciliation.

mod hash;
mod reconcile;
mod state;

pub use hash::{hash_bytes, hash_file, HashAlgorithm, SOURCE_HASH_ALGORITHM};
pub use reconcile::{
    compute_source_hashes, diff, pending_changes, PendingFile, PendingStatus, PendingSummary,
    SourceHashes, CONFIG_HASH_PATH, MAX_PENDING_DISPLAY,
};
pub use state::{format_relative, DeployStateRecord, LastDeploy};
