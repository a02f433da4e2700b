use serde::{Deserialize, Serialize};

/// Quota snapshot for one credential, as reported by the code host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp (seconds) at which the quota window resets.
    pub reset: i64,
    pub used: u64,
}
