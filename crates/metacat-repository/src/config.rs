//! Repository configuration

use serde::{Deserialize, Serialize};

/// Default window in which edits by the same actor fold into one version
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Seconds after an actor's last edit during which a patch by the same actor is consolidated
    pub session_timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

impl RepositoryConfig {
    pub fn session_timeout(&self) -> chrono::Duration {
        let secs = i64::try_from(self.session_timeout_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }
}
