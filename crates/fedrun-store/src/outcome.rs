use tracing::{trace, warn};

use crate::errors::StoreError;

/// Result of a best-effort store call.
#[derive(Debug)]
pub enum StoreOutcome<T> {
    /// The call reached the store and succeeded.
    Ok(T),
    /// No store is configured for this process.
    Unavailable,
    /// The store was configured but the call failed.
    Failed(StoreError),
}

impl<T> StoreOutcome<T> {
    /// Collapse into an `Option`, logging a failure against `op` on `table`.
    pub fn or_log(self, op: &'static str, table: &str) -> Option<T> {
        match self {
            StoreOutcome::Ok(v) => Some(v),
            StoreOutcome::Unavailable => {
                trace!(op, table, "remote store not configured; skipping");
                None
            }
            StoreOutcome::Failed(e) => {
                warn!(op, table, error = %e, "remote store call failed; continuing");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_log_keeps_only_success() {
        assert_eq!(StoreOutcome::Ok(3).or_log("fetch", "t"), Some(3));
        assert_eq!(StoreOutcome::<i32>::Unavailable.or_log("fetch", "t"), None);
        let failed = StoreOutcome::<i32>::Failed(StoreError::Unreachable("down".into()));
        assert_eq!(failed.or_log("fetch", "t"), None);
    }
}
