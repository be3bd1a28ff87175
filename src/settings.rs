use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BLOCK_FOR_SECONDS, DEFAULT_CONNECTION_NAME, DEFAULT_MIGRATION_BATCH_SIZE,
    DEFAULT_QUEUE_NAME, DEFAULT_REDIS_DSN, DEFAULT_RETRY_AFTER_SECONDS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RdqSettings {
    pub redis_dsn: String,
    /// Logical name of the Redis connection, carried on reserved jobs for
    /// tracing. The broker does not interpret it.
    pub connection_name: String,
    pub default_queue_name: String,
    /// Seconds a reservation stays invisible before it is re-migrated to the
    /// ready list. Values <= 0 disable reserved-recovery migration entirely;
    /// a reservation orphaned by a crashed worker then stays in the reserved
    /// set until `retry_after_seconds` is re-enabled or the queue is cleared.
    pub retry_after_seconds: i64,
    /// Seconds a pop may block on an empty queue. Values <= 0 never block.
    pub block_for_seconds: i64,
    /// Maximum elements moved per migration script call; -1 is unlimited.
    pub migration_batch_size: i64,
    /// Forwarded to payload-building layers; not interpreted by the broker.
    pub dispatch_after_commit: bool,
    /// On cluster connections bulk enqueues use pipelining instead of
    /// MULTI/EXEC, since a batch may span hash slots.
    pub cluster: bool,
}

impl Default for RdqSettings {
    fn default() -> Self {
        Self {
            redis_dsn: DEFAULT_REDIS_DSN.to_string(),
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
            default_queue_name: DEFAULT_QUEUE_NAME.to_string(),
            retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS,
            block_for_seconds: DEFAULT_BLOCK_FOR_SECONDS,
            migration_batch_size: DEFAULT_MIGRATION_BATCH_SIZE,
            dispatch_after_commit: false,
            cluster: false,
        }
    }
}

impl RdqSettings {
    #[must_use]
    pub fn retry_after(&self) -> Option<i64> {
        (self.retry_after_seconds > 0).then_some(self.retry_after_seconds)
    }

    #[must_use]
    pub fn block_for(&self) -> Option<i64> {
        (self.block_for_seconds > 0).then_some(self.block_for_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let settings = RdqSettings::default();
        assert_eq!(settings.default_queue_name, "default");
        assert_eq!(settings.retry_after_seconds, 60);
        assert_eq!(settings.migration_batch_size, -1);
        assert!(!settings.cluster);
    }

    #[test]
    fn non_positive_values_disable_optional_behavior() {
        let mut settings = RdqSettings::default();
        assert_eq!(settings.retry_after(), Some(60));
        assert_eq!(settings.block_for(), None);

        settings.retry_after_seconds = 0;
        settings.block_for_seconds = 5;
        assert_eq!(settings.retry_after(), None);
        assert_eq!(settings.block_for(), Some(5));
    }
}
