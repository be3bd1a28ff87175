pub const QUEUE_KEY_PREFIX: &str = "queues:";

pub const DELAYED_SUFFIX: &str = ":delayed";
pub const RESERVED_SUFFIX: &str = ":reserved";
pub const NOTIFY_SUFFIX: &str = ":notify";

pub const DEFAULT_REDIS_DSN: &str = "redis://localhost:6379/0";
pub const DEFAULT_CONNECTION_NAME: &str = "default";
pub const DEFAULT_QUEUE_NAME: &str = "default";

pub const DEFAULT_RETRY_AFTER_SECONDS: i64 = 60;
pub const DEFAULT_BLOCK_FOR_SECONDS: i64 = 0;
pub const DEFAULT_MIGRATION_BATCH_SIZE: i64 = -1;
