use std::sync::OnceLock;

use anyhow::Result;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::broker::QueueBroker;
use crate::settings::RdqSettings;

static REDIS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn redis_lock() -> &'static Mutex<()> {
    REDIS_LOCK.get_or_init(|| Mutex::new(()))
}

/// Serialized access to a throwaway Redis database for integration tests.
///
/// The database named by `RDQ_TEST_REDIS_DSN` (default db 15 on localhost)
/// is flushed on construction, and each context gets a unique default queue
/// name. Construction yields `None` when no Redis server is reachable so
/// suites can skip instead of fail.
pub struct RedisTestContext {
    _guard: MutexGuard<'static, ()>,
    pub settings: RdqSettings,
    pub broker: QueueBroker,
}

impl RedisTestContext {
    pub async fn new() -> Result<Option<Self>> {
        Self::with_settings(RdqSettings::default()).await
    }

    pub async fn with_settings(mut settings: RdqSettings) -> Result<Option<Self>> {
        let guard = redis_lock().lock().await;
        settings.redis_dsn = std::env::var("RDQ_TEST_REDIS_DSN")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        settings.default_queue_name = format!("test-queue-{}", Uuid::new_v4());
        let mut broker = match QueueBroker::new(settings.clone()).await {
            Ok(broker) => broker,
            Err(_) => return Ok(None),
        };
        broker.flushdb().await?;
        Ok(Some(Self {
            _guard: guard,
            settings,
            broker,
        }))
    }
}
