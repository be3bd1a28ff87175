use anyhow::{Context, Result};
use redis::AsyncCommands;
use redis::Script;
use serde_json::Value;

use crate::keys::{self, delayed_key, notify_key, reserved_key};
use crate::payload::{self, create_payload};
use crate::scripts;
use crate::settings::RdqSettings;
use crate::time::{Clock, Delay};

/// One entry of a bulk enqueue. Immediate unless a delay is attached.
#[derive(Debug, Clone)]
pub struct BulkJob {
    pub job: String,
    pub delay: Option<Delay>,
}

impl BulkJob {
    #[must_use]
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            delay: None,
        }
    }

    #[must_use]
    pub fn delayed(job: impl Into<String>, delay: impl Into<Delay>) -> Self {
        Self {
            job: job.into(),
            delay: Some(delay.into()),
        }
    }
}

/// The durable queue broker.
///
/// Holds no locks and spawns no tasks; every multi-key mutation is delegated
/// to a server-side script so Redis serializes it. Cloning is cheap and
/// yields an independent handle over the same multiplexed connection, which
/// is how per-worker pop state (`secondary_queue_had_job`) stays per-handle.
#[derive(Clone)]
pub struct QueueBroker {
    settings: RdqSettings,
    conn: redis::aio::MultiplexedConnection,
    clock: Clock,
    size_script: Script,
    push_script: Script,
    pop_script: Script,
    release_script: Script,
    migrate_script: Script,
    clear_script: Script,
    secondary_queue_had_job: bool,
}

impl QueueBroker {
    pub async fn new(settings: RdqSettings) -> Result<Self> {
        let client = redis::Client::open(settings.redis_dsn.as_str())
            .with_context(|| "failed to create Redis client")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| "failed to connect to Redis")?;
        Ok(Self::with_connection(settings, conn))
    }

    pub fn with_connection(
        settings: RdqSettings,
        conn: redis::aio::MultiplexedConnection,
    ) -> Self {
        Self {
            settings,
            conn,
            clock: Clock::default(),
            size_script: Script::new(scripts::SIZE),
            push_script: Script::new(scripts::PUSH),
            pop_script: Script::new(scripts::POP),
            release_script: Script::new(scripts::RELEASE),
            migrate_script: Script::new(scripts::MIGRATE_EXPIRED),
            clear_script: Script::new(scripts::CLEAR),
            secondary_queue_had_job: false,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &RdqSettings {
        &self.settings
    }

    fn resolve_queue(&self, queue: Option<&str>) -> Result<String> {
        keys::queue_key(queue.unwrap_or(&self.settings.default_queue_name))
    }

    /// Enqueues an immediate job, returning its generated id.
    pub async fn push(&mut self, job: &str, data: &Value, queue: Option<&str>) -> Result<String> {
        let (id, raw) = create_payload(job, data, self.settings.dispatch_after_commit)?;
        self.push_payload(&raw, queue).await?;
        Ok(id)
    }

    /// Enqueues a pre-built payload, returning whatever id it carries.
    pub async fn push_raw(&mut self, raw: &str, queue: Option<&str>) -> Result<Option<String>> {
        let id = payload::payload_id(raw)?;
        self.push_payload(raw, queue).await?;
        Ok(id)
    }

    async fn push_payload(&mut self, raw: &str, queue: Option<&str>) -> Result<()> {
        let queue_key = self.resolve_queue(queue)?;
        let _: () = self
            .push_script
            .key(&queue_key)
            .key(notify_key(&queue_key))
            .arg(raw)
            .invoke_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to push onto {queue_key}"))?;
        tracing::debug!(queue = %queue_key, "pushed job");
        Ok(())
    }

    /// Enqueues a job that becomes visible once `delay` has elapsed.
    ///
    /// Intentionally scriptless: the single ZADD touches only the delayed
    /// set, and no notify token is written until migration makes the job
    /// reservable.
    pub async fn later(
        &mut self,
        delay: impl Into<Delay>,
        job: &str,
        data: &Value,
        queue: Option<&str>,
    ) -> Result<String> {
        let (id, raw) = create_payload(job, data, self.settings.dispatch_after_commit)?;
        let queue_key = self.resolve_queue(queue)?;
        let available_at = delay.into().available_at(self.clock.now());
        self.conn
            .zadd::<_, _, _, ()>(delayed_key(&queue_key), &raw, available_at)
            .await
            .with_context(|| format!("failed to delay-enqueue onto {queue_key}"))?;
        tracing::debug!(queue = %queue_key, available_at, "pushed delayed job");
        Ok(id)
    }

    /// Enqueues a batch in a single round trip and returns the generated ids
    /// in input order. Uses MULTI/EXEC on single-node connections; on a
    /// cluster the batch may span hash slots, so it falls back to plain
    /// pipelining.
    pub async fn bulk(
        &mut self,
        jobs: &[BulkJob],
        data: &Value,
        queue: Option<&str>,
    ) -> Result<Vec<String>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let queue_key = self.resolve_queue(queue)?;
        let now = self.clock.now();

        let mut pipe = redis::pipe();
        if !self.settings.cluster {
            pipe.atomic();
        }
        let mut ids = Vec::with_capacity(jobs.len());
        for entry in jobs {
            let (id, raw) = create_payload(&entry.job, data, self.settings.dispatch_after_commit)?;
            match entry.delay {
                Some(delay) => {
                    pipe.zadd(delayed_key(&queue_key), &raw, delay.available_at(now))
                        .ignore();
                }
                None => {
                    pipe.cmd("EVAL")
                        .arg(scripts::PUSH)
                        .arg(2)
                        .arg(&queue_key)
                        .arg(notify_key(&queue_key))
                        .arg(&raw)
                        .ignore();
                }
            }
            ids.push(id);
        }
        let _: () = pipe
            .query_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to bulk-enqueue onto {queue_key}"))?;
        tracing::debug!(queue = %queue_key, count = ids.len(), "bulk enqueued");
        Ok(ids)
    }

    /// Attempts to reserve the next job.
    ///
    /// `index` is the queue's position in the worker's sweep over its
    /// monitored queues. Only the highest-priority queue (`index == 0`) may
    /// block, and only when the previous sweep found no work on a secondary
    /// queue; a worker that just drained a secondary queue returns promptly
    /// so the secondaries get another turn.
    pub async fn pop(&mut self, queue: Option<&str>, index: usize) -> Result<Option<ReservedJob>> {
        let queue_key = self.resolve_queue(queue)?;
        self.migrate(&queue_key).await?;

        let block = index == 0 && !self.secondary_queue_had_job;
        let mut next = self.retrieve_next_job(&queue_key).await?;

        if next.is_none()
            && block
            && let Some(block_for) = self.settings.block_for()
        {
            let woke: Option<(String, String)> = self
                .conn
                .blpop(notify_key(&queue_key), block_for as f64)
                .await
                .with_context(|| format!("blocking pop failed on {queue_key}"))?;
            // The token is informational; the retry below must still win the
            // atomic reservation, and it never blocks a second time.
            if woke.is_some() {
                next = self.retrieve_next_job(&queue_key).await?;
            }
        }

        match next {
            Some((job, reserved)) => {
                self.secondary_queue_had_job = index > 0;
                tracing::debug!(queue = %queue_key, "reserved job");
                Ok(Some(ReservedJob {
                    broker: self.clone(),
                    connection: self.settings.connection_name.clone(),
                    queue_key,
                    payload: job,
                    reserved,
                }))
            }
            None => {
                if index == 0 {
                    self.secondary_queue_had_job = false;
                }
                Ok(None)
            }
        }
    }

    async fn migrate(&mut self, queue_key: &str) -> Result<()> {
        let now = self.clock.now();
        self.migrate_expired_jobs(&delayed_key(queue_key), queue_key, now)
            .await?;
        if self.settings.retry_after().is_some() {
            self.migrate_expired_jobs(&reserved_key(queue_key), queue_key, now)
                .await?;
        }
        Ok(())
    }

    async fn migrate_expired_jobs(
        &mut self,
        from: &str,
        to: &str,
        now: i64,
    ) -> Result<Vec<String>> {
        let moved: Vec<String> = self
            .migrate_script
            .key(from)
            .key(to)
            .key(notify_key(to))
            .arg(now)
            .arg(self.settings.migration_batch_size)
            .invoke_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to migrate expired jobs from {from}"))?;
        if !moved.is_empty() {
            tracing::debug!(from = %from, count = moved.len(), "migrated expired jobs");
        }
        Ok(moved)
    }

    async fn retrieve_next_job(&mut self, queue_key: &str) -> Result<Option<(String, String)>> {
        let now = self.clock.now();
        let expiry = now + self.settings.retry_after().unwrap_or(0);
        let (job, reserved): (Option<String>, Option<String>) = self
            .pop_script
            .key(queue_key)
            .key(reserved_key(queue_key))
            .key(notify_key(queue_key))
            .arg(expiry)
            .arg(now)
            .invoke_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to reserve a job from {queue_key}"))?;
        Ok(job.zip(reserved))
    }

    /// Acknowledges a reserved job by removing its reserved copy.
    ///
    /// Returns false when the reservation had already expired and been
    /// re-migrated, in which case another worker owns the job now and the
    /// ack is a no-op.
    pub async fn delete_reserved(
        &mut self,
        queue: Option<&str>,
        job: &ReservedJob,
    ) -> Result<bool> {
        let queue_key = self.resolve_queue(queue)?;
        self.delete_reserved_copy(&queue_key, &job.reserved).await
    }

    pub(crate) async fn delete_reserved_copy(
        &mut self,
        queue_key: &str,
        reserved: &str,
    ) -> Result<bool> {
        let removed: i64 = self
            .conn
            .zrem(reserved_key(queue_key), reserved)
            .await
            .with_context(|| format!("failed to delete reservation from {queue_key}"))?;
        if removed == 0 {
            tracing::warn!(queue = %queue_key, "reservation already expired; ack was a no-op");
        }
        Ok(removed > 0)
    }

    /// Releases a reserved job back onto the queue, visible after `delay`.
    pub async fn delete_and_release(
        &mut self,
        queue: Option<&str>,
        job: &ReservedJob,
        delay: impl Into<Delay>,
    ) -> Result<()> {
        let queue_key = self.resolve_queue(queue)?;
        self.release_reserved_copy(&queue_key, &job.reserved, delay.into())
            .await
    }

    pub(crate) async fn release_reserved_copy(
        &mut self,
        queue_key: &str,
        reserved: &str,
        delay: Delay,
    ) -> Result<()> {
        let available_at = delay.available_at(self.clock.now());
        let _: () = self
            .release_script
            .key(delayed_key(queue_key))
            .key(reserved_key(queue_key))
            .arg(reserved)
            .arg(available_at)
            .invoke_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to release reservation back onto {queue_key}"))?;
        tracing::debug!(queue = %queue_key, available_at, "released reserved job");
        Ok(())
    }

    /// Total jobs across the ready, delayed, and reserved structures.
    pub async fn size(&mut self, queue: Option<&str>) -> Result<i64> {
        let queue_key = self.resolve_queue(queue)?;
        self.size_of(&queue_key).await
    }

    pub(crate) async fn size_of(&mut self, queue_key: &str) -> Result<i64> {
        let size: i64 = self
            .size_script
            .key(queue_key)
            .key(delayed_key(queue_key))
            .key(reserved_key(queue_key))
            .invoke_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to read size of {queue_key}"))?;
        Ok(size)
    }

    /// Deletes all four structures of a queue, returning how many jobs they
    /// held.
    pub async fn clear(&mut self, queue: Option<&str>) -> Result<i64> {
        let queue_key = self.resolve_queue(queue)?;
        let cleared: i64 = self
            .clear_script
            .key(&queue_key)
            .key(delayed_key(&queue_key))
            .key(reserved_key(&queue_key))
            .key(notify_key(&queue_key))
            .invoke_async(&mut self.conn)
            .await
            .with_context(|| format!("failed to clear {queue_key}"))?;
        tracing::debug!(queue = %queue_key, count = cleared, "cleared queue");
        Ok(cleared)
    }

    pub async fn flushdb(&mut self) -> Result<()> {
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut self.conn)
            .await
            .context("failed to flush database")?;
        Ok(())
    }
}

/// A job handed to a worker: the payload to process plus the reserved copy
/// that must be presented back for ack or release.
pub struct ReservedJob {
    broker: QueueBroker,
    connection: String,
    queue_key: String,
    payload: String,
    reserved: String,
}

impl ReservedJob {
    /// The payload exactly as it sat on the ready list.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The copy stored in the reserved set: attempts incremented and
    /// `reserved_at` stamped. This is the token ack and release match on.
    pub fn reserved_payload(&self) -> &str {
        &self.reserved
    }

    pub fn queue(&self) -> &str {
        &self.queue_key
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn decoded(&self) -> Result<Value> {
        serde_json::from_str(&self.payload).context("reserved job payload is not valid JSON")
    }

    pub fn id(&self) -> Option<String> {
        payload::payload_id(&self.reserved).ok().flatten()
    }

    pub fn attempts(&self) -> i64 {
        payload::payload_attempts(&self.reserved).unwrap_or(0)
    }

    /// Unix time this reservation was taken, as stamped by the pop script.
    pub fn reserved_at(&self) -> Option<i64> {
        payload::payload_reserved_at(&self.reserved).ok().flatten()
    }

    /// Total jobs remaining on this job's queue.
    pub async fn size(&mut self) -> Result<i64> {
        self.broker.size_of(&self.queue_key).await
    }

    /// Acknowledges the job. Returns false when the reservation had already
    /// expired out from under this worker.
    pub async fn delete(mut self) -> Result<bool> {
        self.broker
            .delete_reserved_copy(&self.queue_key, &self.reserved)
            .await
    }

    /// Puts the job back, visible again after `delay`.
    pub async fn release(mut self, delay: impl Into<Delay>) -> Result<()> {
        self.broker
            .release_reserved_copy(&self.queue_key, &self.reserved, delay.into())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_job_constructors() {
        let immediate = BulkJob::new("mail:send");
        assert!(immediate.delay.is_none());

        let delayed = BulkJob::delayed("mail:digest", 30);
        assert!(matches!(delayed.delay, Some(Delay::Seconds(30))));
    }
}
