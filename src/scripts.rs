//! Lua scripts backing the atomic queue operations.
//!
//! Every mutating sequence that touches more than one of a queue's four keys
//! runs as one of these scripts so Redis serializes it. Clients must never
//! update more than one of the keys with ad-hoc command sequences; the single
//! exception is the scriptless delayed enqueue, which only writes the delayed
//! set.

/// `KEYS[1]` -> queues:{name}
/// `KEYS[2]` -> queues:{name}:delayed
/// `KEYS[3]` -> queues:{name}:reserved
///
/// Returns the combined number of payloads across the three structures.
pub const SIZE: &str = r#"
return redis.call('llen', KEYS[1]) + redis.call('zcard', KEYS[2]) + redis.call('zcard', KEYS[3])
"#;

/// `KEYS[1]` -> queues:{name}
/// `KEYS[2]` -> queues:{name}:notify
/// `ARGV[1]` -> serialized job payload
///
/// Appends the payload to the ready list together with its notify token, so
/// a blocked consumer can never observe a token without a matching job.
pub const PUSH: &str = r#"
redis.call('rpush', KEYS[1], ARGV[1])
redis.call('rpush', KEYS[2], 1)
"#;

/// `KEYS[1]` -> queues:{name}
/// `KEYS[2]` -> queues:{name}:reserved
/// `KEYS[3]` -> queues:{name}:notify
/// `ARGV[1]` -> visibility-expiry score (now + retry_after)
/// `ARGV[2]` -> current Unix time
///
/// Takes the oldest ready job, consumes its notify token, and records a
/// reserved copy (attempts incremented, reservation time stamped) scored by
/// visibility expiry. Returns `{original payload, reserved copy}` or a pair
/// of nils when the queue is empty.
pub const POP: &str = r#"
local job = redis.call('lpop', KEYS[1])
local reserved = false

if job ~= false then
    redis.call('lpop', KEYS[3])
    reserved = cjson.decode(job)
    reserved['attempts'] = reserved['attempts'] + 1
    reserved['reserved_at'] = tonumber(ARGV[2])
    reserved = cjson.encode(reserved)
    redis.call('zadd', KEYS[2], ARGV[1], reserved)
end

return {job, reserved}
"#;

/// `KEYS[1]` -> queues:{name}:delayed
/// `KEYS[2]` -> queues:{name}:reserved
/// `ARGV[1]` -> reserved copy
/// `ARGV[2]` -> availability score
///
/// Moves a reserved copy back to the delayed set. No notify token is written
/// here; migration emits one when the delay expires.
pub const RELEASE: &str = r#"
redis.call('zrem', KEYS[2], ARGV[1])
redis.call('zadd', KEYS[1], ARGV[2], ARGV[1])
"#;

/// `KEYS[1]` -> source sorted set (delayed or reserved)
/// `KEYS[2]` -> queues:{name}
/// `KEYS[3]` -> queues:{name}:notify
/// `ARGV[1]` -> current Unix time
/// `ARGV[2]` -> batch size (-1 for unlimited)
///
/// Moves every entry whose score is due onto the tail of the ready list,
/// one notify token per entry, preserving score-then-insertion order.
/// Chunks of 100 keep `unpack` below Lua's stack limit.
pub const MIGRATE_EXPIRED: &str = r#"
local val = redis.call('zrangebyscore', KEYS[1], '-inf', ARGV[1], 'limit', 0, ARGV[2])

if next(val) ~= nil then
    redis.call('zremrangebyrank', KEYS[1], 0, #val - 1)

    for i = 1, #val, 100 do
        redis.call('rpush', KEYS[2], unpack(val, i, math.min(i + 99, #val)))
        for j = i, math.min(i + 99, #val) do
            redis.call('rpush', KEYS[3], 1)
        end
    end
end

return val
"#;

/// `KEYS[1]` -> queues:{name}
/// `KEYS[2]` -> queues:{name}:delayed
/// `KEYS[3]` -> queues:{name}:reserved
/// `KEYS[4]` -> queues:{name}:notify
///
/// Deletes all four structures and returns how many jobs they held.
pub const CLEAR: &str = r#"
local size = redis.call('llen', KEYS[1]) + redis.call('zcard', KEYS[2]) + redis.call('zcard', KEYS[3])
redis.call('del', KEYS[1], KEYS[2], KEYS[3], KEYS[4])
return size
"#;
