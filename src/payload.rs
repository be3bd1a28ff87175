//! Job payload construction and the broker-owned fields.
//!
//! Payloads are opaque JSON objects. The broker owns exactly three fields:
//! `id`, `attempts`, and (on reserved copies) `reserved_at`. Everything else
//! a producer puts in a payload is carried byte-identical through every
//! transition, which is why payloads are handled as raw strings end to end
//! and only the pop script rewrites them.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use uuid::Uuid;

pub const ID_FIELD: &str = "id";
pub const ATTEMPTS_FIELD: &str = "attempts";
pub const RESERVED_AT_FIELD: &str = "reserved_at";

/// 32-char alphanumeric id from a cryptographically strong source.
#[must_use]
pub fn random_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Builds the wire payload for a named job, returning the generated id and
/// the serialized payload. `after_commit` is carried on the payload for
/// dispatcher layers; the broker itself never reads it.
pub fn create_payload(job: &str, data: &Value, after_commit: bool) -> Result<(String, String)> {
    let id = random_job_id();
    let payload = json!({
        ID_FIELD: id,
        "job": job,
        "data": data,
        ATTEMPTS_FIELD: 0,
        "after_commit": after_commit,
    });
    let raw = serde_json::to_string(&payload).context("failed to serialize job payload")?;
    Ok((id, raw))
}

/// The `id` field of a serialized payload, if present.
pub fn payload_id(raw: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    Ok(value
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string))
}

/// The `attempts` field of a serialized payload; 0 when absent.
pub fn payload_attempts(raw: &str) -> Result<i64> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    Ok(value
        .get(ATTEMPTS_FIELD)
        .and_then(Value::as_i64)
        .unwrap_or(0))
}

/// The `reserved_at` field of a serialized payload; present only on
/// reserved copies.
pub fn payload_reserved_at(raw: &str) -> Result<Option<i64>> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    Ok(value.get(RESERVED_AT_FIELD).and_then(Value::as_i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_job_id_is_32_alphanumeric_chars() {
        let id = random_job_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, random_job_id());
    }

    #[test]
    fn create_payload_stamps_id_and_zero_attempts() {
        let data = json!({"to": "user@example.com", "template": "welcome"});
        let (id, raw) = create_payload("mail:send", &data, false).unwrap();

        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[ID_FIELD], Value::String(id.clone()));
        assert_eq!(value["job"], "mail:send");
        assert_eq!(value["data"], data);
        assert_eq!(value[ATTEMPTS_FIELD], 0);
        assert_eq!(value["after_commit"], false);
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn create_payload_forwards_after_commit() {
        let (_, raw) = create_payload("mail:send", &json!({}), true).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["after_commit"], true);
    }

    #[test]
    fn payload_accessors_read_broker_fields() {
        let raw = r#"{"id":"abc","attempts":3,"reserved_at":1700000000,"custom":true}"#;
        assert_eq!(payload_id(raw).unwrap().as_deref(), Some("abc"));
        assert_eq!(payload_attempts(raw).unwrap(), 3);
        assert_eq!(payload_reserved_at(raw).unwrap(), Some(1_700_000_000));

        let bare = r#"{"custom":true}"#;
        assert_eq!(payload_id(bare).unwrap(), None);
        assert_eq!(payload_attempts(bare).unwrap(), 0);
        assert_eq!(payload_reserved_at(bare).unwrap(), None);

        assert!(payload_id("not json").is_err());
    }
}
