//! Redis key layout. Each logical queue is four keys sharing one hash-tagged
//! base name so that scripts can address all of them on a single cluster slot.

use anyhow::{Result, bail};

use crate::constants::{DELAYED_SUFFIX, NOTIFY_SUFFIX, QUEUE_KEY_PREFIX, RESERVED_SUFFIX};

/// Formats the ready-list key for a bare queue name, e.g. `queues:{mail}`.
///
/// Names containing hash-tag braces are rejected: they would change which
/// part of the key is hashed and could split a queue's keys across slots.
pub fn queue_key(name: &str) -> Result<String> {
    if name.contains('{') || name.contains('}') {
        bail!("queue name '{name}' must not contain '{{' or '}}'");
    }
    Ok(format!("{QUEUE_KEY_PREFIX}{{{name}}}"))
}

#[must_use]
pub fn delayed_key(queue_key: &str) -> String {
    format!("{queue_key}{DELAYED_SUFFIX}")
}

#[must_use]
pub fn reserved_key(queue_key: &str) -> String {
    format!("{queue_key}{RESERVED_SUFFIX}")
}

#[must_use]
pub fn notify_key(queue_key: &str) -> String {
    format!("{queue_key}{NOTIFY_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_key_hash_tags_the_name() {
        assert_eq!(queue_key("default").unwrap(), "queues:{default}");
        assert_eq!(queue_key("mail-ingest").unwrap(), "queues:{mail-ingest}");
    }

    #[test]
    fn queue_key_rejects_brace_names() {
        assert!(queue_key("bad{name").is_err());
        assert!(queue_key("bad}name").is_err());
    }

    #[test]
    fn derived_keys_share_the_base() {
        let base = queue_key("default").unwrap();
        assert_eq!(delayed_key(&base), "queues:{default}:delayed");
        assert_eq!(reserved_key(&base), "queues:{default}:reserved");
        assert_eq!(notify_key(&base), "queues:{default}:notify");
    }
}
