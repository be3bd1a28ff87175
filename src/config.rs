use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::settings::RdqSettings;

pub const DEFAULT_CONFIG_FILENAME: &str = "rdq.toml";
pub const ENV_CONFIG_KEY: &str = "RDQ_CONFIG";

pub fn resolve_config_source(config_path: Option<&str>) -> (Option<String>, String) {
    if let Some(path) = config_path {
        return (Some(path.to_string()), "--config parameter".to_string());
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_KEY)
        && !env_path.is_empty()
    {
        return (Some(env_path), format!("{ENV_CONFIG_KEY} env var"));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
    if default_path.is_file() {
        return (
            Some(default_path.to_string_lossy().to_string()),
            format!("{DEFAULT_CONFIG_FILENAME} in cwd"),
        );
    }

    (None, "not found".to_string())
}

/// Loads settings from TOML with env-var overrides layered on top. A missing
/// config file is not an error; the defaults then apply.
pub fn load_toml_settings(config_path: Option<&str>) -> Result<RdqSettings> {
    dotenvy::dotenv().ok();

    let (path, _) = resolve_config_source(config_path);
    let base = match path {
        Some(path) => {
            let payload = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {path}"))?;
            let toml_value: toml::Value = toml::from_str(&payload)
                .with_context(|| format!("failed to parse TOML at {path}"))?;
            let json_value =
                serde_json::to_value(toml_value).context("failed to convert TOML to JSON")?;
            normalize_toml_payload(json_value)?
        }
        None => Value::Object(Map::new()),
    };

    let merged = deep_merge(base, env_overrides()?);
    let settings: RdqSettings = serde_json::from_value(merged).context("invalid rdq config")?;
    Ok(settings)
}

fn normalize_toml_payload(mut payload: Value) -> Result<Value> {
    if let Value::Object(mut map) = payload {
        if let Some(rdq_value) = map.remove("rdq") {
            payload = rdq_value;
        } else {
            payload = Value::Object(map);
        }
    }

    match payload {
        Value::Object(_) => Ok(payload),
        _ => Err(anyhow::anyhow!("rdq config must be a TOML table")),
    }
}

fn env_overrides() -> Result<Value> {
    let mut payload = Map::new();

    set_env_string(&mut payload, "redis_dsn", "RDQ_REDIS_DSN");
    set_env_string(&mut payload, "connection_name", "RDQ_CONNECTION_NAME");
    set_env_string(&mut payload, "default_queue_name", "RDQ_DEFAULT_QUEUE_NAME");
    set_env_int(
        &mut payload,
        "retry_after_seconds",
        "RDQ_RETRY_AFTER_SECONDS",
    )?;
    set_env_int(&mut payload, "block_for_seconds", "RDQ_BLOCK_FOR_SECONDS")?;
    set_env_int(
        &mut payload,
        "migration_batch_size",
        "RDQ_MIGRATION_BATCH_SIZE",
    )?;
    set_env_bool(
        &mut payload,
        "dispatch_after_commit",
        "RDQ_DISPATCH_AFTER_COMMIT",
    )?;
    set_env_bool(&mut payload, "cluster", "RDQ_CLUSTER")?;

    Ok(Value::Object(payload))
}

fn set_env_string(map: &mut Map<String, Value>, key: &str, env: &str) {
    if let Ok(value) = std::env::var(env)
        && !value.is_empty()
    {
        map.insert(key.to_string(), Value::String(value));
    }
}

fn set_env_int(map: &mut Map<String, Value>, key: &str, env: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return Ok(());
        }
        let parsed: i64 = value
            .parse()
            .with_context(|| format!("Invalid {env} value: {value}"))?;
        map.insert(key.to_string(), Value::Number(parsed.into()));
    }
    Ok(())
}

fn set_env_bool(map: &mut Map<String, Value>, key: &str, env: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return Ok(());
        }
        let parsed = match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => return Err(anyhow::anyhow!("Invalid {env} value: {value}")),
        };
        map.insert(key.to_string(), Value::Bool(parsed));
    }
    Ok(())
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let entry = base_map.remove(&key);
                let merged = match entry {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay_value) => overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Mutex, OnceLock};
    use uuid::Uuid;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        prev: Vec<(&'static str, Option<String>)>,
    }

    #[allow(unsafe_code)] // env var manipulation in tests
    impl EnvGuard {
        fn set_many(pairs: &[(&'static str, &str)]) -> Self {
            let lock = env_lock().lock().unwrap();
            let mut prev = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                prev.push((*key, std::env::var(key).ok()));
                unsafe {
                    std::env::set_var(key, value);
                }
            }
            Self { _lock: lock, prev }
        }
    }

    #[allow(unsafe_code)] // env var manipulation in tests
    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, prev) in self.prev.drain(..) {
                if let Some(value) = prev {
                    unsafe {
                        std::env::set_var(key, value);
                    }
                } else {
                    unsafe {
                        std::env::remove_var(key);
                    }
                }
            }
        }
    }

    #[test]
    fn resolve_config_source_prefers_explicit_path() {
        let (path, source) = resolve_config_source(Some("custom.toml"));
        assert_eq!(path, Some("custom.toml".to_string()));
        assert!(source.contains("--config"));
    }

    #[test]
    fn load_toml_settings_merges_env_over_file() {
        let tmp_path = std::env::temp_dir().join(format!("rdq-test-{}.toml", Uuid::new_v4()));
        let payload = r#"
[rdq]
default_queue_name = "from_toml"
retry_after_seconds = 30
"#;
        fs::write(&tmp_path, payload).unwrap();
        let _guard = EnvGuard::set_many(&[
            ("RDQ_DEFAULT_QUEUE_NAME", "from_env"),
            ("RDQ_RETRY_AFTER_SECONDS", ""),
            ("RDQ_BLOCK_FOR_SECONDS", "5"),
            ("RDQ_CLUSTER", "true"),
        ]);
        let settings = load_toml_settings(Some(tmp_path.to_str().unwrap())).unwrap();
        assert_eq!(settings.default_queue_name, "from_env");
        assert_eq!(settings.retry_after_seconds, 30);
        assert_eq!(settings.block_for_seconds, 5);
        assert!(settings.cluster);
        let _ = fs::remove_file(&tmp_path);
    }

    #[test]
    fn load_toml_settings_defaults_without_a_file() {
        let _guard = EnvGuard::set_many(&[
            ("RDQ_CONFIG", ""),
            ("RDQ_DEFAULT_QUEUE_NAME", ""),
            ("RDQ_RETRY_AFTER_SECONDS", ""),
        ]);
        let settings = load_toml_settings(None).unwrap();
        assert_eq!(settings.default_queue_name, "default");
        assert_eq!(settings.retry_after_seconds, 60);
    }

    #[test]
    fn load_toml_settings_rejects_bad_env_values() {
        let _guard = EnvGuard::set_many(&[("RDQ_CONFIG", ""), ("RDQ_RETRY_AFTER_SECONDS", "soon")]);
        assert!(load_toml_settings(None).is_err());
    }
}
