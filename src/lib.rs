pub mod broker;
pub mod config;
pub mod constants;
pub mod keys;
pub mod payload;
pub mod scripts;
pub mod settings;
pub mod test_support;
pub mod time;

pub use broker::{BulkJob, QueueBroker, ReservedJob};
pub use config::{load_toml_settings, resolve_config_source};
pub use settings::RdqSettings;
pub use time::{Clock, Delay};
