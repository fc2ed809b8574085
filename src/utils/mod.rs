pub mod config;
pub mod credentials;
pub mod logger;
pub mod settings_toml;

pub use config::*;
pub use credentials::{
    CredentialRefresher, Credentials, EnvCredentials, Session, StaticCredentials,
};
pub use logger::setup_logging;
pub use settings_toml::{ConfigError, SettingsToml, apply_file_to_opts, load_settings_toml};
