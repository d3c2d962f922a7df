//! Config path resolution for binaries

use std::path::PathBuf;

/// Environment variable naming the YAML config file
pub const CONFIG_PATH_ENV: &str = "MAX_CONFIG_PATH";

pub const DEFAULT_CONFIG_PATH: &str = "config/client.yaml";

/// Where the config path came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// First command line argument
    Argument(String),
    /// `MAX_CONFIG_PATH`
    Environment(String),
    Default,
}

impl ConfigSource {
    /// Resolve from the command line first, then the environment
    pub fn detect(args: &[String]) -> Self {
        if let Some(path) = args.first() {
            return ConfigSource::Argument(path.clone());
        }
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => ConfigSource::Environment(path),
            _ => ConfigSource::Default,
        }
    }

    pub fn path(&self) -> PathBuf {
        match self {
            ConfigSource::Argument(path) | ConfigSource::Environment(path) => PathBuf::from(path),
            ConfigSource::Default => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

/// Load `.env` (if present) and resolve the config path
///
/// ```no_run
/// let path = max_client::bin_common::load_config_from_env();
/// assert!(path.to_string_lossy().ends_with(".yaml"));
/// ```
pub fn load_config_from_env() -> PathBuf {
    let _ = dotenv::dotenv();
    ConfigSource::detect(&parse_args()).path()
}

/// Command line arguments, without the program name
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
