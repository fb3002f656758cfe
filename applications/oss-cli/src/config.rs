//! CLI configuration loading
use anyhow::Context;
use oss_client::ClientConfig;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "oss.toml";

/// Load client configuration from file and environment.
///
/// Sources, later ones winning: built-in defaults, the config file
/// (`path`, or `./oss.toml` if it exists), then `OSS_`-prefixed environment
/// variables such as `OSS_BASE_URL` or `OSS_PART_CONCURRENCY`.
pub fn load(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let mut settings = config::Config::builder();

    match path {
        Some(path) => {
            settings = settings.add_source(config::File::from(path.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                settings = settings.add_source(config::File::from(default_path));
            }
        }
    }

    settings = settings.add_source(config::Environment::with_prefix("OSS").try_parsing(true));

    let config = settings.build().context("Failed to read configuration")?;
    config
        .try_deserialize()
        .context("Invalid configuration")
}
