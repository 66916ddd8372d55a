use anyhow::{Context, anyhow};
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a config document (JSON, TOML, YAML, ... by extension) from `path`.
pub fn load_cfg<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(anyhow!("config file {} does not exist", path.display()));
    }

    Config::builder()
        .add_source(File::from(path))
        .build()
        .with_context(|| format!("failed to read config from {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))
}

/// Layer several config files and then environment variables on top.
///
/// Missing files are skipped. Environment keys use `__` as the nesting
/// separator, e.g. `STEPRT__BASERATE=0.001` with prefix `STEPRT`.
pub fn load_cfg_merge<T, P>(
    paths: impl IntoIterator<Item = P>,
    env_prefix: Option<&str>,
) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut builder = Config::builder();

    for p in paths {
        let path = p.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            tracing::warn!("config loading: file {} does not exist", path.display());
        }
    }

    builder = match env_prefix {
        Some(prefix) => builder.add_source(Environment::with_prefix(prefix).separator("__")),
        None => builder.add_source(Environment::default().separator("__")),
    };

    builder
        .build()
        .context("failed to build configuration from provided sources")?
        .try_deserialize()
        .context("failed to deserialize merged configuration")
}
