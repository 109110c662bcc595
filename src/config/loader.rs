use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::types::Config;

/// Name of the optional per-repository config file.
pub const CONFIG_FILE: &str = ".devstack.yml";

/// Environment variable naming the repository root.
pub const ROOT_ENV: &str = "REPOSITORY_ROOT";

/// Environment variable carrying extra seed-loader arguments.
pub const LOADDATA_ARGS_ENV: &str = "LOADDATA_ARGS";

/// Load config from `path`, or from `.devstack.yml` in `root` when no path is
/// given. A missing default file yields the built-in defaults; a missing
/// explicit file is an error.
pub fn load(root: &Path, path: Option<&Path>) -> Result<Config> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (root.join(CONFIG_FILE), false),
    };

    if !path.exists() {
        if required {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    // An empty file deserializes to unit, not a mapping.
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}

/// Apply environment overrides on top of a loaded config.
pub fn apply_env(mut config: Config, loaddata_args: Option<String>) -> Config {
    if let Some(args) = loaddata_args {
        config.demo.loaddata_args = args;
    }
    config
}

/// Resolve the repository root: explicit value, then `REPOSITORY_ROOT`
/// (handled by clap's `env`), then the current directory.
pub fn resolve_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("failed to determine current directory"),
    }
}
