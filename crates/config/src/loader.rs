use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::{substitute_env, substitute_env_with},
    schema::ShredderConfig,
};

/// Standard config file names, checked in order.
pub const CONFIG_FILENAMES: &[&str] = &[
    "shredder.toml",
    "shredder.yaml",
    "shredder.yml",
    "shredder.json",
];

/// Env var overriding `transit.token`.
pub const ENV_TRANSIT_TOKEN: &str = "SHREDDER_TRANSIT_TOKEN";
/// Env var overriding `transit.url`.
pub const ENV_TRANSIT_URL: &str = "SHREDDER_TRANSIT_URL";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ShredderConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./shredder.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/shredder/shredder.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `ShredderConfig::default()` (with env overrides applied) if
/// no config file is found or it fails to load.
pub fn discover_and_load() -> ShredderConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = ShredderConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/shredder/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "shredder").map(|d| d.config_dir().to_path_buf())
}

/// Override transit settings from `SHREDDER_TRANSIT_*` env vars.
pub fn apply_env_overrides(config: &mut ShredderConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut ShredderConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup(ENV_TRANSIT_TOKEN).filter(|t| !t.is_empty()) {
        debug!(var = ENV_TRANSIT_TOKEN, "transit token overridden from env");
        config.transit.token = Some(Secret::new(token));
    }
    if let Some(url) = lookup(ENV_TRANSIT_URL).filter(|u| !u.is_empty()) {
        debug!(var = ENV_TRANSIT_URL, %url, "transit url overridden from env");
        config.transit.url = Some(url);
    }
}

/// Parse config text in the format implied by `path`'s extension, after
/// `${ENV}` substitution through `lookup`.
pub fn parse_config_with(
    raw: &str,
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ShredderConfig> {
    let raw = substitute_env_with(raw, &lookup);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides_with(&mut config, lookup);
    Ok(config)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ShredderConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
