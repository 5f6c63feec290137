use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::BeaconConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["beacon.toml", "beacon.yaml", "beacon.yml", "beacon.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory — project-local and user-global paths are skipped. Tests call
/// this for isolation; each call replaces the previous override.
pub fn set_config_dir(path: PathBuf) {
    *lock_override() = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *lock_override() = None;
}

fn lock_override() -> std::sync::MutexGuard<'static, Option<PathBuf>> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<BeaconConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./beacon.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/beacon/beacon.{toml,yaml,yml,json}` (user-global)
///
/// Returns `BeaconConfig::default()` if no config file is found or the file
/// fails to parse; startup never aborts on config problems.
pub fn discover_and_load() -> BeaconConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return BeaconConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            BeaconConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = lock_override().clone() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
        // Override is set — don't fall through to other locations.
        return None;
    }

    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/beacon/
    if let Some(dir) = home_dir().map(|h| h.join(".config").join("beacon")) {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the config directory: override, or `~/.config/beacon/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = lock_override().clone() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("beacon"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<BeaconConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
