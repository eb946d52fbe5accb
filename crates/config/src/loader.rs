use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RotaConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["rota.toml", "rota.yaml", "rota.yml", "rota.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RotaConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&substitute_env(&raw), path)
}

/// Parse already-substituted config text; the format comes from `path`'s
/// extension and defaults to TOML.
pub fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RotaConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./rota.{toml,yaml,yml,json}`
/// 2. `~/.config/rota/rota.{toml,yaml,yml,json}`
///
/// Returns `RotaConfig::default()` if nothing is found or the file is broken.
pub fn discover_and_load() -> RotaConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return RotaConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            RotaConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));

    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/rota/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "rota").map(|d| d.config_dir().to_path_buf())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::StoreBackend};

    #[test]
    fn loads_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rota.yaml");
        std::fs::write(
            &path,
            "scheduler:\n  retry_pause_ms: 250\nstore:\n  backend: sqlite\n  database_url: sqlite://x.db\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.scheduler.retry_pause_ms, 250);
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn loads_json_by_extension() {
        let cfg = parse_config(
            r#"{"scheduler": {"backoff_cap_ms": 5000}}"#,
            Path::new("rota.json"),
        )
        .unwrap();
        assert_eq!(cfg.scheduler.backoff_cap_ms, 5000);
        assert_eq!(cfg.scheduler.backoff_step_ms, 1000);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse_config("", Path::new("rota.ini")).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.toml")).is_err());
    }
}
