use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Retry policy parameters (`[retry]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per run (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Hard cap on failed runs per admission, progress or not.
    #[serde(default = "default_max_total_runs")]
    pub max_total_runs: u32,
}

fn default_max_total_runs() -> u32 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
            max_total_runs: default_max_total_runs(),
        }
    }
}

/// What to do with already-fetched files when a job is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFilesPolicy {
    /// Leave them in place; a later retry can resume from them.
    #[default]
    Keep,
    /// Delete the destination directory.
    Remove,
}

/// Global configuration loaded from `~/.config/hubq/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubqConfig {
    /// Maximum number of jobs downloading at once.
    pub max_concurrent_downloads: usize,
    /// Root for destinations that are not given explicitly. `MODEL_DIR` overrides.
    pub models_dir: PathBuf,
    /// How long a stopped executor may take to let go before it is aborted.
    pub cancel_grace_secs: u64,
    pub partial_files_on_cancel: PartialFilesPolicy,
    /// Per-subscriber event buffer; slower subscribers are resynchronised.
    pub subscriber_buffer: usize,
    /// How often the hub tool's destination is measured for progress.
    pub progress_poll_millis: u64,
    /// Hub download tool (looked up on PATH).
    pub hub_cli: String,
    /// HS256 secret for bearer tokens. `JWT_SECRET` overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    pub retry: RetryConfig,
}

impl Default for HubqConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            models_dir: PathBuf::from("/models"),
            cancel_grace_secs: 10,
            partial_files_on_cancel: PartialFilesPolicy::Keep,
            subscriber_buffer: 256,
            progress_poll_millis: 500,
            hub_cli: "huggingface-cli".to_string(),
            jwt_secret: None,
            retry: RetryConfig::default(),
        }
    }
}

impl HubqConfig {
    /// Apply `MODEL_DIR` / `JWT_SECRET` from the given lookup (normally `std::env::var`).
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MODEL_DIR").filter(|s| !s.trim().is_empty()) {
            self.models_dir = PathBuf::from(dir);
        }
        if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            self.jwt_secret = Some(secret);
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|k| std::env::var(k).ok());
    }

    /// Values that would make the orchestrator misbehave.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_concurrent_downloads >= 1,
            "max_concurrent_downloads must be at least 1"
        );
        anyhow::ensure!(self.subscriber_buffer >= 1, "subscriber_buffer must be at least 1");
        anyhow::ensure!(
            self.progress_poll_millis >= 10,
            "progress_poll_millis must be at least 10"
        );
        anyhow::ensure!(!self.hub_cli.trim().is_empty(), "hub_cli must not be empty");
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("hubq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Control socket used by `hubq serve` and its clients: `~/.local/state/hubq/control.sock`.
pub fn control_socket_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("hubq")?;
    Ok(xdg_dirs.place_state_file("control.sock")?)
}

/// Load configuration from disk, creating a default file if none exists.
/// Environment overrides are applied after reading.
pub fn load_or_init() -> Result<HubqConfig> {
    let path = config_path()?;
    let mut cfg = if !path.exists() {
        let default_cfg = HubqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        default_cfg
    } else {
        let data =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?
    };
    cfg.apply_env();
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = HubqConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 2);
        assert_eq!(cfg.models_dir, PathBuf::from("/models"));
        assert_eq!(cfg.cancel_grace_secs, 10);
        assert_eq!(cfg.partial_files_on_cancel, PartialFilesPolicy::Keep);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut cfg = HubqConfig::default();
        cfg.jwt_secret = Some("s3cret".into());
        cfg.partial_files_on_cancel = PartialFilesPolicy::Remove;
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HubqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml = r#"
            max_concurrent_downloads = 4
            partial_files_on_cancel = "remove"

            [retry]
            max_attempts = 5
            base_delay_secs = 0.5
            max_delay_secs = 15
        "#;
        let cfg: HubqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_downloads, 4);
        assert_eq!(cfg.partial_files_on_cancel, PartialFilesPolicy::Remove);
        assert_eq!(cfg.hub_cli, "huggingface-cli");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!((cfg.retry.base_delay_secs - 0.5).abs() < 1e-9);
        assert_eq!(cfg.retry.max_total_runs, 10);
        assert!(cfg.jwt_secret.is_none());
    }

    #[test]
    fn env_overrides() {
        let mut cfg = HubqConfig::default();
        cfg.apply_env_with(|k| match k {
            "MODEL_DIR" => Some("/srv/models".into()),
            "JWT_SECRET" => Some("from-env".into()),
            _ => None,
        });
        assert_eq!(cfg.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(cfg.jwt_secret.as_deref(), Some("from-env"));

        let mut untouched = HubqConfig::default();
        untouched.apply_env_with(|_| Some(String::new()));
        assert_eq!(untouched, HubqConfig::default());
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = HubqConfig {
            max_concurrent_downloads: 0,
            ..HubqConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
