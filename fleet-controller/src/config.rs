use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    pub listen_address: String,
    pub data_file: PathBuf,
    pub sync: SyncConf,
    pub remote: RemoteConf,
    pub tokens: TokenConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConf {
    pub interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConf {
    pub url_template: String, // ex: "https://{unit_id}.units.local:9090"
    pub timeout_secs: u64,
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TokenConf {
    pub ttl_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".into(),
            data_file: PathBuf::from("./data/units.json"),
            sync: SyncConf::default(),
            remote: RemoteConf::default(),
            tokens: TokenConf::default(),
        }
    }
}

impl Default for SyncConf {
    fn default() -> Self {
        Self { interval_secs: 60 * 60 }
    }
}

impl Default for RemoteConf {
    fn default() -> Self {
        Self {
            url_template: "https://{unit_id}.units.local".into(),
            timeout_secs: 10,
            accept_invalid_certs: false,
        }
    }
}

impl Default for TokenConf {
    fn default() -> Self {
        Self { ttl_secs: 24 * 60 * 60 }
    }
}

impl SyncConf {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl RemoteConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Plafond de durée de vie d'un token (10 ans)
const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

impl TokenConf {
    /// Borné pour que `issued_at + ttl` reste représentable
    pub fn ttl(&self) -> time::Duration {
        time::Duration::seconds(self.ttl_secs.min(MAX_TOKEN_TTL_SECS) as i64)
    }
}

pub async fn load_config() -> ControllerConfig {
    let path = std::env::var("FLEET_CONTROLLER_CONFIG").unwrap_or_else(|_| "controller.yaml".into());
    let mut cfg = load_config_file(Path::new(&path)).await;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg
}

async fn load_config_file(path: &Path) -> ControllerConfig {
    if !path.exists() {
        warn!(path = %path.display(), "no config file, using defaults");
        return ControllerConfig::default();
    }

    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return ControllerConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid config, using defaults");
        ControllerConfig::default()
    })
}

/// Surcharges par variables d'environnement (après le fichier YAML)
fn apply_env_overrides(cfg: &mut ControllerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = lookup("FLEET_LISTEN_ADDRESS").filter(|v| !v.trim().is_empty()) {
        cfg.listen_address = addr;
    }
    if let Some(raw) = lookup("FLEET_SYNC_INTERVAL_SECS") {
        match raw.parse::<u64>() {
            Ok(secs) => cfg.sync.interval_secs = secs,
            Err(e) => warn!(value = %raw, error = %e, "ignoring FLEET_SYNC_INTERVAL_SECS"),
        }
    }
}
