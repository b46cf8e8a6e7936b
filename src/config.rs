use std::{fs, path::Path, time::Duration};

use once_cell::sync::Lazy;
use rand::{Rng, distr::Alphanumeric, rng};
use serde::{Deserialize, Serialize};

// --- ADMISSION CONFIG ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: u32,
    #[serde(default = "default_key_capacity")]
    pub key_capacity: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: default_rate_window_secs(),
            rate_limit: default_rate_limit(),
            max_in_flight: default_max_in_flight(),
            key_capacity: default_key_capacity(),
        }
    }
}

impl AdmissionConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialAdmissionConfig {
    pub rate_window_secs: Option<u64>,
    pub rate_limit: Option<u32>,
    pub max_in_flight: Option<u32>,
    pub key_capacity: Option<usize>,
}

impl PartialAdmissionConfig {
    fn merge_into(self, final_config: &mut AdmissionConfig) {
        if let Some(rate_window_secs) = self.rate_window_secs {
            final_config.rate_window_secs = rate_window_secs;
        }
        if let Some(rate_limit) = self.rate_limit {
            final_config.rate_limit = rate_limit;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            final_config.max_in_flight = max_in_flight;
        }
        if let Some(key_capacity) = self.key_capacity {
            final_config.key_capacity = key_capacity;
        }
    }
}

// --- MOMENTUM CONFIG ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "default_momentum_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_momentum_sweep_secs")]
    pub sweep_secs: u64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_momentum_ttl_secs(),
            sweep_secs: default_momentum_sweep_secs(),
        }
    }
}

impl MomentumConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialMomentumConfig {
    pub ttl_secs: Option<u64>,
    pub sweep_secs: Option<u64>,
}

impl PartialMomentumConfig {
    fn merge_into(self, final_config: &mut MomentumConfig) {
        if let Some(ttl_secs) = self.ttl_secs {
            final_config.ttl_secs = ttl_secs;
        }
        if let Some(sweep_secs) = self.sweep_secs {
            final_config.sweep_secs = sweep_secs;
        }
    }
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_rate_limit() -> u32 {
    60
}

fn default_max_in_flight() -> u32 {
    10
}

fn default_key_capacity() -> usize {
    50_000
}

fn default_momentum_ttl_secs() -> u64 {
    1800
}

fn default_momentum_sweep_secs() -> u64 {
    60
}

// Used for deserializing user-provided config files where all fields are
// optional.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_path: Option<String>,
    pub secret_key: Option<String>,
    pub proxy: Option<String>,
    pub log_level: Option<String>,
    pub upstream_timeout_secs: Option<u64>,
    pub admission: Option<PartialAdmissionConfig>,
    pub momentum: Option<PartialMomentumConfig>,
}

impl PartialConfig {
    /// Merges the fields of this partial config into a final config,
    /// overwriting existing values.
    fn merge_into(self, final_config: &mut FinalConfig) {
        if let Some(host) = self.host {
            final_config.host = host;
        }
        if let Some(port) = self.port {
            final_config.port = port;
        }
        if let Some(base_path) = self.base_path {
            final_config.base_path = base_path;
        }
        if let Some(secret_key) = self.secret_key {
            final_config.secret_key = secret_key;
        }
        if let Some(proxy) = self.proxy {
            final_config.proxy = Some(proxy);
        }
        if let Some(log_level) = self.log_level {
            final_config.log_level = log_level;
        }
        if let Some(upstream_timeout_secs) = self.upstream_timeout_secs {
            final_config.upstream_timeout_secs = upstream_timeout_secs;
        }
        if let Some(admission) = self.admission {
            admission.merge_into(&mut final_config.admission);
        }
        if let Some(momentum) = self.momentum {
            momentum.merge_into(&mut final_config.momentum);
        }
    }
}

// The fully resolved configuration used by the application.
#[derive(Debug, Deserialize, Serialize)]
pub struct FinalConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    /// Vault secret the provider credentials are sealed under. Generated at
    /// boot when not configured, which makes stored credentials ephemeral;
    /// set it explicitly for anything beyond local use.
    pub secret_key: String,
    pub proxy: Option<String>,
    pub log_level: String,
    pub upstream_timeout_secs: u64,
    pub admission: AdmissionConfig,
    pub momentum: MomentumConfig,
}

impl FinalConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn generate_random_string(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn get_config_from_env() -> PartialConfig {
    PartialConfig {
        host: get_env_var("HOST"),
        port: get_env_var("PORT"),
        base_path: get_env_var("BASE_PATH"),
        secret_key: get_env_var("SECRET_KEY"),
        proxy: get_env_var("PROXY"),
        log_level: get_env_var("LOG_LEVEL"),
        upstream_timeout_secs: get_env_var("UPSTREAM_TIMEOUT_SECS"),
        admission: None,
        momentum: None,
    }
}

fn load_config() -> FinalConfig {
    let mut final_config = FinalConfig {
        host: "0.0.0.0".to_string(),
        port: 8000,
        base_path: "/router".to_string(),
        secret_key: generate_random_string(48),
        proxy: None,
        log_level: "info".to_string(),
        upstream_timeout_secs: 120,
        admission: AdmissionConfig::default(),
        momentum: MomentumConfig::default(),
    };

    // The user config is optional and overrides the defaults.
    let user_config_path = Path::new("config.yaml");
    if user_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(user_config_path) {
            let user_config: PartialConfig =
                serde_yaml::from_str(&config_str).unwrap_or_else(|e| {
                    panic!(
                        "Failed to parse configuration file at {:?}: {}",
                        user_config_path, e
                    )
                });
            user_config.merge_into(&mut final_config);
        }
    }

    // Environment variables have the highest priority.
    get_config_from_env().merge_into(&mut final_config);

    final_config
}

pub static CONFIG: Lazy<FinalConfig> = Lazy::new(load_config);
