use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};
use crate::time::parse_duration_str;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub allow_insecure_endpoint: bool,
    pub max_store_bytes: u64,
    pub truncation_checkpoint: u64,
    pub truncation_check_interval: Duration,
    pub batch_size: usize,
    pub max_payload_bytes: usize,
    pub max_bandwidth_kib: f64,
    pub bandwidth_window: Duration,
    pub bandwidth_max_samples: usize,
    pub idle_delay: Duration,
    pub throttle_delay: Duration,
    pub burst_delay: Duration,
    pub upload_timeout: Duration,
    pub compression: Compression,
    pub max_attribute_length: usize,
    pub component_span_limit: usize,
    pub component_limit_period: Duration,
    pub session_sample_ratio: f64,
    pub session_max_age: Duration,
    pub session_inactivity: Duration,
    pub ingest_http_addr: String,
    pub write_batch_size: usize,
    pub write_flush_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

impl FromStr for Compression {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(BeaconError::Config(format!(
                "unknown compression {other}, expected none or gzip"
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("beacon/spans.duckdb"),
            endpoint: None,
            auth_token: None,
            allow_insecure_endpoint: false,
            max_store_bytes: 25 * 1024 * 1024,
            truncation_checkpoint: 512,
            truncation_check_interval: Duration::from_secs(60),
            batch_size: 64,
            max_payload_bytes: 512 * 1024,
            max_bandwidth_kib: 15.0,
            bandwidth_window: Duration::from_secs(30),
            bandwidth_max_samples: 60,
            idle_delay: Duration::from_millis(5_000),
            throttle_delay: Duration::from_millis(1_000),
            burst_delay: Duration::from_millis(50),
            upload_timeout: Duration::from_secs(10),
            compression: Compression::None,
            max_attribute_length: 4096,
            component_span_limit: 100,
            component_limit_period: Duration::from_secs(30),
            session_sample_ratio: 1.0,
            session_max_age: Duration::from_secs(4 * 60 * 60),
            session_inactivity: Duration::from_secs(15 * 60),
            ingest_http_addr: "127.0.0.1:4380".to_string(),
            write_batch_size: 256,
            write_flush_ms: 200,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BeaconError::Config("batch_size must be > 0".to_string()));
        }
        if self.max_payload_bytes == 0 {
            return Err(BeaconError::Config(
                "max_payload_bytes must be > 0".to_string(),
            ));
        }
        if self.max_attribute_length == 0 {
            return Err(BeaconError::Config(
                "max_attribute_length must be > 0".to_string(),
            ));
        }
        if self.truncation_checkpoint == 0 {
            return Err(BeaconError::Config(
                "truncation_checkpoint must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.session_sample_ratio) {
            return Err(BeaconError::Config(format!(
                "session_sample_ratio must be within [0, 1], got {}",
                self.session_sample_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    endpoint: Option<String>,
    auth_token: Option<String>,
    allow_insecure_endpoint: Option<bool>,
    max_store_bytes: Option<u64>,
    truncation_checkpoint: Option<u64>,
    truncation_check_interval: Option<String>,
    batch_size: Option<usize>,
    max_payload_bytes: Option<usize>,
    max_bandwidth_kib: Option<f64>,
    bandwidth_window: Option<String>,
    bandwidth_max_samples: Option<usize>,
    idle_delay: Option<String>,
    throttle_delay: Option<String>,
    burst_delay: Option<String>,
    upload_timeout: Option<String>,
    compression: Option<String>,
    max_attribute_length: Option<usize>,
    component_span_limit: Option<usize>,
    component_limit_period: Option<String>,
    session_sample_ratio: Option<f64>,
    session_max_age: Option<String>,
    session_inactivity: Option<String>,
    ingest_http_addr: Option<String>,
    write_batch_size: Option<usize>,
    write_flush_ms: Option<u64>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("BEACON_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("beacon/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| BeaconError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| BeaconError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| BeaconError::Config(format!("bad {key} in environment: {e}"))),
        None => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    overrides_from_vars(|key| env::var(key).ok())
}

fn overrides_from_vars(var: impl Fn(&str) -> Option<String>) -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: var("BEACON_DB_PATH").map(PathBuf::from),
        endpoint: var("BEACON_ENDPOINT"),
        auth_token: var("BEACON_AUTH_TOKEN"),
        allow_insecure_endpoint: env_parsed(&var, "BEACON_ALLOW_INSECURE_ENDPOINT")?,
        max_store_bytes: env_parsed(&var, "BEACON_MAX_STORE_BYTES")?,
        truncation_checkpoint: env_parsed(&var, "BEACON_TRUNCATION_CHECKPOINT")?,
        truncation_check_interval: var("BEACON_TRUNCATION_CHECK_INTERVAL"),
        batch_size: env_parsed(&var, "BEACON_BATCH_SIZE")?,
        max_payload_bytes: env_parsed(&var, "BEACON_MAX_PAYLOAD_BYTES")?,
        max_bandwidth_kib: env_parsed(&var, "BEACON_MAX_BANDWIDTH_KIB")?,
        bandwidth_window: var("BEACON_BANDWIDTH_WINDOW"),
        bandwidth_max_samples: env_parsed(&var, "BEACON_BANDWIDTH_MAX_SAMPLES")?,
        idle_delay: var("BEACON_IDLE_DELAY"),
        throttle_delay: var("BEACON_THROTTLE_DELAY"),
        burst_delay: var("BEACON_BURST_DELAY"),
        upload_timeout: var("BEACON_UPLOAD_TIMEOUT"),
        compression: var("BEACON_COMPRESSION"),
        max_attribute_length: env_parsed(&var, "BEACON_MAX_ATTRIBUTE_LENGTH")?,
        component_span_limit: env_parsed(&var, "BEACON_COMPONENT_SPAN_LIMIT")?,
        component_limit_period: var("BEACON_COMPONENT_LIMIT_PERIOD"),
        session_sample_ratio: env_parsed(&var, "BEACON_SESSION_SAMPLE_RATIO")?,
        session_max_age: var("BEACON_SESSION_MAX_AGE"),
        session_inactivity: var("BEACON_SESSION_INACTIVITY"),
        ingest_http_addr: var("BEACON_INGEST_HTTP_ADDR"),
        write_batch_size: env_parsed(&var, "BEACON_WRITE_BATCH_SIZE")?,
        write_flush_ms: env_parsed(&var, "BEACON_WRITE_FLUSH_MS")?,
    })
}

fn parse_duration_field(v: &str, field: &str, source: &str) -> Result<Duration> {
    parse_duration_str(v).map_err(|e| BeaconError::Config(format!("bad {field} in {source}: {e}")))
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.endpoint {
        cfg.endpoint = Some(v);
    }
    if let Some(v) = overrides.auth_token {
        cfg.auth_token = Some(v);
    }
    if let Some(v) = overrides.allow_insecure_endpoint {
        cfg.allow_insecure_endpoint = v;
    }
    if let Some(v) = overrides.max_store_bytes {
        cfg.max_store_bytes = v;
    }
    if let Some(v) = overrides.truncation_checkpoint {
        cfg.truncation_checkpoint = v;
    }
    if let Some(v) = overrides.truncation_check_interval {
        cfg.truncation_check_interval =
            parse_duration_field(&v, "truncation_check_interval", source)?;
    }
    if let Some(v) = overrides.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = overrides.max_payload_bytes {
        cfg.max_payload_bytes = v;
    }
    if let Some(v) = overrides.max_bandwidth_kib {
        cfg.max_bandwidth_kib = v;
    }
    if let Some(v) = overrides.bandwidth_window {
        cfg.bandwidth_window = parse_duration_field(&v, "bandwidth_window", source)?;
    }
    if let Some(v) = overrides.bandwidth_max_samples {
        cfg.bandwidth_max_samples = v;
    }
    if let Some(v) = overrides.idle_delay {
        cfg.idle_delay = parse_duration_field(&v, "idle_delay", source)?;
    }
    if let Some(v) = overrides.throttle_delay {
        cfg.throttle_delay = parse_duration_field(&v, "throttle_delay", source)?;
    }
    if let Some(v) = overrides.burst_delay {
        cfg.burst_delay = parse_duration_field(&v, "burst_delay", source)?;
    }
    if let Some(v) = overrides.upload_timeout {
        cfg.upload_timeout = parse_duration_field(&v, "upload_timeout", source)?;
    }
    if let Some(v) = overrides.compression {
        cfg.compression = v.parse().map_err(|e| {
            BeaconError::Config(format!("bad compression in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.max_attribute_length {
        cfg.max_attribute_length = v;
    }
    if let Some(v) = overrides.component_span_limit {
        cfg.component_span_limit = v;
    }
    if let Some(v) = overrides.component_limit_period {
        cfg.component_limit_period = parse_duration_field(&v, "component_limit_period", source)?;
    }
    if let Some(v) = overrides.session_sample_ratio {
        cfg.session_sample_ratio = v;
    }
    if let Some(v) = overrides.session_max_age {
        cfg.session_max_age = parse_duration_field(&v, "session_max_age", source)?;
    }
    if let Some(v) = overrides.session_inactivity {
        cfg.session_inactivity = parse_duration_field(&v, "session_inactivity", source)?;
    }
    if let Some(v) = overrides.ingest_http_addr {
        cfg.ingest_http_addr = v;
    }
    if let Some(v) = overrides.write_batch_size {
        cfg.write_batch_size = v;
    }
    if let Some(v) = overrides.write_flush_ms {
        cfg.write_flush_ms = v;
    }
    Ok(())
}
