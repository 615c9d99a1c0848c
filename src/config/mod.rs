use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs::File;
use std::io::prelude::*;
use std::time::Duration;
use thiserror::Error;

use crate::metering_energomera::codec::Checksum;
use crate::metering_energomera::commands::DEFAULT_PASSWORD;
use crate::metering_energomera::session::SessionSettings;
use crate::metering_energomera::structs::{Reading, ReadingKind, Tariff, MAX_PRECISION};
use crate::metering_energomera::transport::DEFAULT_BAUD_RATE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read the config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse the config: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("No config found, tried {0}")]
    NotFound(String),
    #[error("Unknown reading type '{0}'")]
    UnknownReading(String),
    #[error("Reading '{0}' has no tariffs")]
    InvalidTariff(String),
    #[error("Reading '{0}' asks for {1} decimals, at most {max} are supported", max = MAX_PRECISION)]
    InvalidPrecision(String, u32),
}

fn serial_port_default() -> String { return "/dev/ttyUSB0".to_string() }
fn serial_baud_rate_default() -> u32 { return DEFAULT_BAUD_RATE }
fn serial_timeout_ms_default() -> u64 { return 1500 }
fn serial_settle_ms_default() -> u64 { return 300 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SerialConfig {
    #[serde(default="serial_port_default")]
    pub port: String,
    #[serde(default="serial_baud_rate_default")]
    pub baud_rate: u32,
    #[serde(default="serial_timeout_ms_default")]
    pub timeout_ms: u64,
    #[serde(default="serial_settle_ms_default")]
    pub settle_ms: u64,
}

fn meter_name_default() -> String { return "energomera".to_string() }
fn meter_password_default() -> String { return DEFAULT_PASSWORD.to_string() }
fn meter_scan_interval_default() -> u64 { return 60 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MeterConfig {
    #[serde(default="meter_name_default")]
    pub name: String,
    #[serde(default="meter_password_default")]
    pub password: String,
    #[serde(default)]
    pub checksum: Checksum,
    #[serde(default="meter_scan_interval_default")]
    pub scan_interval: u64,          // Seconds between poll cycles
}

fn reading_precision_default() -> u32 { return 2 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ReadingConfig {
    #[serde(rename="type")]
    pub reading_type: String,        // e.g. voltage, total_energy_t1
    #[serde(alias="friendly_name")]
    pub name: Option<String>,
    pub unique_id: Option<String>,   // Home Assistant entity id override
    pub unit_of_measurement: Option<String>,
    #[serde(default="reading_precision_default")]
    pub precision: u32,
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "energomera2mqtt".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

fn serial_default() -> SerialConfig {
    return SerialConfig {
        port: serial_port_default(),
        baud_rate: serial_baud_rate_default(),
        timeout_ms: serial_timeout_ms_default(),
        settle_ms: serial_settle_ms_default(),
    }
}
fn meter_default() -> MeterConfig {
    return MeterConfig {
        name: meter_name_default(),
        password: meter_password_default(),
        checksum: Checksum::default(),
        scan_interval: meter_scan_interval_default(),
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default="serial_default")]
    pub serial: SerialConfig,
    #[serde(default="meter_default")]
    pub meter: MeterConfig,
    pub readings: Vec<ReadingConfig>,
    pub mqtt: MqttConfig,
}

impl Config {
    pub fn session_settings(&self) -> SessionSettings {
        return SessionSettings {
            password: self.meter.password.clone(),
            checksum: self.meter.checksum,
            settle_delay: Duration::from_millis(self.serial.settle_ms),
            read_timeout: Duration::from_millis(self.serial.timeout_ms),
        };
    }

    pub fn scan_interval(&self) -> Duration {
        /* zero would make tokio's interval panic */
        return Duration::from_secs(std::cmp::max(1, self.meter.scan_interval));
    }
}

/// Parsed config plus the readings resolved from it
#[derive(Clone, Debug)]
pub struct ConfigHolder {
    pub config: Config,
    pub readings: Vec<Reading>,
    pub path: String,
}

const CONFIG_CANDIDATES: [&str; 2] = ["config/energomera.yaml", "energomera.yaml"];

impl ConfigHolder {
    /// Explicit path first, then `E2M_CONFIG`, then the usual places
    pub fn load(path: Option<String>) -> Result<Self, ConfigError> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(p) = path {
            candidates.push(p);
        } else if let Ok(p) = std::env::var("E2M_CONFIG") {
            candidates.push(p);
        } else {
            candidates.extend(CONFIG_CANDIDATES.iter().map(|c| c.to_string()));
        }

        for candidate in candidates.iter() {
            let mut file = match File::open(candidate) {
                Ok(f) => f,
                Err(e) => {
                    debug!("Config {} not usable: {}", candidate, e);
                    continue;
                }
            };

            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let mut holder = ConfigHolder::from_yaml(&contents)?;
            holder.path = candidate.clone();
            info!("Config loaded from {} with {} readings", candidate, holder.readings.len());
            return Ok(holder);
        }

        Err(ConfigError::NotFound(candidates.join(", ")))
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        let readings = resolve_readings(&config.readings)?;

        if readings.is_empty() {
            warn!("No readings configured, the meter will not be polled");
        }

        return Ok(ConfigHolder { config, readings, path: "".to_string() });
    }
}

/// Turns the configured type names into typed readings, once
pub fn resolve_readings(configs: &[ReadingConfig]) -> Result<Vec<Reading>, ConfigError> {
    let mut readings = Vec::with_capacity(configs.len());

    for rc in configs {
        let (base, tariff) = if let Some(base) = rc.reading_type.strip_suffix("_t1") {
            (base, Tariff::T1)
        } else if let Some(base) = rc.reading_type.strip_suffix("_t2") {
            (base, Tariff::T2)
        } else {
            (rc.reading_type.as_str(), Tariff::Total)
        };

        let kind = ReadingKind::from_str(base)
            .ok_or(ConfigError::UnknownReading(rc.reading_type.clone()))?;
        if tariff != Tariff::Total && !kind.is_multi_tariff() {
            return Err(ConfigError::InvalidTariff(rc.reading_type.clone()));
        }

        if rc.precision > MAX_PRECISION {
            return Err(ConfigError::InvalidPrecision(rc.reading_type.clone(), rc.precision));
        }

        let mut reading = Reading::new(kind, tariff, rc.precision);
        if let Some(name) = &rc.name {
            reading.name = name.clone();
        }
        if let Some(unit) = &rc.unit_of_measurement {
            reading.unit = unit.clone();
        }
        reading.unique_id = rc.unique_id.clone();
        readings.push(reading);
    }

    return Ok(readings);
}
