//! Energomera CE-series meter gateway
//!
//! Reads an Energomera electricity meter over IEC-61107 programming mode on a
//! serial line and publishes the readings to MQTT with Home Assistant discovery.

pub mod config;
pub mod metering_energomera;
pub mod mqtt;

// Re-export common types for easier access
pub use config::ConfigHolder;
pub use metering_energomera::EnergomeraManager;
pub use mqtt::{MeteringData, MqttManager};

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
}
