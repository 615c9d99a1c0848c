pub mod codec;
pub mod commands;
pub mod parser;
pub mod poller;
pub mod session;
pub mod structs;
pub mod transport;
pub mod utils;

use std::time::Duration;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc::Sender};
use tokio::time::MissedTickBehavior;

use crate::config::ConfigHolder;
use crate::get_unix_ts;
use crate::mqtt::ha_interface::{status_topic, HaDiscover, PROTOCOL};
use crate::mqtt::{MeteringData, PublishData, Transmission};
use poller::Poller;
use structs::{DeviceIdentification, PollResult, Reading, Unavailable};
use transport::{SerialTransport, TransportError};

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Checksum mismatch, expected {expected:#04x} got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
    #[error("Malformed frame: {0}")]
    Format(String),
    #[error("Unable to parse response: {0}")]
    Parse(String),
    #[error("Session is not open")]
    SessionNotOpen,
}

/// Drives the poller from the tokio side and forwards results to MQTT
pub struct EnergomeraManager {
    sender: Sender<Transmission>,
    holder: ConfigHolder,
    poller: Option<Poller<SerialTransport>>,
    discovery_sent: bool,
    last_online: Option<bool>,
}

fn build_poller(holder: &ConfigHolder) -> Poller<SerialTransport> {
    let serial = &holder.config.serial;
    let transport = SerialTransport::new(&serial.port, serial.baud_rate, Duration::from_millis(serial.timeout_ms));
    let mut poller = Poller::new(transport, holder.config.session_settings());
    poller.configure(holder.readings.clone());
    return poller;
}

impl EnergomeraManager {
    pub fn new(sender: Sender<Transmission>, holder: ConfigHolder) -> Self {
        let poller = build_poller(&holder);
        return EnergomeraManager {
            sender,
            holder,
            poller: Some(poller),
            discovery_sent: false,
            last_online: None,
        };
    }

    pub async fn start_thread(&mut self, mut shutdown: broadcast::Receiver<()>) {
        let scan_interval = self.holder.config.scan_interval();
        info!("Polling meter {} on {} every {:?}", self.holder.config.meter.name,
              self.holder.config.serial.port, scan_interval);

        let mut interval = tokio::time::interval(scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = shutdown.recv() => {
                    info!("Shutdown requested, stopping meter polling");
                    break;
                }
            }

            self.run_cycle().await;
        }

        if let Some(mut poller) = self.poller.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || poller.shutdown()).await {
                error!("Unable to shut down the poller: {}", e);
            }
        }
        self.publish_status(false).await;
    }

    async fn run_cycle(&mut self) {
        let mut poller = match self.poller.take() {
            Some(p) => p,
            None => build_poller(&self.holder),
        };

        /* one cycle at a time, the poller only comes back when it is done */
        let joined = tokio::task::spawn_blocking(move || {
            let results = poller.poll_cycle();
            (poller, results)
        }).await;

        let (poller, results) = match joined {
            Ok(r) => r,
            Err(e) => {
                error!("Poll cycle aborted: {}, the serial line is reopened next cycle", e);
                return;
            }
        };

        let identification = poller.identification().cloned();
        self.poller = Some(poller);

        if results.is_empty() {
            debug!("Nothing to publish");
            return;
        }

        let meter = self.holder.config.meter.name.clone();
        if self.holder.config.mqtt.ha_enabled && !self.discovery_sent {
            match discovery_for(&meter, identification.as_ref(), &self.holder.readings) {
                Ok(disc) => {
                    let _ = self.sender.send(Transmission::AutoDiscovery(disc)).await;
                    self.discovery_sent = true;
                },
                Err(e) => error!("Unable to build discovery for {}: {}", meter, e),
            }
        }

        let online = session_opened(&results);
        self.publish_status(online).await;

        let now = get_unix_ts();
        let mut data = MeteringData::new(meter, PROTOCOL.to_string());
        data.transmission_time = now;
        data.metered_time = now;
        data.metered_values = metering_values(&results);

        if let Err(e) = self.sender.send(Transmission::Metering(data)).await {
            error!("Unable to hand metering data to MQTT: {}", e);
        }
    }

    async fn publish_status(&mut self, online: bool) {
        if self.last_online == Some(online) {
            return;
        }
        self.last_online = Some(online);

        if !online {
            warn!("Meter {} is offline", self.holder.config.meter.name);
        }

        let _ = self.sender.send(Transmission::Publish(PublishData {
            topic: status_topic(&self.holder.config.meter.name),
            payload: if online { "online" } else { "offline" }.to_string(),
            qos: 1,
            retain: true,
        })).await;
    }
}

/// False when the cycle could not get past the handshake
pub fn session_opened(results: &[PollResult]) -> bool {
    return !results.iter().all(|r| r.outcome == Err(Unavailable::SessionNotOpened));
}

/// State document: one key per reading, `null` when unavailable, plus `errors`
pub fn metering_values(results: &[PollResult]) -> serde_json::Map<String, serde_json::Value> {
    let mut values = serde_json::Map::new();
    let mut errors = serde_json::Map::new();

    /* sub values of a total first, so explicitly configured tariffs win */
    for result in results {
        if let Ok(m) = &result.outcome {
            let key = result.reading.key();
            if let Some(t1) = m.t1 {
                values.insert(format!("{}_t1", key), serde_json::Value::from(t1));
            }
            if let Some(t2) = m.t2 {
                values.insert(format!("{}_t2", key), serde_json::Value::from(t2));
            }
        }
    }

    for result in results {
        let value = match &result.outcome {
            Ok(m) => serde_json::Value::from(m.value),
            Err(reason) => {
                errors.insert(result.reading.name.clone(), serde_json::Value::from(reason.to_string()));
                serde_json::Value::Null
            }
        };
        values.insert(result.reading.key(), value);
    }

    values.insert("errors".to_string(), serde_json::Value::Object(errors));
    return values;
}

pub fn discovery_for(meter: &str, identification: Option<&DeviceIdentification>, readings: &[Reading]) -> Result<HaDiscover, serde_json::Error> {
    let (manu, model) = match identification {
        Some(ident) => (ident.manufacturer.clone(), ident.identification.clone()),
        None => ("Energomera".to_string(), "CE".to_string()),
    };

    let mut disc = HaDiscover::new(meter.to_string(), manu, model);
    disc.add_readings(readings)?;
    return Ok(disc);
}
