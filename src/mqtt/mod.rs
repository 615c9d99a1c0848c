pub mod ha_interface;

use crate::config::MqttConfig;
use crate::mqtt::ha_interface::{state_topic, HaDiscover};
use log::{debug, error, info};
use tokio::sync::mpsc::{Receiver, Sender};
use serde::{Serialize, Deserialize};
use serde_json;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MeteringData {
    pub id: String,
    pub meter_name: String,
    pub protocol: String,
    pub transmission_time: u64,
    pub metered_time: u64,
    pub metered_values: serde_json::Map<String, serde_json::Value>
}

impl MeteringData {
    pub fn new(meter_name: String, protocol: String) -> Self {
        return MeteringData {
            id: format!("{}-{}", protocol, meter_name),
            meter_name,
            protocol,
            transmission_time: 0,
            metered_time: 0,
            metered_values: serde_json::Map::new()
        };
    }
}

#[derive(Debug, Clone)]
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Metering(MeteringData),
    AutoDiscovery(HaDiscover),
    Publish(PublishData)
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

impl MqttManager {
    /// `last_will` is published as `offline` by the broker when we vanish
    pub fn new(config: &MqttConfig, last_will: String) -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }
        mqttoptions.set_last_will(LastWill::new(last_will, "offline", QoS::AtLeastOnce, true));

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to the MQTT broker");
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return (MqttManager {
            client: client,
            rx: mrx,
            exit_thread: false,
        }, mtx);
    }

    pub async fn start_thread(&mut self) {

        // Handle all the incomming metering stuff
        while !self.exit_thread {
            let transmission = match self.rx.recv().await {
                Some(t) => t,
                None => {
                    debug!("All senders are gone, we exit now");
                    self.exit_thread = true;
                    continue;
                }
            };

            match transmission {
                Transmission::Metering(data) => {
                    info!("Metering data received: {}", data.id);
                    let payload = match serde_json::to_string(&data.metered_values) {
                        Ok(p) => p,
                        Err(e) => { error!("Unable to serialize metering data: {}", e); continue; }
                    };
                    match self.client.publish(state_topic(&data.meter_name), QoS::AtLeastOnce, false, payload).await {
                        Err(e) => { error!("Error sending: {}", e); },
                        Ok(_) => { debug!("Send successfully"); }
                    }
                },
                Transmission::AutoDiscovery(disc) => {
                    let payload = match serde_json::to_string(&disc) {
                        Ok(p) => p,
                        Err(e) => { error!("Unable to serialize discovery for {}: {}", disc.get_dev_id(), e); continue; }
                    };
                    info!("Registering {} with Home Assistant", disc.get_dev_id());
                    if let Err(e) = self.client.publish(disc.discover_topic.clone(), QoS::AtLeastOnce, true, payload).await {
                        error!("Error publishing discovery: {}", e);
                    }
                },
                Transmission::Publish(publish_data) => {
                    match self.client.publish(
                        publish_data.topic,
                        qos_from(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await {
                        Err(e) => { error!("Error publishing: {}", e); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
            };
        }

        info!("MQTT thread exit");
        let _ = self.client.disconnect().await;
    }
}
