use serde::Serialize;
use crate::metering_energomera::structs::Reading;

pub const PROTOCOL: &str = "energomera";

#[derive(Serialize, Debug, Clone)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    pub support_url: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize, Debug, Clone)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
}

impl HaComponent {
    pub fn from_reading(device: &str, reading: &Reading) -> Self {
        let key = reading.key();
        return HaComponent {
            p: "sensor".to_string(),
            name: reading.name.clone(),
            device_class: reading.kind.device_class(),
            unit_of_measurement: reading.unit.clone(),
            value_template: format!("{{{{ value_json.{key} }}}}"),
            unique_id: match &reading.unique_id {
                Some(id) => id.clone(),
                None => format!("e2m_{PROTOCOL}_{device}_{key}").to_lowercase(),
            },
            object_id: format!("{device}_{key}").to_lowercase(),
            state_class: reading.kind.state_class(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub state_topic: String,
    pub availability_topic: String,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(name: String, manu: String, model: String) -> Self {
        return HaDiscover {
            discover_topic: format!("homeassistant/device/e2m_{PROTOCOL}-{name}/config"),
            dev: HaDevice {
                ids: format!("e2m_{PROTOCOL}_{name}"),
                name: name.clone(),
                manufacturer: manu,
                model: model,
            },
            o: HaOrigin {
                name: "energomera2mqtt".to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
                support_url: "https://energy2mqtt.org".to_string()
            },
            cmps: serde_json::Map::new(),
            state_topic: state_topic(&name),
            availability_topic: status_topic(&name),
            qos: 2
        }
    }

    /// One sensor per configured reading, keyed like the state document
    pub fn add_readings(&mut self, readings: &[Reading]) -> Result<(), serde_json::Error> {
        for reading in readings {
            let cmp = HaComponent::from_reading(&self.dev.name, reading);
            self.cmps.insert(cmp.object_id.clone(), serde_json::to_value(cmp)?);
        }
        Ok(())
    }

    pub fn get_dev_id(&self) -> String {
        return self.dev.ids.clone();
    }
}

pub fn state_topic(meter: &str) -> String {
    return format!("energomera2mqtt/devs/{meter}");
}

pub fn status_topic(meter: &str) -> String {
    return format!("energomera2mqtt/devs/{meter}/status");
}
