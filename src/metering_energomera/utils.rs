use super::{structs::DeviceIdentification, MeterError};
use log::debug;

pub fn parse_identification_line(raw: &[u8]) -> Result<DeviceIdentification, MeterError> {
    // Example formats:
    // /EKT5CE102MvR1\r\n
    // /EKT5CE301v12\r\n

    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);

    let start = line.find('/')
        .ok_or(MeterError::Handshake("identification does not start with '/'".to_string()))?;
    let content = &line[start + 1..];

    /* three letters of manufacturer, one digit for the maximum baud rate, then the model */
    let mut chars = content.chars();
    let manufacturer: String = chars.by_ref().take(3).collect();
    let baud_id = chars.next()
        .ok_or(MeterError::Handshake(format!("identification '{}' too short", line)))?;
    if manufacturer.len() != 3 {
        return Err(MeterError::Handshake(format!("identification '{}' too short", line)));
    }
    let identification: String = chars.collect();

    debug!("Parsed identification - Manufacturer: {}, Baud: {}, ID: {}",
           manufacturer, baud_id, identification);

    Ok(DeviceIdentification {
        manufacturer: manufacturer.clone(),
        baud_id,
        identification: identification.clone(),
        full_id: format!("{}{}", manufacturer, identification),
    })
}

pub fn to_hex(data: &[u8]) -> String {
    return data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<String>>().join(" ");
}
