use serde::{Deserialize, Serialize};
use super::MeterError;

pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;

/// SOH 'R' '1' STX, the lead of every read command
pub const START_COMMAND_PREFIX: [u8; 4] = [SOH, b'R', b'1', STX];
/// ')' ETX, closes the argument list of a read command
pub const END_COMMAND_POSTFIX: [u8; 2] = [b')', ETX];

/// Block check character variants seen on Energomera meters.
///
/// `Sum7` adds every byte after the leading SOH/STX up to and including ETX and
/// keeps the low seven bits. `Sum8Offset5` adds only the data block behind STX,
/// adds 5 and keeps eight bits. Both agree as long as the seven bit sum does
/// not carry into bit 7; captured traffic (e.g. `VOLTA` → 0x5F) only matches
/// `Sum7`, the other one is kept for meters flashed with the older firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Checksum {
    #[default]
    Sum7,
    Sum8Offset5,
}

impl Checksum {
    /// `body` is everything after the leading SOH or STX up to and including ETX
    pub fn compute(&self, body: &[u8]) -> u8 {
        match self {
            Checksum::Sum7 => {
                let sum: u32 = body.iter().map(|b| *b as u32).sum();
                (sum % 128) as u8
            }
            Checksum::Sum8Offset5 => {
                let block = match body.iter().position(|b| *b == STX) {
                    Some(pos) => &body[pos + 1..],
                    None => body,
                };
                let sum: u32 = block.iter().map(|b| *b as u32).sum();
                ((sum + 5) & 0xFF) as u8
            }
        }
    }
}

/// A complete request frame as it goes on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        return &self.bytes;
    }

    pub fn bcc(&self) -> u8 {
        return self.bytes[self.bytes.len() - 1];
    }
}

/// SOH command [STX data] ETX BCC
pub fn encode_message(command: &[u8; 2], data: Option<&[u8]>, checksum: Checksum) -> Frame {
    let mut bytes = vec![SOH];
    bytes.extend_from_slice(command);
    if let Some(data) = data {
        bytes.push(STX);
        bytes.extend_from_slice(data);
    }
    bytes.push(ETX);

    let bcc = checksum.compute(&bytes[1..]);
    bytes.push(bcc);

    return Frame { bytes };
}

/// Read command for `mnemonic`, optionally with a date argument inside the brackets
pub fn encode(mnemonic: &str, date_arg: Option<&str>, checksum: Checksum) -> Frame {
    let mut bytes = START_COMMAND_PREFIX.to_vec();
    bytes.extend_from_slice(mnemonic.as_bytes());
    bytes.push(b'(');
    if let Some(arg) = date_arg {
        bytes.extend_from_slice(arg.as_bytes());
    }
    bytes.extend_from_slice(&END_COMMAND_POSTFIX);

    let bcc = checksum.compute(&bytes[1..]);
    bytes.push(bcc);

    return Frame { bytes };
}

/// Password frame, `SOH P1 STX (password) ETX BCC`
pub fn encode_password(password: &str, checksum: Checksum) -> Frame {
    let data = format!("({})", password);
    return encode_message(b"P1", Some(data.as_bytes()), checksum);
}

/// Break frame that ends the programming session, `SOH B0 ETX BCC`
pub fn encode_close(checksum: Checksum) -> Frame {
    return encode_message(b"B0", None, checksum);
}

/// Meter side data block, `STX payload ETX BCC`
pub fn encode_block(payload: &[u8], checksum: Checksum) -> Vec<u8> {
    let mut bytes = vec![STX];
    bytes.extend_from_slice(payload);
    bytes.push(ETX);
    let bcc = checksum.compute(&bytes[1..]);
    bytes.push(bcc);
    return bytes;
}

/// Validates a received frame and returns the data block between STX and ETX.
///
/// The checksum and the lead marker are verified before anything else is
/// looked at, so a damaged frame is always reported as `MeterError::Checksum`.
pub fn decode(raw: &[u8], checksum: Checksum) -> Result<Vec<u8>, MeterError> {
    if raw.is_empty() {
        return Err(MeterError::Format("empty frame".to_string()));
    }

    let lead = match raw.iter().position(|b| *b == SOH || *b == STX) {
        Some(pos) => pos,
        None => {
            /* lead marker lost on the line */
            let actual = raw[raw.len() - 1];
            return Err(MeterError::Checksum { expected: checksum.compute(&raw[..raw.len() - 1]), actual });
        }
    };

    let frame = &raw[lead..];
    if frame.len() < 3 {
        return Err(MeterError::Format(format!("frame too short ({} bytes)", frame.len())));
    }

    let actual = frame[frame.len() - 1];
    let body = &frame[1..frame.len() - 1];
    let expected = checksum.compute(body);

    /* Bit 7 never makes it over a 7E1 line undamaged */
    if body.iter().any(|b| *b & 0x80 != 0) {
        return Err(MeterError::Checksum { expected, actual });
    }

    if expected != actual {
        return Err(MeterError::Checksum { expected, actual });
    }

    /* SOH and STX are outside the sum, a swapped lead only shows in the layout */
    if !lead_matches_body(frame[0], body) {
        return Err(MeterError::Checksum { expected, actual });
    }

    if body[body.len() - 1] != ETX {
        return Err(MeterError::Format("ETX missing in front of BCC".to_string()));
    }

    let data_start = match frame[0] {
        STX => 1,
        _ => match body.iter().position(|b| *b == STX) {
            Some(pos) => pos + 2,
            None => frame.len() - 2,
        },
    };

    return Ok(frame[data_start..frame.len() - 2].to_vec());
}

/// SOH opens a command (`R1`, `P1`, `B0`, ...) followed by STX or ETX,
/// STX opens a bare data block that carries no further markers
fn lead_matches_body(lead: u8, body: &[u8]) -> bool {
    match lead {
        STX => !body.iter().any(|b| *b == SOH || *b == STX),
        _ => body.len() >= 3
            && body[0].is_ascii_uppercase()
            && body[1].is_ascii_digit()
            && (body[2] == STX || body[2] == ETX),
    }
}
