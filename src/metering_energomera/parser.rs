use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use super::commands::{Command, ParseStrategy};
use super::structs::{EnergyRecord, ParsedResponse};
use super::MeterError;

lazy_static! {
    static ref BRACKETED_DECIMAL: Regex = Regex::new(r"\((\d+(?:\.\d+)?)\)").unwrap();
}

pub fn parse_response(command: &Command, payload: &[u8]) -> Result<ParsedResponse, MeterError> {
    let text = String::from_utf8_lossy(payload);
    debug!("Parsing {} response: {:?}", command.mnemonic, text);

    match command.strategy {
        ParseStrategy::Single => parse_single(command.mnemonic, &text).map(ParsedResponse::Single),
        ParseStrategy::MultiTariff => parse_multi_tariff(command.mnemonic, &text).map(ParsedResponse::Tariffs),
    }
}

/// `VOLTA(229.87)` → 229.87
pub fn parse_single(mnemonic: &str, text: &str) -> Result<f64, MeterError> {
    let start = text.find(mnemonic)
        .ok_or_else(|| MeterError::Parse(format!("{} not found in response", mnemonic)))?;
    let rest = &text[start + mnemonic.len()..];

    let caps = BRACKETED_DECIMAL.captures(rest)
        .filter(|c| c.get(0).map(|m| m.start()) == Some(0))
        .ok_or_else(|| MeterError::Parse(format!("no value behind {}", mnemonic)))?;

    return parse_float(&caps[1]);
}

/// `ET0PE(123.45)(100.00)(23.45)` → total, T1, T2
pub fn parse_multi_tariff(mnemonic: &str, text: &str) -> Result<EnergyRecord, MeterError> {
    let start = text.find(mnemonic)
        .ok_or_else(|| MeterError::Parse(format!("{} not found in response", mnemonic)))?;
    let rest = &text[start + mnemonic.len()..];

    let values: Vec<&str> = BRACKETED_DECIMAL.captures_iter(rest)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .take(3)
        .collect();

    if values.len() < 3 {
        return Err(MeterError::Parse(format!("{} returned {} of 3 tariff values", mnemonic, values.len())));
    }

    return Ok(EnergyRecord {
        total: parse_float(values[0])?,
        t1: parse_float(values[1])?,
        t2: parse_float(values[2])?,
    });
}

fn parse_float(s: &str) -> Result<f64, MeterError> {
    s.parse::<f64>().map_err(|e| MeterError::Parse(format!("{}: {}", s, e)))
}
