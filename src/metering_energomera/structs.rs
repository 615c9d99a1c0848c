use serde::Serialize;

/// Everything the meter can be asked for in one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReadingKind {
    Voltage,
    Current,
    Power,
    Frequency,
    TotalEnergy,
    DayEnergy,
    MonthEnergy,
}

impl ReadingKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "voltage" => Some(ReadingKind::Voltage),
            "current" => Some(ReadingKind::Current),
            "power" => Some(ReadingKind::Power),
            "frequency" => Some(ReadingKind::Frequency),
            "total_energy" => Some(ReadingKind::TotalEnergy),
            "day_energy" => Some(ReadingKind::DayEnergy),
            "month_energy" | "monthly_energy" => Some(ReadingKind::MonthEnergy),
            _ => None,
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            ReadingKind::Voltage => "voltage".to_string(),
            ReadingKind::Current => "current".to_string(),
            ReadingKind::Power => "power".to_string(),
            ReadingKind::Frequency => "frequency".to_string(),
            ReadingKind::TotalEnergy => "total_energy".to_string(),
            ReadingKind::DayEnergy => "day_energy".to_string(),
            ReadingKind::MonthEnergy => "month_energy".to_string(),
        }
    }

    /// Energy windows answer with a total followed by the per tariff values
    pub fn is_multi_tariff(&self) -> bool {
        matches!(self, ReadingKind::TotalEnergy | ReadingKind::DayEnergy | ReadingKind::MonthEnergy)
    }

    pub fn default_name(&self) -> String {
        match self {
            ReadingKind::Voltage => "Voltage".to_string(),
            ReadingKind::Current => "Current".to_string(),
            ReadingKind::Power => "Power".to_string(),
            ReadingKind::Frequency => "Frequency".to_string(),
            ReadingKind::TotalEnergy => "Total Energy".to_string(),
            ReadingKind::DayEnergy => "Last Day Energy".to_string(),
            ReadingKind::MonthEnergy => "Last Month Energy".to_string(),
        }
    }

    pub fn unit(&self) -> String {
        match self {
            ReadingKind::Voltage => "V".to_string(),
            ReadingKind::Current => "A".to_string(),
            ReadingKind::Power => "kW".to_string(),
            ReadingKind::Frequency => "Hz".to_string(),
            _ => "kWh".to_string(),
        }
    }

    pub fn device_class(&self) -> String {
        match self {
            ReadingKind::Voltage => "voltage".to_string(),
            ReadingKind::Current => "current".to_string(),
            ReadingKind::Power => "power".to_string(),
            ReadingKind::Frequency => "frequency".to_string(),
            _ => "energy".to_string(),
        }
    }

    pub fn state_class(&self) -> String {
        match self {
            ReadingKind::TotalEnergy => "total_increasing".to_string(),
            ReadingKind::DayEnergy | ReadingKind::MonthEnergy => "total".to_string(),
            _ => "measurement".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum Tariff {
    #[default]
    Total,
    T1,
    T2,
}

impl Tariff {
    pub fn suffix(&self) -> &'static str {
        match self {
            Tariff::Total => "",
            Tariff::T1 => "_t1",
            Tariff::T2 => "_t2",
        }
    }
}

/// A configured measurement, resolved once and reused for every cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub unit: String,
    pub kind: ReadingKind,
    pub tariff: Tariff,
    pub precision: u32,
    pub unique_id: Option<String>,
}

impl Reading {
    pub fn new(kind: ReadingKind, tariff: Tariff, precision: u32) -> Self {
        let mut name = kind.default_name();
        match tariff {
            Tariff::Total => {},
            Tariff::T1 => name.push_str(" T1"),
            Tariff::T2 => name.push_str(" T2"),
        }

        return Reading { name, unit: kind.unit(), kind, tariff, precision, unique_id: None };
    }

    /// Key used in the published state document, e.g. `total_energy_t1`
    pub fn key(&self) -> String {
        return format!("{}{}", self.kind.to_string(), self.tariff.suffix());
    }

    /* Rounding happens here and nowhere else */
    pub fn measure(&self, parsed: &ParsedResponse) -> Measurement {
        match parsed {
            ParsedResponse::Single(v) => Measurement {
                value: round_to(*v, self.precision),
                t1: None,
                t2: None,
            },
            ParsedResponse::Tariffs(record) => match self.tariff {
                Tariff::Total => Measurement {
                    value: round_to(record.total, self.precision),
                    t1: Some(round_to(record.t1, self.precision)),
                    t2: Some(round_to(record.t2, self.precision)),
                },
                Tariff::T1 => Measurement { value: round_to(record.t1, self.precision), t1: None, t2: None },
                Tariff::T2 => Measurement { value: round_to(record.t2, self.precision), t1: None, t2: None },
            },
        }
    }
}

/// More decimals than an f64 carries
pub const MAX_PRECISION: u32 = 15;

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(std::cmp::min(precision, MAX_PRECISION) as i32);
    return (value * factor).round() / factor;
}

/// One multi-tariff answer (current total, last day or last month)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyRecord {
    pub total: f64,
    pub t1: f64,
    pub t2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedResponse {
    Single(f64),
    Tariffs(EnergyRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t2: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unavailable {
    NoResponse,
    ChecksumError,
    ParseError,
    SessionNotOpened,
}

impl Unavailable {
    pub fn to_string(&self) -> String {
        match self {
            Unavailable::NoResponse => "no response".to_string(),
            Unavailable::ChecksumError => "checksum error".to_string(),
            Unavailable::ParseError => "parse error".to_string(),
            Unavailable::SessionNotOpened => "session not opened".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub reading: Reading,
    pub outcome: Result<Measurement, Unavailable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentification {
    pub manufacturer: String,
    pub baud_id: char,
    pub identification: String,
    pub full_id: String,
}
