use chrono::{Datelike, Duration, NaiveDate};
use super::codec::{self, Checksum, Frame};
use super::structs::ReadingKind;

/* Handshake and close replies carry no length prefix, these are what the meter sends */
pub const IDENT_REQUEST: [u8; 5] = [0x2F, 0x3F, 0x21, 0x0D, 0x0A];
pub const IDENT_RESPONSE_LEN: usize = 17;
pub const OPTION_SELECT: [u8; 6] = [codec::ACK, 0x30, 0x35, 0x31, 0x0D, 0x0A];
pub const OPTION_RESPONSE_LEN: usize = 11;
pub const PASSWORD_RESPONSE_LEN: usize = 1;
pub const CLOSE_RESPONSE_LEN: usize = 1;
pub const DEFAULT_PASSWORD: &str = "777777";
/// Read cap for energy windows, replies with six tariff slots exceed 64 bytes
pub const MULTI_TARIFF_RESPONSE_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Single,
    MultiTariff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateArgument {
    None,
    PreviousDay,
    PreviousMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub mnemonic: &'static str,
    pub date_argument: DateArgument,
    pub response_len: usize,
    pub strategy: ParseStrategy,
}

pub fn command_for(kind: ReadingKind) -> Command {
    match kind {
        ReadingKind::Voltage => Command { mnemonic: "VOLTA", date_argument: DateArgument::None, response_len: 19, strategy: ParseStrategy::Single },
        ReadingKind::Current => Command { mnemonic: "CURRE", date_argument: DateArgument::None, response_len: 19, strategy: ParseStrategy::Single },
        ReadingKind::Power => Command { mnemonic: "POWEP", date_argument: DateArgument::None, response_len: 21, strategy: ParseStrategy::Single },
        ReadingKind::Frequency => Command { mnemonic: "FREQU", date_argument: DateArgument::None, response_len: 19, strategy: ParseStrategy::Single },
        ReadingKind::TotalEnergy => Command { mnemonic: "ET0PE", date_argument: DateArgument::None, response_len: MULTI_TARIFF_RESPONSE_LEN, strategy: ParseStrategy::MultiTariff },
        ReadingKind::DayEnergy => Command { mnemonic: "EADPE", date_argument: DateArgument::PreviousDay, response_len: MULTI_TARIFF_RESPONSE_LEN, strategy: ParseStrategy::MultiTariff },
        ReadingKind::MonthEnergy => Command { mnemonic: "EAMPE", date_argument: DateArgument::PreviousMonth, response_len: MULTI_TARIFF_RESPONSE_LEN, strategy: ParseStrategy::MultiTariff },
    }
}

impl Command {
    /// Date argument for a cycle running on `today`, must not be kept between cycles
    pub fn argument_for(&self, today: NaiveDate) -> Option<String> {
        match self.date_argument {
            DateArgument::None => None,
            DateArgument::PreviousDay => Some(previous_day(today)),
            DateArgument::PreviousMonth => Some(previous_month(today)),
        }
    }

    pub fn frame_for(&self, today: NaiveDate, checksum: Checksum) -> Frame {
        let arg = self.argument_for(today);
        return codec::encode(self.mnemonic, arg.as_deref(), checksum);
    }
}

/// `dd.mm.yy` of the day before `today`
pub fn previous_day(today: NaiveDate) -> String {
    let day = today - Duration::days(1);
    return day.format("%d.%m.%y").to_string();
}

/// `mm.yy` of the month before the one `today` is in
pub fn previous_month(today: NaiveDate) -> String {
    /* the last day of the previous month is one day before the first of this month */
    let last_of_previous = today.with_day(1).unwrap_or(today) - Duration::days(1);
    return last_of_previous.format("%m.%y").to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_leap_year_boundary() {
        assert_eq!(previous_day(date(2024, 3, 1)), "29.02.24");
        assert_eq!(previous_month(date(2024, 3, 1)), "02.24");
    }

    #[test]
    fn test_year_boundary() {
        assert_eq!(previous_day(date(2024, 1, 1)), "31.12.23");
        assert_eq!(previous_month(date(2024, 1, 1)), "12.23");
        assert_eq!(previous_month(date(2024, 1, 31)), "12.23");
    }

    #[test]
    fn test_arguments_follow_the_date() {
        let day = command_for(ReadingKind::DayEnergy);
        assert_eq!(day.argument_for(date(2024, 10, 1)), Some("30.09.24".to_string()));
        assert_eq!(day.argument_for(date(2024, 10, 2)), Some("01.10.24".to_string()));
        assert_eq!(command_for(ReadingKind::Voltage).argument_for(date(2024, 10, 2)), None);
    }

    #[test]
    fn test_frame_for_month_energy() {
        let frame = command_for(ReadingKind::MonthEnergy).frame_for(date(2024, 10, 15), Checksum::Sum7);
        assert_eq!(frame.as_bytes(), &[0x01, 0x52, 0x31, 0x02, 0x45, 0x41, 0x4D, 0x50, 0x45, 0x28,
                                       0x30, 0x39, 0x2E, 0x32, 0x34, 0x29, 0x03, 0x3E]);
    }

    #[test]
    fn test_strategies() {
        assert_eq!(command_for(ReadingKind::Power).strategy, ParseStrategy::Single);
        assert_eq!(command_for(ReadingKind::Power).response_len, 21);
        assert_eq!(command_for(ReadingKind::TotalEnergy).strategy, ParseStrategy::MultiTariff);
        assert_eq!(command_for(ReadingKind::TotalEnergy).response_len, 100);
        assert_eq!(command_for(ReadingKind::MonthEnergy).response_len, 100);
    }
}
