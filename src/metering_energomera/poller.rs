use std::collections::HashMap;
use chrono::{Local, NaiveDate};
use log::{debug, info, warn};
use super::codec;
use super::commands::command_for;
use super::parser::parse_response;
use super::session::{Session, SessionSettings};
use super::structs::{DeviceIdentification, ParsedResponse, PollResult, Reading, ReadingKind, SessionState, Unavailable};
use super::transport::Transport;
use super::MeterError;

/// Runs poll cycles: one session, one round trip per distinct command, always closed
pub struct Poller<T: Transport> {
    session: Session<T>,
    readings: Vec<Reading>,
}

impl<T: Transport> Poller<T> {
    pub fn new(transport: T, settings: SessionSettings) -> Self {
        return Poller {
            session: Session::new(transport, settings),
            readings: Vec::new(),
        };
    }

    pub fn configure(&mut self, readings: Vec<Reading>) {
        debug!("Configured {} readings", readings.len());
        self.readings = readings;
    }

    pub fn readings(&self) -> &[Reading] {
        return &self.readings;
    }

    pub fn identification(&self) -> Option<&DeviceIdentification> {
        return self.session.identification();
    }

    pub fn session(&self) -> &Session<T> {
        return &self.session;
    }

    pub fn poll_cycle(&mut self) -> Vec<PollResult> {
        return self.poll_cycle_on(Local::now().date_naive());
    }

    /// One full cycle with date arguments computed for `today`
    pub fn poll_cycle_on(&mut self, today: NaiveDate) -> Vec<PollResult> {
        if self.readings.is_empty() {
            return Vec::new();
        }

        if let Err(e) = self.session.open() {
            warn!("Could not open session with the meter: {}", e);
            self.session.close();
            return self.readings.iter()
                .map(|r| PollResult { reading: r.clone(), outcome: Err(Unavailable::SessionNotOpened) })
                .collect();
        }

        /* answers live for this cycle only, T1/T2 reuse the round trip of their window */
        let mut answers: HashMap<ReadingKind, Result<ParsedResponse, Unavailable>> = HashMap::new();
        let readings = self.readings.clone();
        let mut results = Vec::with_capacity(readings.len());

        for reading in readings.iter() {
            let answer = match answers.get(&reading.kind) {
                Some(answer) => *answer,
                None => {
                    let answer = self.fetch(reading.kind, today);
                    answers.insert(reading.kind, answer);
                    answer
                }
            };

            let outcome = answer.map(|parsed| reading.measure(&parsed));
            if let Err(reason) = outcome {
                warn!("{} unavailable: {}", reading.name, reason.to_string());
            }
            results.push(PollResult { reading: reading.clone(), outcome });
        }

        self.session.close();

        let good = results.iter().filter(|r| r.outcome.is_ok()).count();
        info!("Poll cycle done, {} of {} readings available", good, results.len());
        return results;
    }

    /// Closes any open session and releases the serial line
    pub fn shutdown(&mut self) {
        info!("Shutting down meter poller");
        self.session.close();
    }

    fn fetch(&mut self, kind: ReadingKind, today: NaiveDate) -> Result<ParsedResponse, Unavailable> {
        /* an earlier transport error already abandoned the session */
        if self.session.state() != SessionState::Open {
            return Err(Unavailable::NoResponse);
        }

        let command = command_for(kind);
        let checksum = self.session.settings().checksum;
        let frame = command.frame_for(today, checksum);

        let raw = self.session.request(&frame, command.response_len).map_err(unavailable_reason)?;
        if raw.is_empty() {
            return Err(Unavailable::NoResponse);
        }

        let payload = codec::decode(&raw, checksum).map_err(unavailable_reason)?;
        return parse_response(&command, &payload).map_err(unavailable_reason);
    }
}

fn unavailable_reason(e: MeterError) -> Unavailable {
    debug!("Reading failed: {}", e);
    match e {
        MeterError::Transport(_) => Unavailable::NoResponse,
        MeterError::Checksum { .. } => Unavailable::ChecksumError,
        MeterError::Format(_) | MeterError::Parse(_) => Unavailable::ParseError,
        MeterError::Handshake(_) | MeterError::SessionNotOpen => Unavailable::SessionNotOpened,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_energomera::codec::{encode, encode_block, encode_close, Checksum, ACK};
    use crate::metering_energomera::commands;
    use crate::metering_energomera::session::tests::{handshake, settings};
    use crate::metering_energomera::structs::Tariff;
    use crate::metering_energomera::transport::testing::ScriptedTransport;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn reading(kind: ReadingKind, tariff: Tariff) -> Reading {
        Reading::new(kind, tariff, 2)
    }

    fn meter() -> ScriptedTransport {
        let c = Checksum::Sum7;
        handshake(ScriptedTransport::new(), &[ACK])
            .reply(encode("VOLTA", None, c).as_bytes(), &encode_block(b"VOLTA(229.874)", c))
            .reply(encode("ET0PE", None, c).as_bytes(), &encode_block(b"ET0PE(123.45)\r\n(100.00)\r\n(23.45)\r\n(0)\r\n(0)\r\n", c))
            .reply(encode("EADPE", Some("29.02.24"), c).as_bytes(), &encode_block(b"EADPE(7.5)(5.0)(2.5)", c))
            .reply(encode("EAMPE", Some("02.24"), c).as_bytes(), &encode_block(b"EAMPE(210.0)", c))
    }

    fn close_frame() -> Vec<u8> {
        encode_close(Checksum::Sum7).as_bytes().to_vec()
    }

    #[test]
    fn test_end_to_end_cycle() {
        let mut poller = Poller::new(meter(), settings());
        poller.configure(vec![
            reading(ReadingKind::Voltage, Tariff::Total),
            reading(ReadingKind::TotalEnergy, Tariff::Total),
            reading(ReadingKind::TotalEnergy, Tariff::T1),
        ]);

        let results = poller.poll_cycle_on(today());
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].outcome.unwrap().value, 229.87);
        let total = results[1].outcome.unwrap();
        assert_eq!(total.value, 123.45);
        assert_eq!(total.t1, Some(100.0));
        assert_eq!(total.t2, Some(23.45));
        assert_eq!(results[2].outcome.unwrap().value, 100.0);

        let transport = poller.session().transport();
        assert_eq!(transport.opens, 1);
        assert_eq!(transport.count_written(&commands::IDENT_REQUEST), 1);
        assert_eq!(transport.count_written(&close_frame()), 1);
        assert_eq!(transport.closes, 1);
        assert_eq!(transport.count_written(encode("ET0PE", None, Checksum::Sum7).as_bytes()), 1);
        assert_eq!(poller.session().state(), SessionState::Closed);
    }

    #[test]
    fn test_one_round_trip_per_window() {
        let mut poller = Poller::new(meter(), settings());
        poller.configure(vec![
            reading(ReadingKind::DayEnergy, Tariff::T2),
            reading(ReadingKind::DayEnergy, Tariff::Total),
            reading(ReadingKind::DayEnergy, Tariff::T1),
        ]);

        let results = poller.poll_cycle_on(today());
        let values: Vec<f64> = results.iter().map(|r| r.outcome.unwrap().value).collect();
        assert_eq!(values, vec![2.5, 7.5, 5.0]);

        let day_frame = encode("EADPE", Some("29.02.24"), Checksum::Sum7);
        assert_eq!(poller.session().transport().count_written(day_frame.as_bytes()), 1);
    }

    #[test]
    fn test_failures_do_not_abort_the_batch() {
        let mut poller = Poller::new(meter(), settings());
        poller.configure(vec![
            reading(ReadingKind::Current, Tariff::Total),
            reading(ReadingKind::MonthEnergy, Tariff::T1),
            reading(ReadingKind::Voltage, Tariff::Total),
        ]);

        let results = poller.poll_cycle_on(today());
        assert_eq!(results[0].outcome, Err(Unavailable::NoResponse));
        assert_eq!(results[1].outcome, Err(Unavailable::ParseError));
        assert_eq!(results[2].outcome.unwrap().value, 229.87);
        assert_eq!(poller.session().transport().count_written(&close_frame()), 1);
    }

    #[test]
    fn test_long_energy_reply() {
        let c = Checksum::Sum7;
        let block = encode_block(b"ET0PE(41773.213)\r\n(27226.347)\r\n(14546.868)\r\n(0.0)\r\n(0.0)\r\n(0.0)\r\n", c);
        assert!(block.len() > 64);
        let transport = meter().reply(encode("ET0PE", None, c).as_bytes(), &block);

        let mut poller = Poller::new(transport, settings());
        poller.configure(vec![
            reading(ReadingKind::TotalEnergy, Tariff::Total),
            reading(ReadingKind::TotalEnergy, Tariff::T2),
        ]);

        let results = poller.poll_cycle_on(today());
        let total = results[0].outcome.unwrap();
        assert_eq!(total.value, 41773.21);
        assert_eq!(total.t1, Some(27226.35));
        assert_eq!(results[1].outcome.unwrap().value, 14546.87);
    }

    #[test]
    fn test_checksum_error_is_reported() {
        let c = Checksum::Sum7;
        let mut damaged = encode_block(b"FREQU(49.98)", c);
        let bcc = damaged.len() - 1;
        damaged[bcc] ^= 0x01;
        let transport = meter().reply(encode("FREQU", None, c).as_bytes(), &damaged);

        let mut poller = Poller::new(transport, settings());
        poller.configure(vec![reading(ReadingKind::Frequency, Tariff::Total)]);
        let results = poller.poll_cycle_on(today());
        assert_eq!(results[0].outcome, Err(Unavailable::ChecksumError));
    }

    #[test]
    fn test_handshake_failure_reports_everything_unavailable() {
        let transport = handshake(ScriptedTransport::new(), &[0x15]);
        let mut poller = Poller::new(transport, settings());
        poller.configure(vec![
            reading(ReadingKind::Voltage, Tariff::Total),
            reading(ReadingKind::TotalEnergy, Tariff::T2),
        ]);

        let results = poller.poll_cycle_on(today());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.outcome == Err(Unavailable::SessionNotOpened)));

        let transport = poller.session().transport();
        assert_eq!(transport.count_written(encode("VOLTA", None, Checksum::Sum7).as_bytes()), 0);
        assert_eq!(transport.count_written(&close_frame()), 1);
    }

    #[test]
    fn test_transport_error_mid_cycle() {
        let mut transport = meter();
        /* ident, option, password, VOLTA */
        transport.fail_on_write = Some(4);
        let mut poller = Poller::new(transport, settings());
        poller.configure(vec![
            reading(ReadingKind::Voltage, Tariff::Total),
            reading(ReadingKind::TotalEnergy, Tariff::Total),
        ]);

        let results = poller.poll_cycle_on(today());
        assert_eq!(results[0].outcome, Err(Unavailable::NoResponse));
        assert_eq!(results[1].outcome, Err(Unavailable::NoResponse));
        assert_eq!(poller.session().transport().closes, 1);
        assert_eq!(poller.session().state(), SessionState::Closed);
    }

    #[test]
    fn test_every_cycle_reopens() {
        let mut poller = Poller::new(meter(), settings());
        poller.configure(vec![reading(ReadingKind::TotalEnergy, Tariff::T1)]);

        for _ in 0..3 {
            let results = poller.poll_cycle_on(today());
            assert_eq!(results[0].outcome.unwrap().value, 100.0);
        }

        let transport = poller.session().transport();
        assert_eq!(transport.opens, 3);
        assert_eq!(transport.count_written(&close_frame()), 3);
        assert_eq!(transport.count_written(encode("ET0PE", None, Checksum::Sum7).as_bytes()), 3);
    }

    #[test]
    fn test_shutdown_and_empty_config() {
        let mut poller = Poller::new(meter(), settings());
        assert!(poller.poll_cycle_on(today()).is_empty());
        assert_eq!(poller.session().transport().opens, 0);

        poller.shutdown();
        assert_eq!(poller.session().state(), SessionState::Closed);
        assert!(poller.session().transport().written.is_empty());
    }
}
