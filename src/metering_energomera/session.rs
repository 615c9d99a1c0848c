use std::time::Duration;
use log::{debug, error, info, warn};
use super::codec::{self, Checksum, Frame, ACK};
use super::commands::{self, DEFAULT_PASSWORD};
use super::structs::{DeviceIdentification, SessionState};
use super::transport::{Transport, TransportError};
use super::utils::{parse_identification_line, to_hex};
use super::MeterError;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub password: String,
    pub checksum: Checksum,
    /// Pause between writing a request and reading the answer (UART turnaround)
    pub settle_delay: Duration,
    pub read_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            password: DEFAULT_PASSWORD.to_string(),
            checksum: Checksum::Sum7,
            settle_delay: Duration::from_millis(300),
            read_timeout: Duration::from_millis(1500),
        }
    }
}

/// Programming mode session with the meter; the only user of the transport
pub struct Session<T: Transport> {
    transport: T,
    settings: SessionSettings,
    state: SessionState,
    transport_open: bool,
    identification: Option<DeviceIdentification>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, settings: SessionSettings) -> Self {
        return Session {
            transport,
            settings,
            state: SessionState::Closed,
            transport_open: false,
            identification: None,
        };
    }

    pub fn state(&self) -> SessionState {
        return self.state;
    }

    pub fn settings(&self) -> &SessionSettings {
        return &self.settings;
    }

    pub fn identification(&self) -> Option<&DeviceIdentification> {
        return self.identification.as_ref();
    }

    pub fn transport(&self) -> &T {
        return &self.transport;
    }

    /// Identification, option select and password, in this order
    pub fn open(&mut self) -> Result<(), MeterError> {
        if self.state != SessionState::Closed {
            warn!("Session open requested while {:?}, closing first", self.state);
            self.close();
        }

        debug!("Opening session with the meter");
        self.state = SessionState::Opening;

        if let Err(e) = self.transport.open() {
            self.state = SessionState::Closed;
            return Err(e.into());
        }
        self.transport_open = true;

        let ident = self.exchange(&commands::IDENT_REQUEST, commands::IDENT_RESPONSE_LEN)?;
        match parse_identification_line(&ident) {
            Ok(device) => {
                debug!("Meter identified as {}", device.full_id);
                self.identification = Some(device);
            }
            Err(e) => warn!("Meter identification not understood: {}", e),
        }

        let option = self.exchange(&commands::OPTION_SELECT, commands::OPTION_RESPONSE_LEN)?;
        debug!("Option select answered with {}", to_hex(&option));

        let password = codec::encode_password(&self.settings.password, self.settings.checksum);
        let reply = self.exchange(password.as_bytes(), commands::PASSWORD_RESPONSE_LEN)?;
        if reply != [ACK] {
            self.state = SessionState::Closed;
            return Err(MeterError::Handshake(format!("password answered with [{}] instead of ACK", to_hex(&reply))));
        }

        info!("Session with the meter opened");
        self.state = SessionState::Open;
        Ok(())
    }

    /// Send a data command; refused unless the session is open
    pub fn request(&mut self, frame: &Frame, expected_len: usize) -> Result<Vec<u8>, MeterError> {
        if self.state != SessionState::Open {
            error!("Data command while session is {:?}", self.state);
            return Err(MeterError::SessionNotOpen);
        }

        return self.exchange(frame.as_bytes(), expected_len);
    }

    /// Best effort: the transport is released whatever the meter answers
    pub fn close(&mut self) {
        if self.transport_open {
            debug!("Closing session with the meter");
            let close = codec::encode_close(self.settings.checksum);
            match self.exchange(close.as_bytes(), commands::CLOSE_RESPONSE_LEN) {
                Ok(reply) => debug!("Close answered with [{}]", to_hex(&reply)),
                Err(e) => debug!("Close not acknowledged: {}", e),
            }
            self.release();
            info!("Session with the meter closed");
        }

        self.state = SessionState::Closed;
    }

    fn exchange(&mut self, request: &[u8], expected_len: usize) -> Result<Vec<u8>, MeterError> {
        debug!("Sent command: {}", to_hex(request));
        if let Err(e) = self.transport.write(request) {
            return Err(self.abandon(e));
        }

        if !self.settings.settle_delay.is_zero() {
            std::thread::sleep(self.settings.settle_delay);
        }

        match self.transport.read(expected_len, self.settings.read_timeout) {
            Ok(response) => {
                debug!("Received response: {}", to_hex(&response));
                Ok(response)
            }
            Err(e) => Err(self.abandon(e)),
        }
    }

    fn abandon(&mut self, e: TransportError) -> MeterError {
        error!("Error communicating with the meter: {}", e);
        self.release();
        self.state = SessionState::Closed;
        return e.into();
    }

    fn release(&mut self) {
        self.transport.close();
        self.transport_open = false;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metering_energomera::transport::testing::ScriptedTransport;

    pub fn settings() -> SessionSettings {
        SessionSettings { settle_delay: Duration::ZERO, ..SessionSettings::default() }
    }

    pub fn handshake(transport: ScriptedTransport, auth_reply: &[u8]) -> ScriptedTransport {
        transport
            .reply(&commands::IDENT_REQUEST, b"/EKT5CE102MvR1\r\n")
            .reply(&commands::OPTION_SELECT, &[0x01, b'P', b'0', 0x02, b'(', b'1', b'2', b')', 0x03, 0x66])
            .reply(codec::encode_password(DEFAULT_PASSWORD, Checksum::Sum7).as_bytes(), auth_reply)
            .reply(codec::encode_close(Checksum::Sum7).as_bytes(), &[ACK])
    }

    #[test]
    fn test_open_and_close() {
        let mut session = Session::new(handshake(ScriptedTransport::new(), &[ACK]), settings());
        session.open().unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.identification().unwrap().manufacturer, "EKT");

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.transport().opens, 1);
        assert_eq!(session.transport().closes, 1);
        assert_eq!(session.transport().count_written(&[0x01, 0x42, 0x30, 0x03, 0x75]), 1);
    }

    #[test]
    fn test_handshake_steps_in_order() {
        let mut session = Session::new(handshake(ScriptedTransport::new(), &[ACK]), settings());
        session.open().unwrap();
        let written = &session.transport().written;
        assert_eq!(written[0], commands::IDENT_REQUEST.to_vec());
        assert_eq!(written[1], commands::OPTION_SELECT.to_vec());
        assert_eq!(written[2], vec![0x01, 0x50, 0x31, 0x02, 0x28, 0x37, 0x37, 0x37, 0x37, 0x37, 0x37, 0x29, 0x03, 0x21]);
    }

    #[test]
    fn test_wrong_password_reply() {
        let mut session = Session::new(handshake(ScriptedTransport::new(), &[0x15]), settings());
        assert!(matches!(session.open(), Err(MeterError::Handshake(_))));
        assert_eq!(session.state(), SessionState::Closed);

        /* the line is still held, close tells the meter and releases it */
        session.close();
        assert_eq!(session.transport().closes, 1);
    }

    #[test]
    fn test_silent_meter() {
        let mut session = Session::new(ScriptedTransport::new(), settings());
        assert!(matches!(session.open(), Err(MeterError::Handshake(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_no_data_command_unless_open() {
        let frame = codec::encode("VOLTA", None, Checksum::Sum7);
        let mut session = Session::new(handshake(ScriptedTransport::new(), &[0x15]), settings());

        assert!(matches!(session.request(&frame, 19), Err(MeterError::SessionNotOpen)));
        let _ = session.open();
        assert!(matches!(session.request(&frame, 19), Err(MeterError::SessionNotOpen)));
        session.close();
        assert!(matches!(session.request(&frame, 19), Err(MeterError::SessionNotOpen)));

        assert_eq!(session.transport().count_written(frame.as_bytes()), 0);
    }

    #[test]
    fn test_transport_error_abandons_session() {
        let mut transport = handshake(ScriptedTransport::new(), &[ACK]);
        transport.fail_on_write = Some(4);
        let mut session = Session::new(transport, settings());
        session.open().unwrap();

        let frame = codec::encode("VOLTA", None, Checksum::Sum7);
        assert!(matches!(session.request(&frame, 19), Err(MeterError::Transport(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.transport().closes, 1);

        /* nothing left to close */
        session.close();
        assert_eq!(session.transport().closes, 1);
    }

    #[test]
    fn test_open_failure() {
        let mut transport = ScriptedTransport::new();
        transport.fail_open = true;
        let mut session = Session::new(transport, settings());
        assert!(matches!(session.open(), Err(MeterError::Transport(_))));
        assert_eq!(session.state(), SessionState::Closed);
        session.close();
        assert!(session.transport().written.is_empty());
    }
}
