//! Classic dynamic channel lifecycle: connection request/response followed
//! by the four-way configuration handshake, optionally negotiating
//! Enhanced Retransmission Mode ([SPEC_FULL] Section 4.3.1).

use crate::error::{Error, Result};
use crate::hci::ConnHandle;

use super::config::{ChannelMode, ConfigOption, RfcOption};
use super::erm::{ErmChannel, ErmConfig};
use super::signal::ConnectionResult;

/// Lifecycle state of a classic dynamic channel ([SPEC_FULL] Section 3:
/// L2CAP channel, classic dynamic variant).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    WaitConnect,
    WaitConnectRsp,
    WaitConfig,
    WaitSendConfig,
    WaitConfigReqRsp,
    WaitConfigRsp,
    WaitConfigReq,
    Open,
    WaitDisconnect,
}

/// A round-trip counter guarding against configuration negotiations that
/// never converge ([SPEC_FULL] Section 8, boundary behaviors).
const MAX_CONFIG_ROUNDS: u8 = 8;

/// A classic (BR/EDR) dynamic L2CAP channel, from connection request
/// through configuration to `Open`, optionally running Enhanced
/// Retransmission Mode once negotiated.
#[derive(Debug)]
pub struct ClassicChannel {
    pub handle: ConnHandle,
    pub local_cid: u16,
    pub remote_cid: u16,
    pub psm: u16,
    pub local_mtu: u16,
    pub peer_mtu: u16,
    state: State,
    want_erm: bool,
    local_done: bool,
    peer_done: bool,
    config_rounds: u8,
    erm: Option<ErmChannel>,
}

impl ClassicChannel {
    /// Creates a channel as the connection initiator, about to send
    /// `L2CAP_Connection_Request`.
    #[must_use]
    pub fn connecting(handle: ConnHandle, local_cid: u16, psm: u16, want_erm: bool) -> Self {
        Self {
            handle,
            local_cid,
            remote_cid: 0,
            psm,
            local_mtu: 672,
            peer_mtu: 672,
            state: State::WaitConnectRsp,
            want_erm,
            local_done: false,
            peer_done: false,
            config_rounds: 0,
            erm: None,
        }
    }

    /// Creates a channel as the connection acceptor, having just received
    /// `L2CAP_Connection_Request` and replied positively.
    #[must_use]
    pub fn accepted(
        handle: ConnHandle,
        local_cid: u16,
        remote_cid: u16,
        psm: u16,
        want_erm: bool,
    ) -> Self {
        Self {
            handle,
            local_cid,
            remote_cid,
            psm,
            local_mtu: 672,
            peer_mtu: 672,
            state: State::WaitConfig,
            want_erm,
            local_done: false,
            peer_done: false,
            config_rounds: 0,
            erm: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, State::Open)
    }

    /// Records the peer's `L2CAP_Connection_Response`, transitioning to
    /// configuration on success.
    pub fn on_connection_response(&mut self, dcid: u16, result: ConnectionResult) -> Result<()> {
        if self.state != State::WaitConnectRsp {
            return Err(Error::invalid_state("connection response in unexpected state"));
        }
        match result {
            ConnectionResult::Success => {
                self.remote_cid = dcid;
                self.state = State::WaitConfig;
                Ok(())
            }
            ConnectionResult::Pending => Ok(()),
            _ => {
                self.state = State::Closed;
                Err(Error::protocol(format!("connection refused: {result:?}")))
            }
        }
    }

    /// Builds this end's next `L2CAP_Configure_Request` data block and
    /// advances the local half of the handshake.
    pub fn build_configure_request(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        ConfigOption::Mtu(self.local_mtu).encode(&mut out);
        if self.want_erm {
            ConfigOption::Rfc(RfcOption::erm(ErmConfig {
                mtu: self.local_mtu,
                mps: self.local_mtu,
                tx_window: 32,
                max_transmit: 3,
            }))
            .encode(&mut out);
        }
        self.state = match self.state {
            State::WaitConfig => State::WaitConfigReqRsp,
            State::WaitSendConfig => State::WaitConfigRsp,
            s => s,
        };
        out
    }

    /// Processes an inbound `L2CAP_Configure_Request` data block, returning
    /// the options to echo back as `Success` (or the unknown-option type
    /// codes to reject with `UnknownOptions`).
    pub fn on_configure_request(
        &mut self,
        data: &[u8],
    ) -> Result<std::result::Result<Vec<ConfigOption>, Vec<u8>>> {
        self.config_rounds += 1;
        if self.config_rounds > MAX_CONFIG_ROUNDS {
            self.state = State::Closed;
            return Err(Error::protocol("configuration negotiation exceeded round limit"));
        }
        let (options, unknown) = ConfigOption::parse_all(data)?;
        if !unknown.is_empty() {
            return Ok(Err(unknown));
        }
        let mut negotiated_erm = false;
        for opt in &options {
            match *opt {
                ConfigOption::Mtu(mtu) => self.peer_mtu = mtu,
                ConfigOption::Rfc(rfc) if rfc.mode == ChannelMode::EnhancedRetransmission => {
                    negotiated_erm = true;
                    self.erm.get_or_insert_with(|| {
                        ErmChannel::new(
                            self.handle,
                            self.local_cid,
                            self.remote_cid,
                            ErmConfig {
                                mtu: self.peer_mtu.max(self.local_mtu),
                                mps: rfc.max_pdu_size,
                                tx_window: rfc.tx_window,
                                max_transmit: rfc.max_transmit,
                            },
                        )
                    });
                }
                _ => {}
            }
        }
        self.peer_done = true;
        let _ = negotiated_erm;
        self.state = match self.state {
            State::WaitConfig => State::WaitSendConfig,
            State::WaitConfigReqRsp => State::WaitConfigReq,
            State::WaitConfigReq => {
                self.advance_on_both_done();
                State::WaitConfigReq
            }
            s => s,
        };
        self.advance_on_both_done();
        Ok(Ok(options))
    }

    /// Records our own `L2CAP_Configure_Response` having been sent with
    /// `Success`.
    pub fn on_configure_response_sent(&mut self) {
        self.local_done = true;
        self.state = match self.state {
            State::WaitSendConfig => State::WaitConfigReq,
            State::WaitConfigReq => {
                self.advance_on_both_done();
                State::WaitConfigReq
            }
            s => s,
        };
        self.advance_on_both_done();
    }

    /// Processes the peer's `L2CAP_Configure_Response` to our own request.
    pub fn on_configure_response(&mut self, accepted: bool) -> Result<()> {
        if !accepted {
            self.state = State::Closed;
            return Err(Error::protocol("peer rejected configuration"));
        }
        self.local_done = true;
        self.state = match self.state {
            State::WaitConfigReqRsp => State::WaitConfigReq,
            State::WaitConfigRsp => {
                self.advance_on_both_done();
                State::WaitConfigRsp
            }
            s => s,
        };
        self.advance_on_both_done();
        Ok(())
    }

    fn advance_on_both_done(&mut self) {
        if self.local_done && self.peer_done {
            self.state = State::Open;
        }
    }

    /// Starts disconnection, e.g. after sending `L2CAP_Disconnection_Request`.
    pub fn begin_disconnect(&mut self) {
        self.state = State::WaitDisconnect;
    }

    /// Completes disconnection on either request or response.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Returns the Enhanced Retransmission Mode sub-channel, once
    /// negotiated.
    pub fn erm(&mut self) -> Option<&mut ErmChannel> {
        self.erm.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_mode_handshake_reaches_open() {
        let mut a = ClassicChannel::connecting(ConnHandle::new(1).unwrap(), 0x40, 0x0001, false);
        a.on_connection_response(0x41, ConnectionResult::Success).unwrap();
        assert_eq!(a.state(), State::WaitConfig);

        let req = a.build_configure_request();
        assert_eq!(a.state(), State::WaitConfigReqRsp);

        let mut b =
            ClassicChannel::accepted(ConnHandle::new(1).unwrap(), 0x41, 0x40, 0x0001, false);
        let echoed = b.on_configure_request(&req).unwrap().unwrap();
        assert!(!echoed.is_empty());
        b.on_configure_response_sent();
        assert_eq!(b.state(), State::WaitConfigReq);

        let req_b = b.build_configure_request();
        a.on_configure_request(&req_b).unwrap().unwrap();
        a.on_configure_response_sent();
        a.on_configure_response(true).unwrap();
        assert_eq!(a.state(), State::Open);

        b.on_configure_response(true).unwrap();
        assert_eq!(b.state(), State::Open);
    }

    #[test]
    fn unknown_mandatory_option_fails_config() {
        let mut b =
            ClassicChannel::accepted(ConnHandle::new(1).unwrap(), 0x41, 0x40, 0x0001, false);
        let bad = vec![0x20, 1, 0xAA];
        let result = b.on_configure_request(&bad).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn erm_negotiation_creates_sub_channel() {
        let mut a = ClassicChannel::connecting(ConnHandle::new(1).unwrap(), 0x40, 0x0001, true);
        a.on_connection_response(0x41, ConnectionResult::Success).unwrap();
        let req = a.build_configure_request();

        let mut b = ClassicChannel::accepted(ConnHandle::new(1).unwrap(), 0x41, 0x40, 0x0001, true);
        b.on_configure_request(&req).unwrap().unwrap();
        assert!(b.erm().is_some());
    }
}
