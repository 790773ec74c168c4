//! CS101 link layer (spec.md §3, component C5): the FCB/FCV
//! toggle-and-acknowledge discipline layered on top of FT 1.2 framing.
//!
//! Three roles, mirroring `link_layer.h`'s three implementations:
//! - [`PrimaryUnbalanced`]: a master polling N slaves in turn, one
//!   link-layer state machine per slave address.
//! - [`SecondaryUnbalanced`]: a slave answering a single primary's
//!   polls (reset / class-1 / class-2 requests).
//! - [`Balanced`]: either peer in a balanced link, acting as primary
//!   and secondary simultaneously (both sides can originate user data).
//!
//! This module only produces/consumes [`crate::ft12::Frame`] values and
//! tracks FCB/FCV state; it does not perform I/O — callers drive it
//! with frames already read from (or about to be written to) the wire.

use std::collections::HashMap;

use crate::common::link_function as func;
use crate::error::{IecError, IecResult};
use crate::ft12::Frame;

/// Link-layer availability, mirroring lib60870's
/// `IEC60870_LinkLayerStateChangedHandler` state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayerState {
    /// No communication attempted yet.
    Idle,
    /// Repeated timeouts; link presumed down.
    Error,
    /// A request is outstanding, awaiting a response.
    Busy,
    /// Last exchange succeeded; link is usable.
    Available,
}

/// A primary-unbalanced node's per-slave link-layer state.
#[derive(Debug, Clone)]
struct PrimarySlaveState {
    fcb: bool,
    state: LinkLayerState,
    consecutive_timeouts: u32,
}

impl PrimarySlaveState {
    fn new() -> Self {
        Self {
            fcb: false,
            state: LinkLayerState::Idle,
            consecutive_timeouts: 0,
        }
    }
}

/// Outcome of feeding a response frame to [`PrimaryUnbalanced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryEvent {
    /// RESET_REMOTE_LINK was acknowledged; FCB is reinitialized.
    LinkReset,
    /// The slave had no data available (NACK, or ACK to a poll).
    NoData,
    /// The slave returned user data (class 1 or 2, or balanced reply).
    UserData(Vec<u8>),
    /// The slave signalled access demand (more class-1 data pending).
    AccessDemand,
    /// The slave rejected the request outright.
    Nack,
}

/// Primary station of an unbalanced link: one state machine per slave
/// address, toggling FCB on every confirmed send per spec.md's FCB/FCV
/// discipline.
pub struct PrimaryUnbalanced {
    address_len: usize,
    max_timeouts_before_error: u32,
    slaves: HashMap<u32, PrimarySlaveState>,
}

impl PrimaryUnbalanced {
    pub fn new(address_len: usize) -> Self {
        Self {
            address_len,
            max_timeouts_before_error: 3,
            slaves: HashMap::new(),
        }
    }

    pub fn add_slave(&mut self, address: u32) {
        self.slaves.entry(address).or_insert_with(PrimarySlaveState::new);
    }

    pub fn state_of(&self, address: u32) -> Option<LinkLayerState> {
        self.slaves.get(&address).map(|s| s.state)
    }

    pub fn is_channel_available(&self, address: u32) -> bool {
        matches!(
            self.slaves.get(&address).map(|s| s.state),
            Some(LinkLayerState::Available) | Some(LinkLayerState::Idle)
        )
    }

    /// Builds the RESET_REMOTE_LINK frame for `address` and marks the
    /// slave busy awaiting its acknowledgement.
    pub fn build_reset_remote_link(&mut self, address: u32) -> IecResult<Frame> {
        let slave = self.slave_mut(address)?;
        slave.state = LinkLayerState::Busy;
        slave.fcb = false;
        Ok(Frame::Fixed {
            control: func::RESET_REMOTE_LINK | 0x40,
            address,
        })
    }

    /// Builds a class-1 or class-2 data request frame, toggling FCB.
    pub fn build_data_request(&mut self, address: u32, class1: bool) -> IecResult<Frame> {
        let slave = self.slave_mut(address)?;
        let function = if class1 { func::REQ_CLASS_1_DATA } else { func::REQ_CLASS_2_DATA };
        let control = function | 0x40 | fcb_bit(slave.fcb);
        slave.state = LinkLayerState::Busy;
        Ok(Frame::Fixed { control, address })
    }

    /// Builds a confirmed user-data frame and toggles FCB for the next
    /// exchange (the sender alternates FCB each *new* confirmed send,
    /// not on retransmission of the same one).
    pub fn build_send_confirmed(&mut self, address: u32, data: Vec<u8>) -> IecResult<Frame> {
        let slave = self.slave_mut(address)?;
        let control = func::USER_DATA_CONFIRMED | 0x40 | fcb_bit(slave.fcb);
        slave.fcb = !slave.fcb;
        slave.state = LinkLayerState::Busy;
        Ok(Frame::Variable {
            control,
            address,
            data,
        })
    }

    /// Feeds a response frame received from `address`.
    pub fn handle_response(&mut self, address: u32, frame: Frame) -> IecResult<PrimaryEvent> {
        let slave = self.slave_mut(address)?;
        slave.consecutive_timeouts = 0;
        slave.state = LinkLayerState::Available;
        match frame {
            Frame::Ack => Ok(PrimaryEvent::NoData),
            Frame::Fixed { control, .. } => match control & 0x0F {
                f if f == func::RESP_ACK => Ok(PrimaryEvent::LinkReset),
                f if f == func::RESP_NACK || f == func::RESP_NACK_NO_DATA => Ok(PrimaryEvent::Nack),
                f if f == func::RESP_STATUS_LINK_ACCESS_DEMAND => Ok(PrimaryEvent::AccessDemand),
                other => Err(IecError::ProtocolViolation(format!(
                    "unexpected primary-unbalanced response function {other}"
                ))),
            },
            Frame::Variable { control, data, .. } => {
                if control & 0x0F == func::RESP_USER_DATA {
                    Ok(PrimaryEvent::UserData(data))
                } else {
                    Err(IecError::ProtocolViolation(
                        "variable frame with non-user-data function code".into(),
                    ))
                }
            }
        }
    }

    /// Records a timeout waiting for `address`'s response. Returns
    /// true once the slave has crossed into the `Error` state.
    pub fn handle_timeout(&mut self, address: u32) -> IecResult<bool> {
        let slave = self.slave_mut(address)?;
        slave.consecutive_timeouts += 1;
        if slave.consecutive_timeouts >= self.max_timeouts_before_error {
            slave.state = LinkLayerState::Error;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn slave_mut(&mut self, address: u32) -> IecResult<&mut PrimarySlaveState> {
        self.slaves
            .get_mut(&address)
            .ok_or_else(|| IecError::ProtocolViolation(format!("unknown slave address {address}")))
    }

    pub fn address_len(&self) -> usize {
        self.address_len
    }
}

fn fcb_bit(fcb: bool) -> u8 {
    if fcb { 0x20 } else { 0 }
}

/// Outcome of feeding a request frame to [`SecondaryUnbalanced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryEvent {
    /// Primary sent user data; this is it, already stripped of the
    /// link-layer control/address prefix.
    UserData(Vec<u8>),
    /// Primary requested class-1 or class-2 data; `class1` distinguishes.
    DataRequest { class1: bool },
    /// Primary asked us to reset the link (reinitialize FCB tracking).
    ResetLink,
    /// Primary asked for link status (used for idle polling / keepalive).
    StatusRequest,
}

/// Secondary station of an unbalanced link (a single slave answering
/// one primary).
pub struct SecondaryUnbalanced {
    address: u32,
    expected_fcb: Option<bool>,
}

impl SecondaryUnbalanced {
    pub fn new(address: u32) -> Self {
        Self {
            address,
            expected_fcb: None,
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    /// Processes a frame addressed to this secondary, returning the
    /// application event plus whether the caller must reply.
    pub fn handle_request(&mut self, frame: Frame) -> IecResult<SecondaryEvent> {
        match frame {
            Frame::Fixed { control, .. } => {
                let function = control & 0x0F;
                let fcb = (control & 0x20) != 0;
                let fcv = (control & 0x10) != 0;
                match function {
                    f if f == func::RESET_REMOTE_LINK => {
                        self.expected_fcb = None;
                        Ok(SecondaryEvent::ResetLink)
                    }
                    f if f == func::REQ_STATUS_LINK => Ok(SecondaryEvent::StatusRequest),
                    f if f == func::REQ_CLASS_1_DATA => {
                        self.check_and_update_fcb(fcv, fcb)?;
                        Ok(SecondaryEvent::DataRequest { class1: true })
                    }
                    f if f == func::REQ_CLASS_2_DATA => {
                        self.check_and_update_fcb(fcv, fcb)?;
                        Ok(SecondaryEvent::DataRequest { class1: false })
                    }
                    other => Err(IecError::ProtocolViolation(format!(
                        "unexpected secondary-unbalanced request function {other}"
                    ))),
                }
            }
            Frame::Variable { control, data, .. } => {
                let function = control & 0x0F;
                let fcb = (control & 0x20) != 0;
                let fcv = (control & 0x10) != 0;
                if function == func::USER_DATA_CONFIRMED || function == func::USER_DATA_NO_REPLY {
                    if function == func::USER_DATA_CONFIRMED {
                        self.check_and_update_fcb(fcv, fcb)?;
                    }
                    Ok(SecondaryEvent::UserData(data))
                } else {
                    Err(IecError::ProtocolViolation(
                        "unexpected secondary-unbalanced variable frame function".into(),
                    ))
                }
            }
            Frame::Ack => Err(IecError::ProtocolViolation(
                "secondary received bare ACK as a request".into(),
            )),
        }
    }

    /// Duplicate-detection: if FCV is set and this FCB repeats the last
    /// one we acted on, the caller should resend the prior reply
    /// rather than act twice (spec.md's retransmission-dedup rule).
    fn check_and_update_fcb(&mut self, fcv: bool, fcb: bool) -> IecResult<()> {
        if fcv {
            if self.expected_fcb == Some(fcb) {
                return Err(IecError::ProtocolViolation("duplicate-fcb-replay".into()));
            }
            self.expected_fcb = Some(fcb);
        }
        Ok(())
    }

    pub fn build_ack(&self) -> Frame {
        Frame::Fixed {
            control: func::RESP_ACK,
            address: self.address,
        }
    }

    pub fn build_nack(&self) -> Frame {
        Frame::Fixed {
            control: func::RESP_NACK_NO_DATA,
            address: self.address,
        }
    }

    pub fn build_user_data(&self, data: Vec<u8>) -> Frame {
        Frame::Variable {
            control: func::RESP_USER_DATA,
            address: self.address,
            data,
        }
    }
}

/// A balanced-link peer: acts as primary (can originate sends) and
/// secondary (answers the other side's sends) at once, each with its
/// own independent FCB.
pub struct Balanced {
    address: u32,
    own_fcb: bool,
    peer_expected_fcb: Option<bool>,
}

impl Balanced {
    pub fn new(address: u32) -> Self {
        Self {
            address,
            own_fcb: false,
            peer_expected_fcb: None,
        }
    }

    pub fn build_send_confirmed(&mut self, data: Vec<u8>) -> Frame {
        let control = func::USER_DATA_CONFIRMED | 0x40 | fcb_bit(self.own_fcb);
        self.own_fcb = !self.own_fcb;
        Frame::Variable {
            control,
            address: self.address,
            data,
        }
    }

    pub fn build_send_no_reply(&self, data: Vec<u8>) -> Frame {
        Frame::Variable {
            control: func::USER_DATA_NO_REPLY,
            address: self.address,
            data,
        }
    }

    pub fn handle_incoming(&mut self, frame: Frame) -> IecResult<SecondaryEvent> {
        match frame {
            Frame::Variable { control, data, .. } => {
                let function = control & 0x0F;
                let fcb = (control & 0x20) != 0;
                let fcv = (control & 0x10) != 0;
                if function == func::USER_DATA_CONFIRMED {
                    if fcv {
                        if self.peer_expected_fcb == Some(fcb) {
                            return Err(IecError::ProtocolViolation("duplicate-fcb-replay".into()));
                        }
                        self.peer_expected_fcb = Some(fcb);
                    }
                    Ok(SecondaryEvent::UserData(data))
                } else if function == func::USER_DATA_NO_REPLY {
                    Ok(SecondaryEvent::UserData(data))
                } else {
                    Err(IecError::ProtocolViolation(
                        "unexpected balanced-link variable frame function".into(),
                    ))
                }
            }
            Frame::Fixed { control, .. } if control & 0x0F == func::REQ_STATUS_LINK => {
                Ok(SecondaryEvent::StatusRequest)
            }
            other => Err(IecError::ProtocolViolation(format!(
                "unexpected balanced-link frame {other:?}"
            ))),
        }
    }

    pub fn build_ack(&self) -> Frame {
        Frame::Fixed {
            control: func::RESP_ACK,
            address: self.address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_reset_then_class2_poll_toggles_fcb() {
        let mut primary = PrimaryUnbalanced::new(1);
        primary.add_slave(5);
        let reset = primary.build_reset_remote_link(5).unwrap();
        assert_eq!(reset, Frame::Fixed { control: func::RESET_REMOTE_LINK | 0x40, address: 5 });
        let event = primary
            .handle_response(5, Frame::Fixed { control: func::RESP_ACK, address: 5 })
            .unwrap();
        assert_eq!(event, PrimaryEvent::LinkReset);
        assert_eq!(primary.state_of(5), Some(LinkLayerState::Available));

        let poll = primary.build_data_request(5, false).unwrap();
        assert!(matches!(poll, Frame::Fixed { .. }));
    }

    #[test]
    fn primary_error_after_repeated_timeouts() {
        let mut primary = PrimaryUnbalanced::new(1);
        primary.add_slave(9);
        assert!(!primary.handle_timeout(9).unwrap());
        assert!(!primary.handle_timeout(9).unwrap());
        assert!(primary.handle_timeout(9).unwrap());
        assert_eq!(primary.state_of(9), Some(LinkLayerState::Error));
    }

    #[test]
    fn secondary_detects_duplicate_fcb_retransmission() {
        let mut secondary = SecondaryUnbalanced::new(2);
        let request = |fcb: bool| Frame::Fixed {
            control: func::REQ_CLASS_2_DATA | 0x40 | 0x10 | if fcb { 0x20 } else { 0 },
            address: 2,
        };
        let first = secondary.handle_request(request(false)).unwrap();
        assert_eq!(first, SecondaryEvent::DataRequest { class1: false });
        let dup = secondary.handle_request(request(false));
        assert!(dup.is_err());
        let next = secondary.handle_request(request(true)).unwrap();
        assert_eq!(next, SecondaryEvent::DataRequest { class1: false });
    }

    #[test]
    fn balanced_round_trip_user_data() {
        let mut a = Balanced::new(0);
        let mut b = Balanced::new(0);
        let frame = a.build_send_confirmed(vec![1, 2, 3]);
        let event = b.handle_incoming(frame).unwrap();
        assert_eq!(event, SecondaryEvent::UserData(vec![1, 2, 3]));
    }
}
