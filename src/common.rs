//! Shared constants and parameter types: quality descriptors, cause of
//! transmission, and the application-layer / APCI parameter sets that
//! fix wire layout for a session (spec.md §3).

use std::fmt;
use std::time::Duration;

use crate::error::{IecError, IecResult};

/// Quality Descriptor flags shared by most measured/point information
/// objects. Bit layout: OV(0x01) BL(0x10) SB(0x20) NT(0x40) IV(0x80).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityDescriptor {
    /// Overflow.
    pub overflow: bool,
    /// Blocked: value is blocked for transmission by a local lock.
    pub blocked: bool,
    /// Substituted: value was provided by the operator, not the process.
    pub substituted: bool,
    /// Not topical: value is outdated.
    pub not_topical: bool,
    /// Invalid: value is not usable.
    pub invalid: bool,
}

impl QualityDescriptor {
    pub const GOOD: Self = Self {
        overflow: false,
        blocked: false,
        substituted: false,
        not_topical: false,
        invalid: false,
    };

    pub fn from_byte(value: u8) -> Self {
        Self {
            overflow: (value & 0x01) != 0,
            blocked: (value & 0x10) != 0,
            substituted: (value & 0x20) != 0,
            not_topical: (value & 0x40) != 0,
            invalid: (value & 0x80) != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut value = 0u8;
        if self.overflow {
            value |= 0x01;
        }
        if self.blocked {
            value |= 0x10;
        }
        if self.substituted {
            value |= 0x20;
        }
        if self.not_topical {
            value |= 0x40;
        }
        if self.invalid {
            value |= 0x80;
        }
        value
    }
}

/// Cause of Transmission (COT), the low 6 bits of the ASDU's COT byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CauseOfTransmission {
    Periodic = 1,
    Background = 2,
    Spontaneous = 3,
    Initialized = 4,
    Request = 5,
    Activation = 6,
    ActivationConfirmation = 7,
    Deactivation = 8,
    DeactivationConfirmation = 9,
    ActivationTermination = 10,
    RemoteCommand = 11,
    LocalCommand = 12,
    FileTransfer = 13,
    Authentication = 14,
    SessionKey = 15,
    UserRoleAndAuthKey = 16,
    StationInterrogation = 20,
    Group1Interrogation = 21,
    Group2Interrogation = 22,
    Group3Interrogation = 23,
    Group4Interrogation = 24,
    Group5Interrogation = 25,
    Group6Interrogation = 26,
    Group7Interrogation = 27,
    Group8Interrogation = 28,
    Group9Interrogation = 29,
    Group10Interrogation = 30,
    Group11Interrogation = 31,
    Group12Interrogation = 32,
    Group13Interrogation = 33,
    Group14Interrogation = 34,
    Group15Interrogation = 35,
    Group16Interrogation = 36,
    GeneralCounterRequest = 37,
    Group1CounterRequest = 38,
    Group2CounterRequest = 39,
    Group3CounterRequest = 40,
    Group4CounterRequest = 41,
    UnknownTypeId = 44,
    UnknownCauseOfTransmission = 45,
    UnknownCommonAddress = 46,
    UnknownInfoObjAddress = 47,
}

impl CauseOfTransmission {
    pub fn from_byte(value: u8) -> Option<Self> {
        use CauseOfTransmission::*;
        Some(match value {
            1 => Periodic,
            2 => Background,
            3 => Spontaneous,
            4 => Initialized,
            5 => Request,
            6 => Activation,
            7 => ActivationConfirmation,
            8 => Deactivation,
            9 => DeactivationConfirmation,
            10 => ActivationTermination,
            11 => RemoteCommand,
            12 => LocalCommand,
            13 => FileTransfer,
            14 => Authentication,
            15 => SessionKey,
            16 => UserRoleAndAuthKey,
            20 => StationInterrogation,
            21 => Group1Interrogation,
            22 => Group2Interrogation,
            23 => Group3Interrogation,
            24 => Group4Interrogation,
            25 => Group5Interrogation,
            26 => Group6Interrogation,
            27 => Group7Interrogation,
            28 => Group8Interrogation,
            29 => Group9Interrogation,
            30 => Group10Interrogation,
            31 => Group11Interrogation,
            32 => Group12Interrogation,
            33 => Group13Interrogation,
            34 => Group14Interrogation,
            35 => Group15Interrogation,
            36 => Group16Interrogation,
            37 => GeneralCounterRequest,
            38 => Group1CounterRequest,
            39 => Group2CounterRequest,
            40 => Group3CounterRequest,
            41 => Group4CounterRequest,
            44 => UnknownTypeId,
            45 => UnknownCauseOfTransmission,
            46 => UnknownCommonAddress,
            47 => UnknownInfoObjAddress,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Width of the Common Address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonAddrSize {
    OneOctet = 1,
    TwoOctets = 2,
}

/// Width of the Information Object Address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoObjAddrSize {
    OneOctet = 1,
    TwoOctets = 2,
    ThreeOctets = 3,
}

impl InfoObjAddrSize {
    pub fn bytes(self) -> usize {
        self as usize
    }
}

/// Application-layer parameters (ALP): the fixed field widths both
/// peers in a session agree on. See spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationLayerParameters {
    pub size_of_cot: u8, // 1 or 2 (2 => OA present)
    pub common_address_size: CommonAddrSize,
    pub info_obj_addr_size: InfoObjAddrSize,
    pub originator_address: u8,
    pub max_size_of_asdu: usize,
}

impl Default for ApplicationLayerParameters {
    fn default() -> Self {
        Self {
            size_of_cot: 2,
            common_address_size: CommonAddrSize::TwoOctets,
            info_obj_addr_size: InfoObjAddrSize::ThreeOctets,
            originator_address: 0,
            max_size_of_asdu: 249,
        }
    }
}

impl ApplicationLayerParameters {
    /// Parameters matching the common CS101 8-bit-address convention:
    /// 1-byte COT/CA/IOA (no OA, no sequence addresses).
    pub fn cs101_compact() -> Self {
        Self {
            size_of_cot: 1,
            common_address_size: CommonAddrSize::OneOctet,
            info_obj_addr_size: InfoObjAddrSize::OneOctet,
            originator_address: 0,
            max_size_of_asdu: 249,
        }
    }

    pub fn build(self) -> IecResult<Self> {
        if self.size_of_cot != 1 && self.size_of_cot != 2 {
            return Err(IecError::ConfigError(format!(
                "size_of_cot must be 1 or 2, got {}",
                self.size_of_cot
            )));
        }
        if self.max_size_of_asdu == 0 || self.max_size_of_asdu > 249 {
            return Err(IecError::ConfigError(format!(
                "max_size_of_asdu {} out of range (1..=249)",
                self.max_size_of_asdu
            )));
        }
        Ok(self)
    }

    pub fn with_originator_address(mut self, oa: u8) -> Self {
        self.originator_address = oa;
        self
    }

    pub fn header_len(&self) -> usize {
        1 /* type id */ + 1 /* vsq */ + self.size_of_cot as usize
            + self.common_address_size as usize
    }
}

/// CS104 APCI parameters (spec.md §3): window size `k`, ack trigger
/// `w`, and timers `t0..t3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApciParameters {
    pub k: u16,
    pub w: u16,
    pub t0: Duration,
    pub t1: Duration,
    pub t2: Duration,
    pub t3: Duration,
}

impl Default for ApciParameters {
    fn default() -> Self {
        Self {
            k: 12,
            w: 8,
            t0: Duration::from_secs(10),
            t1: Duration::from_secs(15),
            t2: Duration::from_secs(10),
            t3: Duration::from_secs(20),
        }
    }
}

impl ApciParameters {
    pub fn build(self) -> IecResult<Self> {
        if self.k == 0 {
            return Err(IecError::ConfigError("k must be > 0".into()));
        }
        if self.w == 0 || self.w > self.k {
            return Err(IecError::ConfigError(format!(
                "w ({}) must be in 1..=k ({})",
                self.w, self.k
            )));
        }
        if self.t2 >= self.t1 {
            return Err(IecError::ConfigError(format!(
                "t2 ({:?}) must be < t1 ({:?})",
                self.t2, self.t1
            )));
        }
        Ok(self)
    }
}

/// Function codes used by the CS101 unbalanced primary station.
pub mod link_function {
    pub const RESET_REMOTE_LINK: u8 = 0;
    pub const RESET_USER_PROCESS: u8 = 1;
    pub const USER_DATA_CONFIRMED: u8 = 3;
    pub const USER_DATA_NO_REPLY: u8 = 4;
    pub const REQ_STATUS_LINK: u8 = 9;
    pub const REQ_CLASS_1_DATA: u8 = 10;
    pub const REQ_CLASS_2_DATA: u8 = 11;

    /// Secondary -> primary responses.
    pub const RESP_ACK: u8 = 0;
    pub const RESP_NACK: u8 = 1;
    pub const RESP_USER_DATA: u8 = 8;
    pub const RESP_NACK_NO_DATA: u8 = 9;
    pub const RESP_STATUS_LINK_ACCESS_DEMAND: u8 = 11;
    pub const RESP_LINK_NOT_FUNCTIONING: u8 = 14;
    pub const RESP_LINK_NOT_IMPLEMENTED: u8 = 15;
}

impl fmt::Display for CauseOfTransmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.to_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_byte_round_trip() {
        let q = QualityDescriptor {
            overflow: true,
            blocked: false,
            substituted: true,
            not_topical: false,
            invalid: true,
        };
        assert_eq!(QualityDescriptor::from_byte(q.to_byte()), q);
    }

    #[test]
    fn cot_round_trip() {
        for byte in [1u8, 6, 7, 10, 20, 47] {
            let cot = CauseOfTransmission::from_byte(byte).unwrap();
            assert_eq!(cot.to_byte(), byte);
        }
        assert!(CauseOfTransmission::from_byte(0).is_none());
    }

    #[test]
    fn apci_parameters_reject_bad_window() {
        let bad = ApciParameters {
            w: 0,
            ..Default::default()
        };
        assert!(bad.build().is_err());
    }

    #[test]
    fn apci_parameters_reject_t2_ge_t1() {
        let bad = ApciParameters {
            t1: Duration::from_secs(5),
            t2: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(bad.build().is_err());
    }
}
