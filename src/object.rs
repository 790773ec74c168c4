//! Information objects: the ≈60 enumerated ASDU payload shapes
//! (spec.md §3, component C2).
//!
//! Rather than the original's per-type-id downcast hierarchy
//! (`InformationObject` as an opaque struct pointer with per-subtype
//! getters), this is a tagged sum (`IoBody`) over the payload
//! *categories* the standard actually distinguishes — point, measured
//! value, command, system command, parameter, file — with the time-tag
//! width (none / CP24 / CP56) carried as data rather than duplicated
//! into a separate variant per category. [`TypeId`] alone decides which
//! width is legal for a given wire type; [`encode`]/[`decode`] take it
//! as an explicit parameter (mirroring how a real ASDU carries one
//! type-id for every element it holds, per the "all elements share
//! type_id" invariant, so an isolated `InformationObject` never needs
//! to carry its own type-id).

use crate::codec;
use crate::common::{InfoObjAddrSize, QualityDescriptor};
use crate::error::{IecError, IecResult};
use crate::time::{CP24Time2a, CP56Time2a};

/// Wire type identifiers. Values per IEC 60870-5-101/104.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    MSpNa1 = 1,
    MSpTa1 = 2,
    MDpNa1 = 3,
    MDpTa1 = 4,
    MStNa1 = 5,
    MStTa1 = 6,
    MBoNa1 = 7,
    MBoTa1 = 8,
    MMeNa1 = 9,
    MMeTa1 = 10,
    MMeNb1 = 11,
    MMeTb1 = 12,
    MMeNc1 = 13,
    MMeTc1 = 14,
    MItNa1 = 15,
    MItTa1 = 16,
    MEpTa1 = 17,
    MEpTb1 = 18,
    MEpTc1 = 19,
    MPsNa1 = 20,
    MMeNd1 = 21,
    MSpTb1 = 30,
    MDpTb1 = 31,
    MStTb1 = 32,
    MBoTb1 = 33,
    MMeTd1 = 34,
    MMeTe1 = 35,
    MMeTf1 = 36,
    MItTb1 = 37,
    MEpTd1 = 38,
    MEpTe1 = 39,
    MEpTf1 = 40,
    CScNa1 = 45,
    CDcNa1 = 46,
    CRcNa1 = 47,
    CSeNa1 = 48,
    CSeNb1 = 49,
    CSeNc1 = 50,
    CBoNa1 = 51,
    CScTa1 = 58,
    CDcTa1 = 59,
    CRcTa1 = 60,
    CSeTa1 = 61,
    CSeTb1 = 62,
    CSeTc1 = 63,
    CBoTa1 = 64,
    MEiNa1 = 70,
    CIcNa1 = 100,
    CCiNa1 = 101,
    CRdNa1 = 102,
    CCsNa1 = 103,
    CTsNa1 = 104,
    CRpNa1 = 105,
    CCdNa1 = 106,
    CTsTa1 = 107,
    PMeNa1 = 110,
    PMeNb1 = 111,
    PMeNc1 = 112,
    PAcNa1 = 113,
    FFrNa1 = 120,
    FSrNa1 = 121,
    FScNa1 = 122,
    FLsNa1 = 123,
    FAfNa1 = 124,
    FSgNa1 = 125,
    FDrTa1 = 126,
    FScNb1 = 127,
}

impl TypeId {
    pub fn from_u8(value: u8) -> IecResult<Self> {
        use TypeId::*;
        Ok(match value {
            1 => MSpNa1,
            2 => MSpTa1,
            3 => MDpNa1,
            4 => MDpTa1,
            5 => MStNa1,
            6 => MStTa1,
            7 => MBoNa1,
            8 => MBoTa1,
            9 => MMeNa1,
            10 => MMeTa1,
            11 => MMeNb1,
            12 => MMeTb1,
            13 => MMeNc1,
            14 => MMeTc1,
            15 => MItNa1,
            16 => MItTa1,
            17 => MEpTa1,
            18 => MEpTb1,
            19 => MEpTc1,
            20 => MPsNa1,
            21 => MMeNd1,
            30 => MSpTb1,
            31 => MDpTb1,
            32 => MStTb1,
            33 => MBoTb1,
            34 => MMeTd1,
            35 => MMeTe1,
            36 => MMeTf1,
            37 => MItTb1,
            38 => MEpTd1,
            39 => MEpTe1,
            40 => MEpTf1,
            45 => CScNa1,
            46 => CDcNa1,
            47 => CRcNa1,
            48 => CSeNa1,
            49 => CSeNb1,
            50 => CSeNc1,
            51 => CBoNa1,
            58 => CScTa1,
            59 => CDcTa1,
            60 => CRcTa1,
            61 => CSeTa1,
            62 => CSeTb1,
            63 => CSeTc1,
            64 => CBoTa1,
            70 => MEiNa1,
            100 => CIcNa1,
            101 => CCiNa1,
            102 => CRdNa1,
            103 => CCsNa1,
            104 => CTsNa1,
            105 => CRpNa1,
            106 => CCdNa1,
            107 => CTsTa1,
            110 => PMeNa1,
            111 => PMeNb1,
            112 => PMeNc1,
            113 => PAcNa1,
            120 => FFrNa1,
            121 => FSrNa1,
            122 => FScNa1,
            123 => FLsNa1,
            124 => FAfNa1,
            125 => FSgNa1,
            126 => FDrTa1,
            127 => FScNb1,
            other => {
                return Err(IecError::InvalidEncoding(format!(
                    "unknown type id {other}"
                )))
            }
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is a monitoring-direction type (M_*), as opposed
    /// to a control-direction command (C_*), parameter (P_*), or file
    /// (F_*) type. Used by the server's command dispatch to reject
    /// monitoring types arriving on the control direction.
    pub fn is_monitoring(self) -> bool {
        matches!(self.to_u8(), 1..=40 | 70)
    }
}

/// Double point value (spec.md §3 "step position"/"point" categories).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DoublePointValue {
    Intermediate = 0,
    Off = 1,
    On = 2,
    Indeterminate = 3,
}

impl DoublePointValue {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Intermediate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::Indeterminate,
        }
    }
}

/// Regulating step command value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StepCommandValue {
    NotPermittedA = 0,
    Lower = 1,
    Higher = 2,
    NotPermittedB = 3,
}

impl StepCommandValue {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::NotPermittedA,
            1 => Self::Lower,
            2 => Self::Higher,
            _ => Self::NotPermittedB,
        }
    }
}

/// A time tag attached to a timestamped information object. Width is
/// implied by the type-id category (CP24 for "TA_1"-class types, CP56
/// for "TB_1"/104 types), not stored redundantly here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTag {
    Cp24(CP24Time2a),
    Cp56(CP56Time2a),
}

/// One information object: an address plus a type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InformationObject {
    pub ioa: u32,
    pub body: IoBody,
}

/// The type-specific payload, grouped by category rather than by
/// individual wire type-id (see module docs).
#[derive(Debug, Clone, PartialEq)]
pub enum IoBody {
    SinglePoint {
        value: bool,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    DoublePoint {
        value: DoublePointValue,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    StepPosition {
        value: i8,
        transient: bool,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    Bitstring32 {
        value: u32,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    MeasuredValueNormalized {
        value: i16,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    MeasuredValueScaled {
        value: i16,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    MeasuredValueShort {
        value: f32,
        quality: QualityDescriptor,
        time: Option<TimeTag>,
    },
    /// Integrated totals (counter reading). `sequence` packs the
    /// 5-bit sequence number with the carry/adjusted/invalid flags in
    /// its top 3 bits, per the standard's BCR octet.
    IntegratedTotals {
        counter: i32,
        sequence: u8,
        time: Option<TimeTag>,
    },
    /// Protection equipment event (17/38): relay operation with
    /// elapsed time, always timestamped.
    EventOfProtectionEquipment {
        event: u8,
        relay_duration_ms: u16,
        quality: QualityDescriptor,
        time: TimeTag,
    },
    /// Packed start events of protection equipment (18/39).
    PackedStartEvents {
        event_flags: u8,
        quality: QualityDescriptor,
        time: TimeTag,
    },
    /// Packed output circuit information (19/40).
    PackedOutputCircuitInfo {
        oci: u8,
        quality: QualityDescriptor,
        time: TimeTag,
    },
    /// Packed single point with status change detection (20). No time
    /// variant exists for this type.
    PackedSinglePointWithScd {
        status: u16,
        change_detect: u16,
        quality: QualityDescriptor,
    },
    /// Measured value, normalized, without quality descriptor (21).
    MeasuredValueNormalizedNoQuality { value: i16 },
    SingleCommand {
        value: bool,
        qualifier: u8,
        select: bool,
        time: Option<TimeTag>,
    },
    DoubleCommand {
        value: DoublePointValue,
        qualifier: u8,
        select: bool,
        time: Option<TimeTag>,
    },
    RegulatingStepCommand {
        value: StepCommandValue,
        qualifier: u8,
        select: bool,
        time: Option<TimeTag>,
    },
    SetpointNormalized {
        value: i16,
        qualifier: u8,
        select: bool,
        time: Option<TimeTag>,
    },
    SetpointScaled {
        value: i16,
        qualifier: u8,
        select: bool,
        time: Option<TimeTag>,
    },
    SetpointShort {
        value: f32,
        qualifier: u8,
        select: bool,
        time: Option<TimeTag>,
    },
    Bitstring32Command {
        value: u32,
        time: Option<TimeTag>,
    },
    /// End of initialization (70): cause-of-initialization byte.
    EndOfInitialization { coi: u8 },
    InterrogationCommand { qoi: u8 },
    CounterInterrogationCommand { qcc: u8 },
    ReadCommand,
    ClockSynchronizationCommand { time: CP56Time2a },
    /// Legacy test command (104): fixed two-byte test pattern.
    TestCommand,
    TestCommandWithTimestamp { test_sequence_counter: u16, time: CP56Time2a },
    ResetProcessCommand { qrp: u8 },
    DelayAcquisitionCommand { delay_ms: u16 },
    ParameterNormalized { value: i16, qpm: u8 },
    ParameterScaled { value: i16, qpm: u8 },
    ParameterShort { value: f32, qpm: u8 },
    ParameterActivation { qpa: u8 },
    FileReady {
        name_of_file: u16,
        length_of_file: u32,
        frq: u8,
    },
    SectionReady {
        name_of_file: u16,
        name_of_section: u8,
        length_of_section: u32,
        srq: u8,
    },
    FileCallOrSelect {
        name_of_file: u16,
        name_of_section: u8,
        scq: u8,
    },
    FileLastSegmentOrSection {
        name_of_file: u16,
        name_of_section: u8,
        lsq: u8,
        checksum: u8,
    },
    FileAckFileOrSection {
        name_of_file: u16,
        name_of_section: u8,
        afq: u8,
    },
    FileSegment {
        name_of_file: u16,
        name_of_section: u8,
        segment: Vec<u8>,
    },
    FileDirectory {
        name_of_file: u16,
        length_of_file: u32,
        sof: u8,
        creation_time: CP56Time2a,
    },
    QueryLog {
        name_of_file: u16,
        range_start: CP56Time2a,
        range_end: CP56Time2a,
    },
}

const TEST_WORD_FIXED: [u8; 2] = [0xCC, 0x55];

fn encode_time(buf: &mut Vec<u8>, time: Option<TimeTag>) {
    match time {
        Some(TimeTag::Cp24(t)) => t.encode(buf),
        Some(TimeTag::Cp56(t)) => t.encode(buf),
        None => {}
    }
}

fn decode_time24(buf: &[u8]) -> IecResult<(Option<TimeTag>, usize)> {
    Ok((Some(TimeTag::Cp24(CP24Time2a::decode(buf)?)), CP24Time2a::ENCODED_SIZE))
}

fn decode_time56(buf: &[u8]) -> IecResult<(Option<TimeTag>, usize)> {
    Ok((Some(TimeTag::Cp56(CP56Time2a::decode(buf)?)), CP56Time2a::ENCODED_SIZE))
}

fn encode_single_point_byte(value: bool, quality: QualityDescriptor) -> u8 {
    let mut b = quality.to_byte() & 0xF0;
    if value {
        b |= 0x01;
    }
    b
}

fn decode_single_point_byte(b: u8) -> (bool, QualityDescriptor) {
    ((b & 0x01) != 0, QualityDescriptor::from_byte(b & 0xF0))
}

fn encode_double_point_byte(value: DoublePointValue, quality: QualityDescriptor) -> u8 {
    (quality.to_byte() & 0xF0) | (value as u8 & 0x03)
}

fn decode_double_point_byte(b: u8) -> (DoublePointValue, QualityDescriptor) {
    (DoublePointValue::from_bits(b), QualityDescriptor::from_byte(b & 0xF0))
}

fn encode_command_qualifier(qu: u8, select: bool) -> u8 {
    ((qu & 0x1F) << 2) | ((select as u8) << 7)
}

fn decode_command_qualifier(b: u8) -> (u8, bool) {
    ((b >> 2) & 0x1F, (b & 0x80) != 0)
}

fn encode_setpoint_qualifier(ql: u8, select: bool) -> u8 {
    (ql & 0x7F) | ((select as u8) << 7)
}

fn decode_setpoint_qualifier(b: u8) -> (u8, bool) {
    (b & 0x7F, (b & 0x80) != 0)
}

/// Reads the IOA field (unless `in_sequence` and not the first
/// element), returning the address and the number of bytes consumed.
fn read_ioa(buf: &[u8], width: InfoObjAddrSize) -> IecResult<(u32, usize)> {
    let n = width.bytes();
    if buf.len() < n {
        return Err(IecError::InvalidEncoding("buffer underrun reading IOA".into()));
    }
    Ok((codec::read_uint(buf, n)?, n))
}

fn write_ioa(buf: &mut Vec<u8>, ioa: u32, width: InfoObjAddrSize) {
    codec::write_uint(buf, ioa, width.bytes());
}

impl InformationObject {
    /// Encodes this IO. Writes the IOA unless `in_sequence` is set and
    /// this is not the first element of the sequence.
    pub fn encode(&self, buf: &mut Vec<u8>, ioa_width: InfoObjAddrSize, write_ioa_field: bool) -> IecResult<()> {
        if write_ioa_field {
            write_ioa(buf, self.ioa, ioa_width);
        }
        self.body.encode(buf)
    }

    /// Decodes one IO starting at `buf[0]`. If `write_ioa_field` is
    /// false, `ioa` must be supplied by the caller (sequence mode,
    /// elements after the first) and is not read from the wire.
    pub fn decode(
        type_id: TypeId,
        buf: &[u8],
        ioa_width: InfoObjAddrSize,
        read_ioa_field: bool,
        implicit_ioa: u32,
    ) -> IecResult<(Self, usize)> {
        let mut offset = 0;
        let ioa = if read_ioa_field {
            let (ioa, n) = read_ioa(buf, ioa_width)?;
            offset += n;
            ioa
        } else {
            implicit_ioa
        };
        let (body, consumed) = IoBody::decode(type_id, &buf[offset..])?;
        Ok((Self { ioa, body }, offset + consumed))
    }
}

impl IoBody {
    fn encode(&self, buf: &mut Vec<u8>) -> IecResult<()> {
        match self {
            IoBody::SinglePoint { value, quality, time } => {
                buf.push(encode_single_point_byte(*value, *quality));
                encode_time(buf, *time);
            }
            IoBody::DoublePoint { value, quality, time } => {
                buf.push(encode_double_point_byte(*value, *quality));
                encode_time(buf, *time);
            }
            IoBody::StepPosition {
                value,
                transient,
                quality,
                time,
            } => {
                let mut vti = (*value as u8) & 0x7F;
                if *transient {
                    vti |= 0x80;
                }
                buf.push(vti);
                buf.push(quality.to_byte());
                encode_time(buf, *time);
            }
            IoBody::Bitstring32 { value, quality, time } => {
                codec::write_u32(buf, *value);
                buf.push(quality.to_byte());
                encode_time(buf, *time);
            }
            IoBody::MeasuredValueNormalized { value, quality, time } => {
                codec::write_i16(buf, *value);
                buf.push(quality.to_byte());
                encode_time(buf, *time);
            }
            IoBody::MeasuredValueScaled { value, quality, time } => {
                codec::write_i16(buf, *value);
                buf.push(quality.to_byte());
                encode_time(buf, *time);
            }
            IoBody::MeasuredValueShort { value, quality, time } => {
                codec::write_f32(buf, *value);
                buf.push(quality.to_byte());
                encode_time(buf, *time);
            }
            IoBody::IntegratedTotals { counter, sequence, time } => {
                codec::write_i32(buf, *counter);
                buf.push(*sequence);
                encode_time(buf, *time);
            }
            IoBody::EventOfProtectionEquipment {
                event,
                relay_duration_ms,
                quality,
                time,
            } => {
                buf.push((*event & 0x03) | (quality.to_byte() & 0xFC));
                codec::write_u16(buf, *relay_duration_ms);
                encode_time(buf, Some(*time));
            }
            IoBody::PackedStartEvents { event_flags, quality, time } => {
                buf.push(*event_flags);
                buf.push(quality.to_byte());
                encode_time(buf, Some(*time));
            }
            IoBody::PackedOutputCircuitInfo { oci, quality, time } => {
                buf.push(*oci);
                buf.push(quality.to_byte());
                encode_time(buf, Some(*time));
            }
            IoBody::PackedSinglePointWithScd {
                status,
                change_detect,
                quality,
            } => {
                codec::write_u16(buf, *status);
                codec::write_u16(buf, *change_detect);
                buf.push(quality.to_byte());
            }
            IoBody::MeasuredValueNormalizedNoQuality { value } => {
                codec::write_i16(buf, *value);
            }
            IoBody::SingleCommand {
                value,
                qualifier,
                select,
                time,
            } => {
                let mut b = encode_command_qualifier(*qualifier, *select);
                if *value {
                    b |= 0x01;
                }
                buf.push(b);
                encode_time(buf, *time);
            }
            IoBody::DoubleCommand {
                value,
                qualifier,
                select,
                time,
            } => {
                let mut b = encode_command_qualifier(*qualifier, *select);
                b |= *value as u8 & 0x03;
                buf.push(b);
                encode_time(buf, *time);
            }
            IoBody::RegulatingStepCommand {
                value,
                qualifier,
                select,
                time,
            } => {
                let mut b = encode_command_qualifier(*qualifier, *select);
                b |= *value as u8 & 0x03;
                buf.push(b);
                encode_time(buf, *time);
            }
            IoBody::SetpointNormalized {
                value,
                qualifier,
                select,
                time,
            } => {
                codec::write_i16(buf, *value);
                buf.push(encode_setpoint_qualifier(*qualifier, *select));
                encode_time(buf, *time);
            }
            IoBody::SetpointScaled {
                value,
                qualifier,
                select,
                time,
            } => {
                codec::write_i16(buf, *value);
                buf.push(encode_setpoint_qualifier(*qualifier, *select));
                encode_time(buf, *time);
            }
            IoBody::SetpointShort {
                value,
                qualifier,
                select,
                time,
            } => {
                codec::write_f32(buf, *value);
                buf.push(encode_setpoint_qualifier(*qualifier, *select));
                encode_time(buf, *time);
            }
            IoBody::Bitstring32Command { value, time } => {
                codec::write_u32(buf, *value);
                encode_time(buf, *time);
            }
            IoBody::EndOfInitialization { coi } => buf.push(*coi),
            IoBody::InterrogationCommand { qoi } => buf.push(*qoi),
            IoBody::CounterInterrogationCommand { qcc } => buf.push(*qcc),
            IoBody::ReadCommand => {}
            IoBody::ClockSynchronizationCommand { time } => time.encode(buf),
            IoBody::TestCommand => buf.extend_from_slice(&TEST_WORD_FIXED),
            IoBody::TestCommandWithTimestamp {
                test_sequence_counter,
                time,
            } => {
                codec::write_u16(buf, *test_sequence_counter);
                time.encode(buf);
            }
            IoBody::ResetProcessCommand { qrp } => buf.push(*qrp),
            IoBody::DelayAcquisitionCommand { delay_ms } => codec::write_u16(buf, *delay_ms),
            IoBody::ParameterNormalized { value, qpm } => {
                codec::write_i16(buf, *value);
                buf.push(*qpm);
            }
            IoBody::ParameterScaled { value, qpm } => {
                codec::write_i16(buf, *value);
                buf.push(*qpm);
            }
            IoBody::ParameterShort { value, qpm } => {
                codec::write_f32(buf, *value);
                buf.push(*qpm);
            }
            IoBody::ParameterActivation { qpa } => buf.push(*qpa),
            IoBody::FileReady {
                name_of_file,
                length_of_file,
                frq,
            } => {
                codec::write_u16(buf, *name_of_file);
                codec::write_uint(buf, *length_of_file, 3);
                buf.push(*frq);
            }
            IoBody::SectionReady {
                name_of_file,
                name_of_section,
                length_of_section,
                srq,
            } => {
                codec::write_u16(buf, *name_of_file);
                buf.push(*name_of_section);
                codec::write_uint(buf, *length_of_section, 3);
                buf.push(*srq);
            }
            IoBody::FileCallOrSelect {
                name_of_file,
                name_of_section,
                scq,
            } => {
                codec::write_u16(buf, *name_of_file);
                buf.push(*name_of_section);
                buf.push(*scq);
            }
            IoBody::FileLastSegmentOrSection {
                name_of_file,
                name_of_section,
                lsq,
                checksum,
            } => {
                codec::write_u16(buf, *name_of_file);
                buf.push(*name_of_section);
                buf.push(*lsq);
                buf.push(*checksum);
            }
            IoBody::FileAckFileOrSection {
                name_of_file,
                name_of_section,
                afq,
            } => {
                codec::write_u16(buf, *name_of_file);
                buf.push(*name_of_section);
                buf.push(*afq);
            }
            IoBody::FileSegment {
                name_of_file,
                name_of_section,
                segment,
            } => {
                codec::write_u16(buf, *name_of_file);
                buf.push(*name_of_section);
                buf.push(segment.len() as u8);
                buf.extend_from_slice(segment);
            }
            IoBody::FileDirectory {
                name_of_file,
                length_of_file,
                sof,
                creation_time,
            } => {
                codec::write_u16(buf, *name_of_file);
                codec::write_uint(buf, *length_of_file, 3);
                buf.push(*sof);
                creation_time.encode(buf);
            }
            IoBody::QueryLog {
                name_of_file,
                range_start,
                range_end,
            } => {
                codec::write_u16(buf, *name_of_file);
                range_start.encode(buf);
                range_end.encode(buf);
            }
        }
        Ok(())
    }

    fn decode(type_id: TypeId, buf: &[u8]) -> IecResult<(Self, usize)> {
        use TypeId::*;
        macro_rules! need {
            ($n:expr) => {
                if buf.len() < $n {
                    return Err(IecError::InvalidEncoding(format!(
                        "{:?} payload truncated",
                        type_id
                    )));
                }
            };
        }
        Ok(match type_id {
            MSpNa1 | MSpTa1 | MSpTb1 => {
                need!(1);
                let (value, quality) = decode_single_point_byte(buf[0]);
                let (time, tlen) = match type_id {
                    MSpTa1 => decode_time24(&buf[1..])?,
                    MSpTb1 => decode_time56(&buf[1..])?,
                    _ => (None, 0),
                };
                (IoBody::SinglePoint { value, quality, time }, 1 + tlen)
            }
            MDpNa1 | MDpTa1 | MDpTb1 => {
                need!(1);
                let (value, quality) = decode_double_point_byte(buf[0]);
                let (time, tlen) = match type_id {
                    MDpTa1 => decode_time24(&buf[1..])?,
                    MDpTb1 => decode_time56(&buf[1..])?,
                    _ => (None, 0),
                };
                (IoBody::DoublePoint { value, quality, time }, 1 + tlen)
            }
            MStNa1 | MStTa1 | MStTb1 => {
                need!(2);
                let value = ((buf[0] & 0x7F) as i8) << 1 >> 1; // sign-extend 7-bit field
                let transient = (buf[0] & 0x80) != 0;
                let quality = QualityDescriptor::from_byte(buf[1]);
                let (time, tlen) = match type_id {
                    MStTa1 => decode_time24(&buf[2..])?,
                    MStTb1 => decode_time56(&buf[2..])?,
                    _ => (None, 0),
                };
                (
                    IoBody::StepPosition {
                        value,
                        transient,
                        quality,
                        time,
                    },
                    2 + tlen,
                )
            }
            MBoNa1 | MBoTa1 | MBoTb1 => {
                need!(5);
                let value = codec::read_u32(buf)?;
                let quality = QualityDescriptor::from_byte(buf[4]);
                let (time, tlen) = match type_id {
                    MBoTa1 => decode_time24(&buf[5..])?,
                    MBoTb1 => decode_time56(&buf[5..])?,
                    _ => (None, 0),
                };
                (IoBody::Bitstring32 { value, quality, time }, 5 + tlen)
            }
            MMeNa1 | MMeTa1 | MMeTd1 => {
                need!(3);
                let value = codec::read_i16(buf)?;
                let quality = QualityDescriptor::from_byte(buf[2]);
                let (time, tlen) = match type_id {
                    MMeTa1 => decode_time24(&buf[3..])?,
                    MMeTd1 => decode_time56(&buf[3..])?,
                    _ => (None, 0),
                };
                (
                    IoBody::MeasuredValueNormalized { value, quality, time },
                    3 + tlen,
                )
            }
            MMeNb1 | MMeTb1 | MMeTe1 => {
                need!(3);
                let value = codec::read_i16(buf)?;
                let quality = QualityDescriptor::from_byte(buf[2]);
                let (time, tlen) = match type_id {
                    MMeTb1 => decode_time24(&buf[3..])?,
                    MMeTe1 => decode_time56(&buf[3..])?,
                    _ => (None, 0),
                };
                (IoBody::MeasuredValueScaled { value, quality, time }, 3 + tlen)
            }
            MMeNc1 | MMeTc1 | MMeTf1 => {
                need!(5);
                let value = codec::read_f32(buf)?;
                let quality = QualityDescriptor::from_byte(buf[4]);
                let (time, tlen) = match type_id {
                    MMeTc1 => decode_time24(&buf[5..])?,
                    MMeTf1 => decode_time56(&buf[5..])?,
                    _ => (None, 0),
                };
                (IoBody::MeasuredValueShort { value, quality, time }, 5 + tlen)
            }
            MItNa1 | MItTa1 | MItTb1 => {
                need!(5);
                let counter = codec::read_i32(buf)?;
                let sequence = buf[4];
                let (time, tlen) = match type_id {
                    MItTa1 => decode_time24(&buf[5..])?,
                    MItTb1 => decode_time56(&buf[5..])?,
                    _ => (None, 0),
                };
                (
                    IoBody::IntegratedTotals {
                        counter,
                        sequence,
                        time,
                    },
                    5 + tlen,
                )
            }
            MEpTa1 | MEpTd1 => {
                need!(3);
                let event = buf[0] & 0x03;
                let quality = QualityDescriptor::from_byte(buf[0] & 0xFC);
                let relay_duration_ms = codec::read_u16(&buf[1..])?;
                let (time, tlen) = match type_id {
                    MEpTa1 => decode_time24(&buf[3..])?,
                    _ => decode_time56(&buf[3..])?,
                };
                let time = time.unwrap();
                (
                    IoBody::EventOfProtectionEquipment {
                        event,
                        relay_duration_ms,
                        quality,
                        time,
                    },
                    3 + tlen,
                )
            }
            MEpTb1 | MEpTe1 => {
                need!(2);
                let event_flags = buf[0];
                let quality = QualityDescriptor::from_byte(buf[1]);
                let (time, tlen) = match type_id {
                    MEpTb1 => decode_time24(&buf[2..])?,
                    _ => decode_time56(&buf[2..])?,
                };
                let time = time.unwrap();
                (
                    IoBody::PackedStartEvents {
                        event_flags,
                        quality,
                        time,
                    },
                    2 + tlen,
                )
            }
            MEpTc1 | MEpTf1 => {
                need!(2);
                let oci = buf[0];
                let quality = QualityDescriptor::from_byte(buf[1]);
                let (time, tlen) = match type_id {
                    MEpTc1 => decode_time24(&buf[2..])?,
                    _ => decode_time56(&buf[2..])?,
                };
                let time = time.unwrap();
                (IoBody::PackedOutputCircuitInfo { oci, quality, time }, 2 + tlen)
            }
            MPsNa1 => {
                need!(5);
                let status = codec::read_u16(buf)?;
                let change_detect = codec::read_u16(&buf[2..])?;
                let quality = QualityDescriptor::from_byte(buf[4]);
                (
                    IoBody::PackedSinglePointWithScd {
                        status,
                        change_detect,
                        quality,
                    },
                    5,
                )
            }
            MMeNd1 => {
                need!(2);
                let value = codec::read_i16(buf)?;
                (IoBody::MeasuredValueNormalizedNoQuality { value }, 2)
            }
            CScNa1 | CScTa1 => {
                need!(1);
                let value = (buf[0] & 0x01) != 0;
                let (qualifier, select) = decode_command_qualifier(buf[0]);
                let (time, tlen) = if type_id == CScTa1 {
                    decode_time56(&buf[1..])?
                } else {
                    (None, 0)
                };
                (
                    IoBody::SingleCommand {
                        value,
                        qualifier,
                        select,
                        time,
                    },
                    1 + tlen,
                )
            }
            CDcNa1 | CDcTa1 => {
                need!(1);
                let value = DoublePointValue::from_bits(buf[0]);
                let (qualifier, select) = decode_command_qualifier(buf[0]);
                let (time, tlen) = if type_id == CDcTa1 {
                    decode_time56(&buf[1..])?
                } else {
                    (None, 0)
                };
                (
                    IoBody::DoubleCommand {
                        value,
                        qualifier,
                        select,
                        time,
                    },
                    1 + tlen,
                )
            }
            CRcNa1 | CRcTa1 => {
                need!(1);
                let value = StepCommandValue::from_bits(buf[0]);
                let (qualifier, select) = decode_command_qualifier(buf[0]);
                let (time, tlen) = if type_id == CRcTa1 {
                    decode_time56(&buf[1..])?
                } else {
                    (None, 0)
                };
                (
                    IoBody::RegulatingStepCommand {
                        value,
                        qualifier,
                        select,
                        time,
                    },
                    1 + tlen,
                )
            }
            CSeNa1 | CSeTa1 => {
                need!(3);
                let value = codec::read_i16(buf)?;
                let (qualifier, select) = decode_setpoint_qualifier(buf[2]);
                let (time, tlen) = if type_id == CSeTa1 {
                    decode_time56(&buf[3..])?
                } else {
                    (None, 0)
                };
                (
                    IoBody::SetpointNormalized {
                        value,
                        qualifier,
                        select,
                        time,
                    },
                    3 + tlen,
                )
            }
            CSeNb1 | CSeTb1 => {
                need!(3);
                let value = codec::read_i16(buf)?;
                let (qualifier, select) = decode_setpoint_qualifier(buf[2]);
                let (time, tlen) = if type_id == CSeTb1 {
                    decode_time56(&buf[3..])?
                } else {
                    (None, 0)
                };
                (
                    IoBody::SetpointScaled {
                        value,
                        qualifier,
                        select,
                        time,
                    },
                    3 + tlen,
                )
            }
            CSeNc1 | CSeTc1 => {
                need!(5);
                let value = codec::read_f32(buf)?;
                let (qualifier, select) = decode_setpoint_qualifier(buf[4]);
                let (time, tlen) = if type_id == CSeTc1 {
                    decode_time56(&buf[5..])?
                } else {
                    (None, 0)
                };
                (
                    IoBody::SetpointShort {
                        value,
                        qualifier,
                        select,
                        time,
                    },
                    5 + tlen,
                )
            }
            CBoNa1 | CBoTa1 => {
                need!(4);
                let value = codec::read_u32(buf)?;
                let (time, tlen) = if type_id == CBoTa1 {
                    decode_time56(&buf[4..])?
                } else {
                    (None, 0)
                };
                (IoBody::Bitstring32Command { value, time }, 4 + tlen)
            }
            MEiNa1 => {
                need!(1);
                (IoBody::EndOfInitialization { coi: buf[0] }, 1)
            }
            CIcNa1 => {
                need!(1);
                (IoBody::InterrogationCommand { qoi: buf[0] }, 1)
            }
            CCiNa1 => {
                need!(1);
                (IoBody::CounterInterrogationCommand { qcc: buf[0] }, 1)
            }
            CRdNa1 => (IoBody::ReadCommand, 0),
            CCsNa1 => {
                let time = CP56Time2a::decode(buf)?;
                (
                    IoBody::ClockSynchronizationCommand { time },
                    CP56Time2a::ENCODED_SIZE,
                )
            }
            CTsNa1 => {
                need!(2);
                if buf[0..2] != TEST_WORD_FIXED {
                    return Err(IecError::InvalidEncoding("bad C_TS_NA_1 test word".into()));
                }
                (IoBody::TestCommand, 2)
            }
            CRpNa1 => {
                need!(1);
                (IoBody::ResetProcessCommand { qrp: buf[0] }, 1)
            }
            CCdNa1 => {
                need!(2);
                let delay_ms = codec::read_u16(buf)?;
                (IoBody::DelayAcquisitionCommand { delay_ms }, 2)
            }
            CTsTa1 => {
                need!(2);
                let test_sequence_counter = codec::read_u16(buf)?;
                let time = CP56Time2a::decode(&buf[2..])?;
                (
                    IoBody::TestCommandWithTimestamp {
                        test_sequence_counter,
                        time,
                    },
                    2 + CP56Time2a::ENCODED_SIZE,
                )
            }
            PMeNa1 => {
                need!(3);
                let value = codec::read_i16(buf)?;
                (IoBody::ParameterNormalized { value, qpm: buf[2] }, 3)
            }
            PMeNb1 => {
                need!(3);
                let value = codec::read_i16(buf)?;
                (IoBody::ParameterScaled { value, qpm: buf[2] }, 3)
            }
            PMeNc1 => {
                need!(5);
                let value = codec::read_f32(buf)?;
                (IoBody::ParameterShort { value, qpm: buf[4] }, 5)
            }
            PAcNa1 => {
                need!(1);
                (IoBody::ParameterActivation { qpa: buf[0] }, 1)
            }
            FFrNa1 => {
                need!(6);
                let name_of_file = codec::read_u16(buf)?;
                let length_of_file = codec::read_uint(&buf[2..], 3)?;
                let frq = buf[5];
                (
                    IoBody::FileReady {
                        name_of_file,
                        length_of_file,
                        frq,
                    },
                    6,
                )
            }
            FSrNa1 => {
                need!(7);
                let name_of_file = codec::read_u16(buf)?;
                let name_of_section = buf[2];
                let length_of_section = codec::read_uint(&buf[3..], 3)?;
                let srq = buf[6];
                (
                    IoBody::SectionReady {
                        name_of_file,
                        name_of_section,
                        length_of_section,
                        srq,
                    },
                    7,
                )
            }
            FScNa1 => {
                need!(4);
                let name_of_file = codec::read_u16(buf)?;
                let name_of_section = buf[2];
                let scq = buf[3];
                (
                    IoBody::FileCallOrSelect {
                        name_of_file,
                        name_of_section,
                        scq,
                    },
                    4,
                )
            }
            FLsNa1 => {
                need!(5);
                let name_of_file = codec::read_u16(buf)?;
                let name_of_section = buf[2];
                let lsq = buf[3];
                let checksum = buf[4];
                (
                    IoBody::FileLastSegmentOrSection {
                        name_of_file,
                        name_of_section,
                        lsq,
                        checksum,
                    },
                    5,
                )
            }
            FAfNa1 => {
                need!(4);
                let name_of_file = codec::read_u16(buf)?;
                let name_of_section = buf[2];
                let afq = buf[3];
                (
                    IoBody::FileAckFileOrSection {
                        name_of_file,
                        name_of_section,
                        afq,
                    },
                    4,
                )
            }
            FSgNa1 => {
                need!(4);
                let name_of_file = codec::read_u16(buf)?;
                let name_of_section = buf[2];
                let los = buf[3] as usize;
                need!(4 + los);
                let segment = buf[4..4 + los].to_vec();
                (
                    IoBody::FileSegment {
                        name_of_file,
                        name_of_section,
                        segment,
                    },
                    4 + los,
                )
            }
            FDrTa1 => {
                need!(6 + CP56Time2a::ENCODED_SIZE);
                let name_of_file = codec::read_u16(buf)?;
                let length_of_file = codec::read_uint(&buf[2..], 3)?;
                let sof = buf[5];
                let creation_time = CP56Time2a::decode(&buf[6..])?;
                (
                    IoBody::FileDirectory {
                        name_of_file,
                        length_of_file,
                        sof,
                        creation_time,
                    },
                    6 + CP56Time2a::ENCODED_SIZE,
                )
            }
            FScNb1 => {
                need!(2 + 2 * CP56Time2a::ENCODED_SIZE);
                let name_of_file = codec::read_u16(buf)?;
                let range_start = CP56Time2a::decode(&buf[2..])?;
                let range_end = CP56Time2a::decode(&buf[2 + CP56Time2a::ENCODED_SIZE..])?;
                (
                    IoBody::QueryLog {
                        name_of_file,
                        range_start,
                        range_end,
                    },
                    2 + 2 * CP56Time2a::ENCODED_SIZE,
                )
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(type_id: TypeId, ioa: u32, body: IoBody) {
        let io = InformationObject { ioa, body };
        let mut buf = Vec::new();
        io.encode(&mut buf, InfoObjAddrSize::ThreeOctets, true).unwrap();
        let (decoded, consumed) =
            InformationObject::decode(type_id, &buf, InfoObjAddrSize::ThreeOctets, true, 0).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, io);
    }

    #[test]
    fn single_point_round_trip() {
        roundtrip(
            TypeId::MSpNa1,
            100,
            IoBody::SinglePoint {
                value: true,
                quality: QualityDescriptor::GOOD,
                time: None,
            },
        );
    }

    #[test]
    fn single_point_cp56_round_trip() {
        let time = TimeTag::Cp56(CP56Time2a {
            milliseconds: 1234,
            minute: 5,
            invalid: false,
            hour: 6,
            summer_time: false,
            day_of_month: 7,
            day_of_week: 2,
            month: 8,
            year: 23,
        });
        roundtrip(
            TypeId::MSpTb1,
            42,
            IoBody::SinglePoint {
                value: false,
                quality: QualityDescriptor {
                    invalid: true,
                    ..Default::default()
                },
                time: Some(time),
            },
        );
    }

    #[test]
    fn step_position_sign_round_trip() {
        roundtrip(
            TypeId::MStNa1,
            7,
            IoBody::StepPosition {
                value: -64,
                transient: true,
                quality: QualityDescriptor::GOOD,
                time: None,
            },
        );
        roundtrip(
            TypeId::MStNa1,
            7,
            IoBody::StepPosition {
                value: 63,
                transient: false,
                quality: QualityDescriptor::GOOD,
                time: None,
            },
        );
    }

    #[test]
    fn single_command_qualifier_round_trip() {
        roundtrip(
            TypeId::CScNa1,
            1001,
            IoBody::SingleCommand {
                value: true,
                qualifier: 5,
                select: true,
                time: None,
            },
        );
    }

    #[test]
    fn test_command_fixed_word() {
        roundtrip(TypeId::CTsNa1, 0, IoBody::TestCommand);
    }

    #[test]
    fn test_command_rejects_bad_word() {
        let buf = [0x00, 0x00];
        assert!(IoBody::decode(TypeId::CTsNa1, &buf).is_err());
    }

    #[test]
    fn file_segment_round_trip() {
        roundtrip(
            TypeId::FSgNa1,
            0,
            IoBody::FileSegment {
                name_of_file: 1,
                name_of_section: 1,
                segment: vec![1, 2, 3, 4, 5],
            },
        );
    }
}
