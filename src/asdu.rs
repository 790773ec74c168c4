//! ASDU (Application Service Data Unit) header and element container
//! (spec.md §3, component C3).
//!
//! An ASDU pairs one shared `type_id`/cause-of-transmission/address
//! header with a run of [`InformationObject`]s that all share that
//! type-id — either one IOA per element (`SQ=0`) or one IOA for the
//! first element with the rest implied consecutive (`SQ=1`).

use crate::codec;
use crate::common::{ApplicationLayerParameters, CauseOfTransmission};
use crate::error::{IecError, IecResult};
use crate::object::{InformationObject, IoBody, TypeId};

/// Variable Structure Qualifier: SQ bit + element count (max 127).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    pub is_sequence: bool,
    pub count: u8,
}

impl Vsq {
    fn to_byte(self) -> u8 {
        (self.count & 0x7F) | if self.is_sequence { 0x80 } else { 0 }
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            is_sequence: (byte & 0x80) != 0,
            count: byte & 0x7F,
        }
    }
}

/// Errors specific to assembling an ASDU element-by-element.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsduBuildError {
    #[error("ASDU is full: adding this element would exceed max_size_of_asdu")]
    Full,
    #[error("element type-id does not match this ASDU's type-id")]
    TypeMismatch,
    #[error("SQ=1 ASDU requires consecutive IOAs (expected {expected}, got {got})")]
    IoaMismatchInSequence { expected: u32, got: u32 },
    #[error("SQ=1 ASDU element count cannot exceed 127")]
    TooManyElements,
}

/// One ASDU: header fields plus a homogeneous run of information objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    pub type_id: TypeId,
    vsq: Vsq,
    pub cause: CauseOfTransmission,
    pub test: bool,
    pub negative: bool,
    pub originator_address: Option<u8>,
    pub common_address: u32,
    elements: Vec<InformationObject>,
}

impl Asdu {
    /// Starts a new, empty ASDU. `is_sequence` selects SQ=1 packing;
    /// elements must then be added with consecutive IOAs.
    pub fn new(
        type_id: TypeId,
        is_sequence: bool,
        cause: CauseOfTransmission,
        test: bool,
        negative: bool,
        originator_address: Option<u8>,
        common_address: u32,
    ) -> Self {
        Self {
            type_id,
            vsq: Vsq {
                is_sequence,
                count: 0,
            },
            cause,
            test,
            negative,
            originator_address,
            common_address,
            elements: Vec::new(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.vsq.is_sequence
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn elements(&self) -> &[InformationObject] {
        &self.elements
    }

    /// Appends an information object, enforcing the shared-type-id and
    /// (for SQ=1) consecutive-IOA invariants. `alp` bounds the encoded
    /// size against `max_size_of_asdu`.
    pub fn add_io(
        &mut self,
        io: InformationObject,
        alp: &ApplicationLayerParameters,
    ) -> Result<(), AsduBuildError> {
        if self.vsq.is_sequence {
            if self.vsq.count >= 127 {
                return Err(AsduBuildError::TooManyElements);
            }
            if !self.elements.is_empty() {
                let expected = self.elements[0].ioa + self.vsq.count as u32;
                if io.ioa != expected {
                    return Err(AsduBuildError::IoaMismatchInSequence {
                        expected,
                        got: io.ioa,
                    });
                }
            }
        } else if let Some(first) = self.elements.first() {
            if !same_body_kind(&first.body, &io.body) {
                return Err(AsduBuildError::TypeMismatch);
            }
        }

        let new_index = self.elements.len();
        let projected_len = self.encoded_len(alp) + self.element_encoded_len(&io, new_index, alp);
        if projected_len > alp.max_size_of_asdu {
            return Err(AsduBuildError::Full);
        }

        self.elements.push(io);
        self.vsq.count += 1;
        Ok(())
    }

    fn element_encoded_len(&self, io: &InformationObject, index: usize, alp: &ApplicationLayerParameters) -> usize {
        let mut buf = Vec::new();
        // Encoding can't fail for a well-formed IoBody; IOA width is
        // the only variable and is added separately.
        let _ = io.body.encode(&mut buf);
        buf.len() + if self.write_ioa_for_index(index) {
            alp.info_obj_addr_size.bytes()
        } else {
            0
        }
    }

    fn write_ioa_for_index(&self, index: usize) -> bool {
        !self.vsq.is_sequence || index == 0
    }

    /// Encodes the full ASDU: header then every element.
    pub fn encode(&self, alp: &ApplicationLayerParameters) -> IecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len(alp));
        buf.push(self.type_id.to_u8());
        buf.push(self.vsq.to_byte());

        let mut cot_byte = self.cause.to_byte() & 0x3F;
        if self.test {
            cot_byte |= 0x80;
        }
        if self.negative {
            cot_byte |= 0x40;
        }
        buf.push(cot_byte);
        if alp.size_of_cot == 2 {
            buf.push(self.originator_address.unwrap_or(alp.originator_address));
        }

        codec::write_uint(&mut buf, self.common_address, alp.common_address_size as usize);

        for (i, io) in self.elements.iter().enumerate() {
            io.encode(&mut buf, alp.info_obj_addr_size, self.write_ioa_for_index(i))?;
        }
        Ok(buf)
    }

    /// Parses an ASDU header and every element from `buf`.
    pub fn decode(buf: &[u8], alp: &ApplicationLayerParameters) -> IecResult<Self> {
        if buf.len() < 2 {
            return Err(IecError::InvalidEncoding("ASDU header truncated".into()));
        }
        let type_id = TypeId::from_u8(buf[0])?;
        let vsq = Vsq::from_byte(buf[1]);
        let mut offset = 2;

        if buf.len() < offset + alp.size_of_cot as usize {
            return Err(IecError::InvalidEncoding("ASDU COT truncated".into()));
        }
        let cot_byte = buf[offset];
        let test = (cot_byte & 0x80) != 0;
        let negative = (cot_byte & 0x40) != 0;
        let cause = CauseOfTransmission::from_byte(cot_byte & 0x3F)
            .ok_or_else(|| IecError::InvalidEncoding(format!("unknown COT {}", cot_byte & 0x3F)))?;
        offset += 1;

        let originator_address = if alp.size_of_cot == 2 {
            let oa = buf[offset];
            offset += 1;
            Some(oa)
        } else {
            None
        };

        let ca_width = alp.common_address_size as usize;
        if buf.len() < offset + ca_width {
            return Err(IecError::InvalidEncoding("ASDU CA truncated".into()));
        }
        let common_address = codec::read_uint(&buf[offset..], ca_width)?;
        offset += ca_width;

        if vsq.count == 0 {
            return Err(IecError::InvalidEncoding("ASDU with zero elements".into()));
        }

        let mut elements = Vec::with_capacity(vsq.count as usize);
        let mut first_ioa = 0u32;
        for i in 0..vsq.count as usize {
            let read_ioa_field = !vsq.is_sequence || i == 0;
            let implicit_ioa = if vsq.is_sequence { first_ioa + i as u32 } else { 0 };
            let (io, consumed) = InformationObject::decode(
                type_id,
                &buf[offset..],
                alp.info_obj_addr_size,
                read_ioa_field,
                implicit_ioa,
            )?;
            if vsq.is_sequence && i == 0 {
                first_ioa = io.ioa;
            }
            offset += consumed;
            elements.push(io);
        }

        Ok(Self {
            type_id,
            vsq,
            cause,
            test,
            negative,
            originator_address,
            common_address,
            elements,
        })
    }

    /// Length this ASDU would occupy on the wire right now.
    pub fn encoded_len(&self, alp: &ApplicationLayerParameters) -> usize {
        let mut len = alp.header_len();
        for (i, io) in self.elements.iter().enumerate() {
            len += self.element_encoded_len(io, i, alp);
        }
        len
    }
}

fn same_body_kind(a: &IoBody, b: &IoBody) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::QualityDescriptor;
    use crate::object::IoBody;

    fn alp() -> ApplicationLayerParameters {
        ApplicationLayerParameters::default()
    }

    #[test]
    fn single_point_sq0_round_trip() {
        let mut asdu = Asdu::new(
            TypeId::MSpNa1,
            false,
            CauseOfTransmission::Spontaneous,
            false,
            false,
            None,
            1,
        );
        for ioa in [10u32, 11, 12] {
            asdu.add_io(
                InformationObject {
                    ioa,
                    body: IoBody::SinglePoint {
                        value: ioa % 2 == 0,
                        quality: QualityDescriptor::GOOD,
                        time: None,
                    },
                },
                &alp(),
            )
            .unwrap();
        }
        let encoded = asdu.encode(&alp()).unwrap();
        let decoded = Asdu::decode(&encoded, &alp()).unwrap();
        assert_eq!(decoded.element_count(), 3);
        assert_eq!(decoded, asdu);
    }

    #[test]
    fn sequence_requires_consecutive_ioa() {
        let mut asdu = Asdu::new(
            TypeId::MMeNa1,
            true,
            CauseOfTransmission::Periodic,
            false,
            false,
            None,
            1,
        );
        asdu.add_io(
            InformationObject {
                ioa: 100,
                body: IoBody::MeasuredValueNormalized {
                    value: 0,
                    quality: QualityDescriptor::GOOD,
                    time: None,
                },
            },
            &alp(),
        )
        .unwrap();
        let err = asdu
            .add_io(
                InformationObject {
                    ioa: 105,
                    body: IoBody::MeasuredValueNormalized {
                        value: 1,
                        quality: QualityDescriptor::GOOD,
                        time: None,
                    },
                },
                &alp(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            AsduBuildError::IoaMismatchInSequence {
                expected: 101,
                got: 105
            }
        );
    }

    #[test]
    fn sequence_round_trip_implicit_ioa() {
        let mut asdu = Asdu::new(
            TypeId::MMeNa1,
            true,
            CauseOfTransmission::Periodic,
            false,
            false,
            None,
            1,
        );
        for (i, ioa) in (200u32..203).enumerate() {
            asdu.add_io(
                InformationObject {
                    ioa,
                    body: IoBody::MeasuredValueNormalized {
                        value: i as i16,
                        quality: QualityDescriptor::GOOD,
                        time: None,
                    },
                },
                &alp(),
            )
            .unwrap();
        }
        let encoded = asdu.encode(&alp()).unwrap();
        let decoded = Asdu::decode(&encoded, &alp()).unwrap();
        assert_eq!(decoded.elements()[1].ioa, 201);
        assert_eq!(decoded.elements()[2].ioa, 202);
    }

    #[test]
    fn rejects_unknown_type_id() {
        let mut buf = vec![0xFEu8, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00];
        buf.truncate(7);
        assert!(Asdu::decode(&buf, &alp()).is_err());
    }

    #[test]
    fn oa_present_only_when_size_of_cot_is_two() {
        let compact = ApplicationLayerParameters::cs101_compact();
        let mut asdu = Asdu::new(
            TypeId::CIcNa1,
            false,
            CauseOfTransmission::Activation,
            false,
            false,
            None,
            5,
        );
        asdu.add_io(
            InformationObject {
                ioa: 0,
                body: IoBody::InterrogationCommand { qoi: 20 },
            },
            &compact,
        )
        .unwrap();
        let encoded = asdu.encode(&compact).unwrap();
        // type_id(1) + vsq(1) + cot(1) + ca(1) + ioa(1) + qoi(1)
        assert_eq!(encoded.len(), 6);
        let decoded = Asdu::decode(&encoded, &compact).unwrap();
        assert!(decoded.originator_address.is_none());
    }
}
