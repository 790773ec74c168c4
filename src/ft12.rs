//! FT 1.2 frame transport (spec.md §3, component C4): the byte-level
//! framing CS101 runs over a serial line, independent of anything the
//! link layer does with the frame contents.
//!
//! Three frame shapes, distinguished by their first byte:
//! - single control character `0xE5` (ACK) — 1 byte total
//! - fixed-length frame: `10 C A... CS 16` — `3 + addressLength` bytes
//! - variable-length frame: `68 L L 68 C A... data CS 16` — `L` is the
//!   byte count from `C` through the end of `data` inclusive
//!
//! Grounded on `serial_transceiver_ft_1_2.c`'s `readNextMessage`
//! (two-stage read: a message timeout waiting for the first byte, a
//! tighter character timeout for the rest) and `fixed_length` framing
//! in the same file, reworked around `tokio::io::AsyncRead`/`AsyncWrite`
//! instead of a blocking HAL serial port.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{IecError, IecResult};

pub const START_FIXED: u8 = 0x10;
pub const START_VARIABLE: u8 = 0x68;
pub const END: u8 = 0x16;
pub const SINGLE_CHAR_ACK: u8 = 0xE5;

/// A parsed FT 1.2 frame, still carrying the raw link-layer control
/// byte and address rather than any CS101-interpreted meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Single `0xE5` control character.
    Ack,
    /// Fixed-length frame: a control byte, a link address, no data.
    Fixed { control: u8, address: u32 },
    /// Variable-length frame: a control byte, a link address, and a
    /// link-layer data payload (the CS101 application data / ASDU).
    Variable { control: u8, address: u32, data: Vec<u8> },
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encodes the single-character ACK frame.
pub fn encode_ack() -> [u8; 1] {
    [SINGLE_CHAR_ACK]
}

/// Encodes a fixed-length frame. `address_len` is 0, 1, or 2 bytes.
pub fn encode_fixed(control: u8, address: u32, address_len: usize) -> Vec<u8> {
    let mut body = vec![control];
    body.extend_from_slice(&address.to_le_bytes()[..address_len]);
    let cs = checksum(&body);
    let mut out = Vec::with_capacity(body.len() + 3);
    out.push(START_FIXED);
    out.extend_from_slice(&body);
    out.push(cs);
    out.push(END);
    out
}

/// Encodes a variable-length frame carrying `control`, `address`, and
/// `data` (the CS101-layer payload: link user data / ASDU bytes).
pub fn encode_variable(control: u8, address: u32, address_len: usize, data: &[u8]) -> Vec<u8> {
    let mut body = vec![control];
    body.extend_from_slice(&address.to_le_bytes()[..address_len]);
    body.extend_from_slice(data);
    let length = body.len() as u8;
    let cs = checksum(&body);
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(START_VARIABLE);
    out.push(length);
    out.push(length);
    out.push(START_VARIABLE);
    out.extend_from_slice(&body);
    out.push(cs);
    out.push(END);
    out
}

async fn read_exact_timeout<R: AsyncRead + Unpin>(
    io: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> IecResult<()> {
    tokio::time::timeout(timeout, io.read_exact(buf))
        .await
        .map_err(|_| IecError::Timeout("FT 1.2 character timeout".into()))?
        .map_err(IecError::Io)?;
    Ok(())
}

/// Reads and validates one frame. `message_timeout` bounds the wait
/// for the first (start) byte; `character_timeout` bounds the wait
/// for each subsequent byte once a frame is in progress — mirroring
/// the two timeout knobs the reference transceiver exposes, since a
/// line that goes idle mid-frame is a different failure than one that
/// never starts a frame at all.
pub async fn read_message<R: AsyncRead + Unpin>(
    io: &mut R,
    address_len: usize,
    message_timeout: Duration,
    character_timeout: Duration,
) -> IecResult<Frame> {
    let mut start = [0u8; 1];
    tokio::time::timeout(message_timeout, io.read_exact(&mut start))
        .await
        .map_err(|_| IecError::Timeout("FT 1.2 message start".into()))?
        .map_err(IecError::Io)?;

    match start[0] {
        SINGLE_CHAR_ACK => Ok(Frame::Ack),
        START_FIXED => {
            let mut rest = vec![0u8; 2 + address_len];
            read_exact_timeout(io, &mut rest, character_timeout).await?;
            let control = rest[0];
            let cs = rest[1 + address_len];
            let end = rest[2 + address_len - 1];
            if end != END {
                return Err(IecError::InvalidEncoding("FT 1.2 fixed frame missing end byte".into()));
            }
            let mut address_bytes = [0u8; 4];
            address_bytes[..address_len].copy_from_slice(&rest[1..1 + address_len]);
            let address = u32::from_le_bytes(address_bytes);
            let mut body = vec![control];
            body.extend_from_slice(&rest[1..1 + address_len]);
            if checksum(&body) != cs {
                return Err(IecError::InvalidEncoding("FT 1.2 fixed frame checksum mismatch".into()));
            }
            Ok(Frame::Fixed { control, address })
        }
        START_VARIABLE => {
            let mut len_bytes = [0u8; 2];
            read_exact_timeout(io, &mut len_bytes, character_timeout).await?;
            if len_bytes[0] != len_bytes[1] {
                return Err(IecError::InvalidEncoding(
                    "FT 1.2 variable frame length bytes disagree".into(),
                ));
            }
            let length = len_bytes[0] as usize;
            if length < 1 + address_len {
                return Err(IecError::InvalidEncoding(
                    "FT 1.2 variable frame length shorter than control+address".into(),
                ));
            }
            let mut second_start = [0u8; 1];
            read_exact_timeout(io, &mut second_start, character_timeout).await?;
            if second_start[0] != START_VARIABLE {
                return Err(IecError::InvalidEncoding(
                    "FT 1.2 variable frame second start byte mismatch".into(),
                ));
            }
            let mut body = vec![0u8; length];
            read_exact_timeout(io, &mut body, character_timeout).await?;
            let mut trailer = [0u8; 2];
            read_exact_timeout(io, &mut trailer, character_timeout).await?;
            if trailer[1] != END {
                return Err(IecError::InvalidEncoding("FT 1.2 variable frame missing end byte".into()));
            }
            if checksum(&body) != trailer[0] {
                return Err(IecError::InvalidEncoding("FT 1.2 variable frame checksum mismatch".into()));
            }
            let control = body[0];
            let mut address_bytes = [0u8; 4];
            address_bytes[..address_len].copy_from_slice(&body[1..1 + address_len]);
            let address = u32::from_le_bytes(address_bytes);
            let data = body[1 + address_len..].to_vec();
            Ok(Frame::Variable { control, address, data })
        }
        other => Err(IecError::InvalidEncoding(format!(
            "FT 1.2 sync error: unexpected start byte 0x{other:02X}"
        ))),
    }
}

/// Writes a frame's already-encoded bytes to the transport.
pub async fn send_message<W: AsyncWrite + Unpin>(io: &mut W, bytes: &[u8]) -> IecResult<()> {
    io.write_all(bytes).await.map_err(IecError::Io)?;
    io.flush().await.map_err(IecError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn ack_round_trip() {
        let bytes = encode_ack();
        let mut cursor = Cursor::new(bytes.to_vec());
        let frame = read_message(&mut cursor, 1, Duration::from_millis(100), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(frame, Frame::Ack);
    }

    #[tokio::test]
    async fn fixed_frame_round_trip() {
        let bytes = encode_fixed(0x53, 1, 1);
        let mut cursor = Cursor::new(bytes);
        let frame = read_message(&mut cursor, 1, Duration::from_millis(100), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(frame, Frame::Fixed { control: 0x53, address: 1 });
    }

    #[tokio::test]
    async fn variable_frame_round_trip() {
        let data = vec![1, 2, 3, 4, 5];
        let bytes = encode_variable(0x68, 7, 1, &data);
        let mut cursor = Cursor::new(bytes);
        let frame = read_message(&mut cursor, 1, Duration::from_millis(100), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(
            frame,
            Frame::Variable {
                control: 0x68,
                address: 7,
                data
            }
        );
    }

    #[tokio::test]
    async fn variable_frame_rejects_bad_checksum() {
        let mut bytes = encode_variable(0x68, 1, 1, &[9, 9]);
        let cs_index = bytes.len() - 2;
        bytes[cs_index] ^= 0xFF;
        let mut cursor = Cursor::new(bytes);
        let result =
            read_message(&mut cursor, 1, Duration::from_millis(100), Duration::from_millis(100)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sync_error_on_unknown_start_byte() {
        let mut cursor = Cursor::new(vec![0x00u8]);
        let result =
            read_message(&mut cursor, 1, Duration::from_millis(100), Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
