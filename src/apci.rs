//! CS104 APCI (spec.md §3, component C8): the I/S/U frame header that
//! rides directly over TCP (no FT 1.2 framing — CS104 replaces the
//! serial link layer with a fixed 6-byte APCI plus length prefix), and
//! the k/w sliding-window bookkeeping that goes with it.
//!
//! Grounded on `cs104_connection.c`'s `checkSequenceNumber` (oldest/
//! newest sent N(S) tracking with wraparound) and its `t1..t3` timer
//! fields.

use crate::error::{IecError, IecResult};

pub const START_BYTE: u8 = 0x68;
pub const SEQ_MODULUS: u16 = 32768;

pub const U_STARTDT_ACT: u8 = 0x07;
pub const U_STARTDT_CON: u8 = 0x0B;
pub const U_STOPDT_ACT: u8 = 0x13;
pub const U_STOPDT_CON: u8 = 0x23;
pub const U_TESTFR_ACT: u8 = 0x43;
pub const U_TESTFR_CON: u8 = 0x83;

/// One APCI frame, carrying an optional ASDU payload for I-frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apci {
    I { send_seq: u16, recv_seq: u16, asdu: Vec<u8> },
    S { recv_seq: u16 },
    U { function: u8 },
}

fn encode_seq(seq: u16) -> [u8; 2] {
    ((seq << 1) & 0xFFFE).to_le_bytes()
}

fn decode_seq(lo: u8, hi: u8) -> u16 {
    (u16::from_le_bytes([lo, hi])) >> 1
}

impl Apci {
    /// Encodes this frame including the `68 L` start/length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut control = [0u8; 4];
        let asdu: &[u8] = match self {
            Apci::I { send_seq, recv_seq, asdu } => {
                let s = encode_seq(*send_seq);
                let r = encode_seq(*recv_seq);
                control = [s[0], s[1], r[0], r[1]];
                asdu
            }
            Apci::S { recv_seq } => {
                let r = encode_seq(*recv_seq);
                control = [0x01, 0x00, r[0], r[1]];
                &[]
            }
            Apci::U { function } => {
                control = [*function | 0x03, 0x00, 0x00, 0x00];
                &[]
            }
        };
        let length = (4 + asdu.len()) as u8;
        let mut out = Vec::with_capacity(2 + control.len() + asdu.len());
        out.push(START_BYTE);
        out.push(length);
        out.extend_from_slice(&control);
        out.extend_from_slice(asdu);
        out
    }

    /// Decodes a complete APDU (start byte, length, control, ASDU) from `buf`.
    pub fn decode(buf: &[u8]) -> IecResult<Self> {
        if buf.len() < 6 {
            return Err(IecError::InvalidEncoding("APDU shorter than fixed header".into()));
        }
        if buf[0] != START_BYTE {
            return Err(IecError::InvalidEncoding(format!(
                "APDU start byte 0x{:02X} != 0x68",
                buf[0]
            )));
        }
        let length = buf[1] as usize;
        if buf.len() != 2 + length {
            return Err(IecError::InvalidEncoding("APDU length field mismatch".into()));
        }
        let control = &buf[2..6];
        if control[0] & 0x01 == 0 {
            let send_seq = decode_seq(control[0], control[1]);
            let recv_seq = decode_seq(control[2], control[3]);
            Ok(Apci::I {
                send_seq,
                recv_seq,
                asdu: buf[6..].to_vec(),
            })
        } else if control[0] & 0x03 == 0x01 {
            let recv_seq = decode_seq(control[2], control[3]);
            Ok(Apci::S { recv_seq })
        } else {
            Ok(Apci::U { function: control[0] & 0xFC })
        }
    }

    /// Number of bytes `decode` needs once the `68 L` prefix is in
    /// hand: `length` more bytes after those first two.
    pub fn body_len_from_length_byte(length_byte: u8) -> usize {
        length_byte as usize
    }
}

/// One entry in the k-buffer: a sent-but-unconfirmed I-frame's N(S)
/// plus a handle back into the low-priority queue entry it carried, if
/// any (spec.md §3 `SentAsduSlot`). High-priority sends carry `None`
/// since [`crate::queue::HighPrioQueue`] has no entry-id bookkeeping to
/// confirm.
type SentAsduSlot = (u16, Option<u64>);

/// Tracks outstanding (sent, unconfirmed) I-frame sequence numbers for
/// one connection, enforcing the k-sized sliding window and validating
/// incoming N(R) values against the window actually in flight. Doubles
/// as the `SentAsduSlot` ring from spec.md §3: each slot remembers
/// which queue entry (if any) it carried, so an incoming N(R) can be
/// translated into the corresponding `MessageQueue::confirm_up_to`
/// call instead of confirming the queue by raw sequence number (the
/// two are different numbering spaces — N(S) wraps mod 32768 per
/// connection, `entry_id` is a queue-lifetime monotonic counter).
#[derive(Debug, Default)]
pub struct SendWindow {
    k: u16,
    send_count: u16,
    slots: std::collections::VecDeque<SentAsduSlot>,
}

impl SendWindow {
    pub fn new(k: u16) -> Self {
        Self {
            k,
            send_count: 0,
            slots: std::collections::VecDeque::new(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.outstanding() >= self.k as usize
    }

    /// Registers a new I-frame about to be sent, returning its N(S).
    /// `entry_id` is the low-priority queue entry this frame carries
    /// (`None` for a high-priority send, which the queue doesn't track).
    ///
    /// The slot stores the *post-increment* sequence number, i.e. the
    /// N(R) value the peer will send back once this frame (and only
    /// this frame) is acknowledged — N(R) means "next expected N(S)",
    /// not "last received N(S)" (cs104_connection.c's `sendIMessage`
    /// stamps `sentASDUs[i].seqNo` with `sendCount` *after* bumping it).
    pub fn record_sent(&mut self, entry_id: Option<u64>) -> u16 {
        let seq = self.send_count;
        self.send_count = (self.send_count + 1) % SEQ_MODULUS;
        self.slots.push_back((self.send_count, entry_id));
        seq
    }

    pub fn next_send_seq(&self) -> u16 {
        self.send_count
    }

    /// Validates and applies an incoming N(R), sliding the oldest
    /// pointer forward past every sequence number it confirms and
    /// returning the highest queue `entry_id` it covers (if any), for
    /// the caller to pass to `MessageQueue::confirm_up_to`. Mirrors
    /// `checkSequenceNumber`'s wraparound-aware range check.
    pub fn confirm(&mut self, recv_seq: u16) -> IecResult<Option<u64>> {
        let (oldest, newest) = match (self.slots.front(), self.slots.back()) {
            (Some(&(o, _)), Some(&(n, _))) => (o, n),
            _ => {
                if recv_seq == self.send_count {
                    return Ok(None);
                }
                return Err(IecError::SequenceError(format!(
                    "N(R) {recv_seq} received with empty send window (expected {})",
                    self.send_count
                )));
            }
        };

        let in_range = if oldest <= newest {
            recv_seq >= oldest && recv_seq <= newest
        } else {
            recv_seq >= oldest || recv_seq <= newest
        };
        // A duplicate ack of the already-fully-confirmed sequence (one
        // behind `oldest`) is a no-op per spec.md §9's note on
        // duplicate-acknowledgement handling, not an error.
        let is_prior_mark = recv_seq == (oldest + SEQ_MODULUS - 1) % SEQ_MODULUS;

        if !in_range && !is_prior_mark {
            return Err(IecError::SequenceError(format!(
                "N(R) {recv_seq} outside outstanding window [{oldest}, {newest}]"
            )));
        }

        if is_prior_mark {
            return Ok(None);
        }

        let mut last_entry_id = None;
        while let Some(&(seq, entry_id)) = self.slots.front() {
            self.slots.pop_front();
            if entry_id.is_some() {
                last_entry_id = entry_id;
            }
            if seq == recv_seq {
                break;
            }
        }
        Ok(last_entry_id)
    }
}

/// Connection lifecycle / link-status notifications a [`crate::client104::Client`]
/// or server-side connection task emits to observers, separately from
/// the request/response path (spec.md §5: callers watch this stream
/// rather than learn about a timeout-triggered close through a failed
/// `send_asdu` call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    StartDtConfirmed,
    StopDtConfirmed,
    Closed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u_frame_round_trip() {
        let frame = Apci::U { function: U_STARTDT_ACT };
        let encoded = frame.encode();
        assert_eq!(Apci::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn i_frame_round_trip() {
        let frame = Apci::I {
            send_seq: 5,
            recv_seq: 3,
            asdu: vec![1, 2, 3],
        };
        let encoded = frame.encode();
        assert_eq!(Apci::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn s_frame_round_trip() {
        let frame = Apci::S { recv_seq: 100 };
        let encoded = frame.encode();
        assert_eq!(Apci::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn send_window_confirms_in_order() {
        let mut window = SendWindow::new(3);
        window.record_sent(None); // N(S) 0
        window.record_sent(None); // N(S) 1
        window.record_sent(None); // N(S) 2
        assert!(window.is_full());
        // N(R)=2 is "next expected after N(S) 1", confirming the first two.
        window.confirm(2).unwrap();
        assert_eq!(window.outstanding(), 1);
        // N(R)=3 confirms the last outstanding frame (N(S) 2).
        window.confirm(3).unwrap();
        assert_eq!(window.outstanding(), 0);
    }

    #[test]
    fn send_window_rejects_out_of_range_confirmation() {
        let mut window = SendWindow::new(3);
        window.record_sent(None);
        assert!(window.confirm(50).is_err());
    }

    #[test]
    fn send_window_handles_sequence_wraparound() {
        let mut window = SendWindow::new(5);
        window.send_count = SEQ_MODULUS - 2;
        let a = window.record_sent(None);
        let b = window.record_sent(None);
        let c = window.record_sent(None);
        assert_eq!([a, b, c], [SEQ_MODULUS - 2, SEQ_MODULUS - 1, 0]);
        // N(R) one past the last N(S) sent (c), wrapped mod SEQ_MODULUS.
        window.confirm((c + 1) % SEQ_MODULUS).unwrap();
        assert_eq!(window.outstanding(), 0);
    }

    #[test]
    fn send_window_confirm_returns_highest_queue_entry_id() {
        let mut window = SendWindow::new(4);
        window.record_sent(Some(10)); // seq 0, low-prio entry 10
        window.record_sent(None); // seq 1, high-prio, untracked
        window.record_sent(Some(11)); // seq 2, low-prio entry 11
        // N(R)=3 is next-expected after the last sent N(S) (2), confirming all three.
        let confirmed = window.confirm(3).unwrap();
        assert_eq!(confirmed, Some(11));
        assert_eq!(window.outstanding(), 0);
    }

    #[test]
    fn send_window_duplicate_ack_of_oldest_minus_one_is_noop() {
        let mut window = SendWindow::new(3);
        window.record_sent(Some(1)); // N(S) 0, oldest slot stores N(R) 1
        window.record_sent(Some(2)); // N(S) 1, slot stores N(R) 2
        // Ack the N(R) one behind the oldest outstanding slot (0): a
        // duplicate of an already-fully-confirmed N(R).
        let result = window.confirm(0).unwrap();
        assert_eq!(result, None);
        assert_eq!(window.outstanding(), 2);
    }
}
