//! CS104 client connection (spec.md §3, component C8 continued): the
//! public `Client` handle plus the background task that drives the
//! APCI state machine over a TCP stream.
//!
//! Grounded on `cs104_connection.c`'s state set (`STATE_IDLE`,
//! `STATE_INACTIVE`, `STATE_ACTIVE`, the two `WAITING_FOR_*_CON`
//! states) and its `t1`/`t2`/`t3` timer roles, reworked around a tokio
//! task communicating with callers over channels instead of a
//! poll-driven `CS104_Connection_run` loop the caller must invoke.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::apci::{Apci, ConnectionEvent, SendWindow, U_STARTDT_ACT, U_STARTDT_CON, U_STOPDT_ACT, U_STOPDT_CON, U_TESTFR_ACT, U_TESTFR_CON};
use crate::asdu::Asdu;
use crate::common::{ApciParameters, ApplicationLayerParameters, CauseOfTransmission};
use crate::error::{IecError, IecResult};
use crate::object::{InformationObject, IoBody, TypeId};
use crate::queue::{HighPrioQueue, MessageQueue};
use crate::time::CP56Time2a;

/// Connection lifecycle state, matching `cs104_connection.c`'s state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Inactive,
    WaitingStartDtCon,
    Active,
    WaitingStopDtCon,
}

/// Builder for a [`Client`]'s connection parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub alp: ApplicationLayerParameters,
    pub apci: ApciParameters,
    pub low_prio_queue_size: usize,
    pub high_prio_queue_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2404,
            alp: ApplicationLayerParameters::default(),
            apci: ApciParameters::default(),
            low_prio_queue_size: 1000,
            high_prio_queue_size: 100,
        }
    }
}

impl ClientConfig {
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_apci(mut self, apci: ApciParameters) -> Self {
        self.apci = apci;
        self
    }

    pub fn with_alp(mut self, alp: ApplicationLayerParameters) -> Self {
        self.alp = alp;
        self
    }

    pub fn build(self) -> IecResult<Self> {
        self.alp.build()?;
        self.apci.build()?;
        Ok(self)
    }
}

enum Command {
    StartDt,
    StopDt,
    SendAsdu(Asdu, bool /* high priority */),
    Shutdown,
}

/// A running CS104 client connection. Cloning is cheap; all clones
/// share the same background task and channels.
#[derive(Clone)]
pub struct Client {
    alp: ApplicationLayerParameters,
    cmd_tx: mpsc::UnboundedSender<Command>,
    asdu_rx: std::sync::Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Asdu>>>,
    event_rx: std::sync::Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    buffer_full: Arc<AtomicBool>,
}

impl Client {
    /// Connects to `config.host:config.port` and spawns the connection task.
    pub async fn connect(config: ClientConfig) -> IecResult<Self> {
        let config = config.build()?;
        let stream = tokio::time::timeout(
            config.apci.t0,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| IecError::Timeout("t0 connection timeout".into()))?
        .map_err(|e| IecError::ConnectionFailed(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (asdu_tx, asdu_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let buffer_full = Arc::new(AtomicBool::new(false));
        let alp = config.alp;

        tokio::spawn(connection_task(stream, config, cmd_rx, asdu_tx, event_tx, buffer_full.clone()));

        Ok(Self {
            alp,
            cmd_tx,
            asdu_rx: std::sync::Arc::new(tokio::sync::Mutex::new(asdu_rx)),
            event_rx: std::sync::Arc::new(tokio::sync::Mutex::new(event_rx)),
            buffer_full,
        })
    }

    pub async fn start_dt(&self) -> IecResult<()> {
        self.cmd_tx
            .send(Command::StartDt)
            .map_err(|_| IecError::NotConnected)
    }

    pub async fn stop_dt(&self) -> IecResult<()> {
        self.cmd_tx
            .send(Command::StopDt)
            .map_err(|_| IecError::NotConnected)
    }

    pub async fn send_asdu(&self, asdu: Asdu) -> IecResult<()> {
        self.cmd_tx
            .send(Command::SendAsdu(asdu, false))
            .map_err(|_| IecError::NotConnected)
    }

    pub async fn send_asdu_high_priority(&self, asdu: Asdu) -> IecResult<()> {
        self.cmd_tx
            .send(Command::SendAsdu(asdu, true))
            .map_err(|_| IecError::NotConnected)
    }

    /// Waits for the next received ASDU. Returns `Ok(None)` once the
    /// connection has closed and no further ASDUs will arrive.
    pub async fn receive(&self) -> IecResult<Option<Asdu>> {
        Ok(self.asdu_rx.lock().await.recv().await)
    }

    /// Waits for the next lifecycle event (connected, STARTDT
    /// confirmed, closed, ...).
    pub async fn next_event(&self) -> Option<ConnectionEvent> {
        self.event_rx.lock().await.recv().await
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    /// `true` once the k-sized send window is full and further
    /// `send_asdu` calls will only be queued, not transmitted
    /// immediately.
    pub fn is_transmit_buffer_full(&self) -> bool {
        self.buffer_full.load(Ordering::Relaxed)
    }

    fn new_asdu(&self, type_id: TypeId, cot: CauseOfTransmission, ca: u32) -> Asdu {
        Asdu::new(type_id, false, cot, false, false, None, ca)
    }

    fn add_single_io(mut asdu: Asdu, io: InformationObject, alp: &ApplicationLayerParameters) -> IecResult<Asdu> {
        asdu.add_io(io, alp)
            .map_err(|e| IecError::ProtocolViolation(e.to_string()))?;
        Ok(asdu)
    }

    /// Sends a general or group interrogation command (type 100).
    pub async fn send_interrogation(&self, cot: CauseOfTransmission, ca: u32, qoi: u8) -> IecResult<()> {
        let asdu = self.new_asdu(TypeId::CIcNa1, cot, ca);
        let asdu = Self::add_single_io(
            asdu,
            InformationObject { ioa: 0, body: IoBody::InterrogationCommand { qoi } },
            &self.alp,
        )?;
        self.send_asdu_high_priority(asdu).await
    }

    /// Sends a counter interrogation command (type 101).
    pub async fn send_counter_interrogation(&self, cot: CauseOfTransmission, ca: u32, qcc: u8) -> IecResult<()> {
        let asdu = self.new_asdu(TypeId::CCiNa1, cot, ca);
        let asdu = Self::add_single_io(
            asdu,
            InformationObject { ioa: 0, body: IoBody::CounterInterrogationCommand { qcc } },
            &self.alp,
        )?;
        self.send_asdu_high_priority(asdu).await
    }

    /// Sends a read command (type 102) for a single information object address.
    pub async fn send_read(&self, ca: u32, ioa: u32) -> IecResult<()> {
        let asdu = self.new_asdu(TypeId::CRdNa1, CauseOfTransmission::Request, ca);
        let asdu = Self::add_single_io(asdu, InformationObject { ioa, body: IoBody::ReadCommand }, &self.alp)?;
        self.send_asdu_high_priority(asdu).await
    }

    /// Sends a clock synchronization command (type 103).
    pub async fn send_clock_sync(&self, ca: u32, cp56: CP56Time2a) -> IecResult<()> {
        let asdu = self.new_asdu(TypeId::CCsNa1, CauseOfTransmission::Activation, ca);
        let asdu = Self::add_single_io(
            asdu,
            InformationObject { ioa: 0, body: IoBody::ClockSynchronizationCommand { time: cp56 } },
            &self.alp,
        )?;
        self.send_asdu_high_priority(asdu).await
    }

    /// Sends a test command with timestamp (type 107).
    pub async fn send_test_with_timestamp(&self, ca: u32, test_sequence_counter: u16, cp56: CP56Time2a) -> IecResult<()> {
        let asdu = self.new_asdu(TypeId::CTsTa1, CauseOfTransmission::Activation, ca);
        let asdu = Self::add_single_io(
            asdu,
            InformationObject {
                ioa: 0,
                body: IoBody::TestCommandWithTimestamp { test_sequence_counter, time: cp56 },
            },
            &self.alp,
        )?;
        self.send_asdu_high_priority(asdu).await
    }

    /// Sends a process command (single/double point, setpoint, ...)
    /// already built by the caller, wrapping it in a type-matched ASDU.
    /// `type_id` must match the variant of `io.body`.
    pub async fn send_process_command(&self, type_id: TypeId, cot: CauseOfTransmission, ca: u32, io: InformationObject) -> IecResult<()> {
        let asdu = self.new_asdu(type_id, cot, ca);
        let asdu = Self::add_single_io(asdu, io, &self.alp)?;
        self.send_asdu(asdu).await
    }
}

async fn connection_task(
    mut stream: TcpStream,
    config: ClientConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    asdu_tx: mpsc::UnboundedSender<Asdu>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    buffer_full: Arc<AtomicBool>,
) {
    let _ = event_tx.send(ConnectionEvent::Connected);

    let mut state = ConnState::Inactive;
    let mut send_window = SendWindow::new(config.apci.k);
    let mut recv_count: u16 = 0;
    let mut unacked_received: u16 = 0;
    let mut low_queue = MessageQueue::new(config.low_prio_queue_size);
    let mut high_queue = HighPrioQueue::new(config.high_prio_queue_size);

    let mut t3_deadline = Instant::now() + config.apci.t3;
    let mut u_frame_deadline: Option<Instant> = None;
    let mut last_ack_time = Instant::now();

    let mut read_buf = Vec::new();

    let close_reason = loop {
        let sleep_until = u_frame_deadline.unwrap_or(t3_deadline).min(t3_deadline);
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Shutdown) | None => break "client requested shutdown".to_string(),
                    Some(Command::StartDt) => {
                        if let Err(e) = send_apci(&mut stream, Apci::U { function: U_STARTDT_ACT }).await {
                            break e.to_string();
                        }
                        state = ConnState::WaitingStartDtCon;
                        u_frame_deadline = Some(Instant::now() + config.apci.t1);
                    }
                    Some(Command::StopDt) => {
                        if let Err(e) = send_apci(&mut stream, Apci::U { function: U_STOPDT_ACT }).await {
                            break e.to_string();
                        }
                        state = ConnState::WaitingStopDtCon;
                        u_frame_deadline = Some(Instant::now() + config.apci.t1);
                    }
                    Some(Command::SendAsdu(asdu, high_priority)) => {
                        let bytes = match asdu.encode(&config.alp) {
                            Ok(b) => b,
                            Err(e) => { warn!("failed to encode outgoing ASDU: {e}"); continue; }
                        };
                        if high_priority {
                            if let Err(e) = high_queue.enqueue(bytes) {
                                warn!("high-priority queue full: {e}");
                            }
                        } else {
                            low_queue.enqueue(bytes);
                        }
                    }
                }
            }

            _ = tokio::time::sleep_until(sleep_until) => {
                if let Some(deadline) = u_frame_deadline {
                    if Instant::now() >= deadline {
                        break "t1 timeout waiting for U-frame confirmation".to_string();
                    }
                }
                if Instant::now() >= t3_deadline {
                    if let Err(e) = send_apci(&mut stream, Apci::U { function: U_TESTFR_ACT }).await {
                        break e.to_string();
                    }
                    u_frame_deadline = Some(Instant::now() + config.apci.t1);
                    t3_deadline = Instant::now() + config.apci.t3;
                }
            }

            frame = read_apdu(&mut stream, &mut read_buf) => {
                let frame = match frame {
                    Ok(Some(f)) => f,
                    Ok(None) => break "peer closed the connection".to_string(),
                    Err(e) => break e.to_string(),
                };
                t3_deadline = Instant::now() + config.apci.t3;
                match frame {
                    Apci::U { function } if function == U_STARTDT_CON => {
                        state = ConnState::Active;
                        u_frame_deadline = None;
                        let _ = event_tx.send(ConnectionEvent::StartDtConfirmed);
                    }
                    Apci::U { function } if function == U_STOPDT_CON => {
                        state = ConnState::Inactive;
                        u_frame_deadline = None;
                        low_queue.requeue_unconfirmed();
                        let _ = event_tx.send(ConnectionEvent::StopDtConfirmed);
                    }
                    Apci::U { function } if function == U_TESTFR_ACT => {
                        if let Err(e) = send_apci(&mut stream, Apci::U { function: U_TESTFR_CON }).await {
                            break e.to_string();
                        }
                    }
                    Apci::U { function } if function == U_TESTFR_CON => {
                        u_frame_deadline = None;
                    }
                    Apci::U { .. } => {}
                    Apci::S { recv_seq } => {
                        match send_window.confirm(recv_seq) {
                            Ok(Some(entry_id)) => {
                                if let Err(e) = low_queue.confirm_up_to(entry_id) {
                                    debug!("message queue confirm: {e}");
                                }
                            }
                            Ok(None) => {}
                            Err(e) => break e.to_string(),
                        }
                    }
                    Apci::I { send_seq, recv_seq, asdu } => {
                        if state != ConnState::Active {
                            break "received I-frame while not in ACTIVE state".to_string();
                        }
                        if send_seq != recv_count {
                            break format!("unexpected N(S) {send_seq}, expected {recv_count}");
                        }
                        match send_window.confirm(recv_seq) {
                            Ok(Some(entry_id)) => {
                                if let Err(e) = low_queue.confirm_up_to(entry_id) {
                                    debug!("message queue confirm: {e}");
                                }
                            }
                            Ok(None) => {}
                            Err(e) => break e.to_string(),
                        }
                        recv_count = (recv_count + 1) % crate::apci::SEQ_MODULUS;
                        unacked_received += 1;

                        match Asdu::decode(&asdu, &config.alp) {
                            Ok(parsed) => { let _ = asdu_tx.send(parsed); }
                            Err(e) => warn!("failed to decode incoming ASDU: {e}"),
                        }

                        if unacked_received >= config.apci.w
                            || Instant::now().duration_since(last_ack_time) >= config.apci.t2
                        {
                            if let Err(e) = send_apci(&mut stream, Apci::S { recv_seq: recv_count }).await {
                                break e.to_string();
                            }
                            unacked_received = 0;
                            last_ack_time = Instant::now();
                        }
                    }
                }
            }
        }

        if state == ConnState::Active && !send_window.is_full() {
            let next = if let Some(bytes) = high_queue.dequeue() {
                Some((bytes, None))
            } else {
                low_queue.next_waiting().map(|(id, b)| (b.to_vec(), Some(id)))
            };
            if let Some((bytes, entry_id)) = next {
                let seq = send_window.record_sent(entry_id);
                let frame = Apci::I {
                    send_seq: seq,
                    recv_seq: recv_count,
                    asdu: bytes,
                };
                if let Err(e) = send_apci(&mut stream, frame).await {
                    break e.to_string();
                }
                unacked_received = 0;
                last_ack_time = Instant::now();
            }
        }

        buffer_full.store(send_window.is_full(), Ordering::Relaxed);
    };

    let _ = event_tx.send(ConnectionEvent::Closed(close_reason));
}

async fn send_apci(stream: &mut TcpStream, apci: Apci) -> IecResult<()> {
    stream.write_all(&apci.encode()).await.map_err(IecError::Io)?;
    stream.flush().await.map_err(IecError::Io)?;
    Ok(())
}

/// Reads one complete APDU (`68 L` prefix then `L` more bytes) from
/// `stream`, reusing `scratch` across calls to avoid reallocating.
async fn read_apdu(stream: &mut TcpStream, scratch: &mut Vec<u8>) -> IecResult<Option<Apci>> {
    let mut prefix = [0u8; 2];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IecError::Io(e)),
    }
    if prefix[0] != crate::apci::START_BYTE {
        return Err(IecError::InvalidEncoding(format!(
            "APDU start byte 0x{:02X} != 0x68",
            prefix[0]
        )));
    }
    let len = Apci::body_len_from_length_byte(prefix[1]);
    scratch.clear();
    scratch.extend_from_slice(&prefix);
    scratch.resize(2 + len, 0);
    stream.read_exact(&mut scratch[2..]).await.map_err(IecError::Io)?;
    Apci::decode(scratch).map(Some)
}
