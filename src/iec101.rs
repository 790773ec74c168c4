//! CS101 master/slave orchestration (spec.md §6): the serial-line
//! analog of [`crate::client104`]/[`crate::server104`], built on
//! [`crate::ft12`] framing and [`crate::link101`]'s FCB/FCV state
//! machines.
//!
//! Grounded on the same background-task-plus-channels shape as
//! client104.rs/server104.rs, adapted to a single shared serial line:
//! there is no accept loop, and a primary-unbalanced master drives a
//! round-robin poll cycle across its configured slave addresses
//! instead of waiting on whichever peer happens to write next.
//! `CS101_Master_pollSingleSlave`/`CS101_Master_useSlaveAddress` in the
//! reference implementation is the shape behind [`Master::poll_single_slave`]
//! and [`Master::is_channel_ready`]; its
//! `IEC60870_LinkLayerStateChangedHandler` callback becomes an event
//! channel here ([`Master::next_link_state_event`]), matching the
//! channel-based `next_event` already used by [`crate::client104::Client`]
//! and [`crate::server104::Server`] rather than introducing a second,
//! callback-based notification style into the crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::asdu::Asdu;
use crate::common::ApplicationLayerParameters;
use crate::error::{IecError, IecResult};
use crate::ft12::{self, Frame};
use crate::link101::{LinkLayerState, PrimaryEvent, PrimaryUnbalanced, SecondaryEvent, SecondaryUnbalanced};
use crate::queue::{HighPrioQueue, MessageQueue};

/// Serial line parameters: the CS101 analog of a CS104 socket address.
#[derive(Debug, Clone)]
pub struct SerialLineParameters {
    pub port_name: String,
    pub baud_rate: u32,
    /// Link address width in bytes: 0 (single-slave links omit it), 1, or 2.
    pub address_len: usize,
    /// How long a primary waits for a response before treating the poll as a timeout.
    pub link_timeout: Duration,
    /// Wait imposed on a secondary's message-start read; bounds idle polling.
    pub message_timeout: Duration,
    pub character_timeout: Duration,
}

impl Default for SerialLineParameters {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            address_len: 1,
            link_timeout: Duration::from_secs(2),
            message_timeout: Duration::from_secs(5),
            character_timeout: Duration::from_millis(500),
        }
    }
}

impl SerialLineParameters {
    fn open(&self) -> IecResult<tokio_serial::SerialStream> {
        tokio_serial::new(&self.port_name, self.baud_rate)
            .open_native_async()
            .map_err(|e| IecError::ConnectionFailed(format!("opening {}: {e}", self.port_name)))
    }
}

struct SlaveQueues {
    low: Mutex<MessageQueue>,
    high: Mutex<HighPrioQueue>,
}

impl SlaveQueues {
    fn new(low_size: usize, high_size: usize) -> Self {
        Self {
            low: Mutex::new(MessageQueue::new(low_size)),
            high: Mutex::new(HighPrioQueue::new(high_size)),
        }
    }
}

/// Builder for a [`Master`]'s serial line, poll set, and queue sizes.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub serial: SerialLineParameters,
    pub alp: ApplicationLayerParameters,
    pub slave_addresses: Vec<u32>,
    /// How often the round-robin poll cycle visits each slave when no
    /// explicit [`Master::poll_single_slave`] call is outstanding.
    pub poll_interval: Duration,
    pub low_prio_queue_size: usize,
    pub high_prio_queue_size: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            serial: SerialLineParameters::default(),
            alp: ApplicationLayerParameters::cs101_compact(),
            slave_addresses: Vec::new(),
            poll_interval: Duration::from_millis(500),
            low_prio_queue_size: 1000,
            high_prio_queue_size: 100,
        }
    }
}

impl MasterConfig {
    pub fn with_slave(mut self, address: u32) -> Self {
        self.slave_addresses.push(address);
        self
    }

    pub fn build(self) -> IecResult<Self> {
        self.alp.build()?;
        if self.slave_addresses.is_empty() {
            return Err(IecError::ConfigError("master requires at least one slave address".into()));
        }
        Ok(self)
    }
}

enum MasterCommand {
    PollSingleSlave(u32),
    SendAsdu(u32, Asdu, bool),
    Shutdown,
}

/// A running CS101 primary-unbalanced master. Cloning is cheap; clones
/// share the background task driving the poll cycle over one serial line.
#[derive(Clone)]
pub struct Master {
    cmd_tx: mpsc::UnboundedSender<MasterCommand>,
    asdu_rx: Arc<Mutex<mpsc::UnboundedReceiver<(u32, Asdu)>>>,
    link_event_rx: Arc<Mutex<mpsc::UnboundedReceiver<(u32, LinkLayerState)>>>,
    channel_state: Arc<Mutex<HashMap<u32, LinkLayerState>>>,
}

impl Master {
    /// Opens the serial line and spawns the polling task.
    pub async fn connect(config: MasterConfig) -> IecResult<Self> {
        let config = config.build()?;
        let port = config.serial.open()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (asdu_tx, asdu_rx) = mpsc::unbounded_channel();
        let (link_event_tx, link_event_rx) = mpsc::unbounded_channel();
        let channel_state = Arc::new(Mutex::new(HashMap::new()));

        let queues: HashMap<u32, Arc<SlaveQueues>> = config
            .slave_addresses
            .iter()
            .map(|&a| (a, Arc::new(SlaveQueues::new(config.low_prio_queue_size, config.high_prio_queue_size))))
            .collect();

        tokio::spawn(master_task(
            port,
            config,
            cmd_rx,
            asdu_tx,
            link_event_tx,
            channel_state.clone(),
            queues,
        ));

        Ok(Self {
            cmd_tx,
            asdu_rx: Arc::new(Mutex::new(asdu_rx)),
            link_event_rx: Arc::new(Mutex::new(link_event_rx)),
            channel_state,
        })
    }

    /// Requests an out-of-cycle poll of `address` ahead of the next
    /// scheduled round-robin visit.
    pub fn poll_single_slave(&self, address: u32) -> IecResult<()> {
        self.cmd_tx
            .send(MasterCommand::PollSingleSlave(address))
            .map_err(|_| IecError::NotConnected)
    }

    /// True once `address`'s link layer is `Idle` or `Available` —
    /// i.e. ready to accept a fresh request rather than mid-exchange
    /// or down after repeated timeouts.
    pub async fn is_channel_ready(&self, address: u32) -> bool {
        matches!(
            self.channel_state.lock().await.get(&address),
            Some(LinkLayerState::Idle) | Some(LinkLayerState::Available) | None
        )
    }

    pub fn send_asdu(&self, address: u32, asdu: Asdu) -> IecResult<()> {
        self.cmd_tx
            .send(MasterCommand::SendAsdu(address, asdu, false))
            .map_err(|_| IecError::NotConnected)
    }

    pub fn send_asdu_high_priority(&self, address: u32, asdu: Asdu) -> IecResult<()> {
        self.cmd_tx
            .send(MasterCommand::SendAsdu(address, asdu, true))
            .map_err(|_| IecError::NotConnected)
    }

    pub async fn receive(&self) -> Option<(u32, Asdu)> {
        self.asdu_rx.lock().await.recv().await
    }

    /// Waits for the next link-layer state transition. This is the
    /// channel-based equivalent of registering a
    /// link-layer-state-changed handler: poll it in a loop instead of
    /// passing in a callback.
    pub async fn next_link_state_event(&self) -> Option<(u32, LinkLayerState)> {
        self.link_event_rx.lock().await.recv().await
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(MasterCommand::Shutdown);
    }
}

async fn master_task(
    mut port: tokio_serial::SerialStream,
    config: MasterConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<MasterCommand>,
    asdu_tx: mpsc::UnboundedSender<(u32, Asdu)>,
    link_event_tx: mpsc::UnboundedSender<(u32, LinkLayerState)>,
    channel_state: Arc<Mutex<HashMap<u32, LinkLayerState>>>,
    queues: HashMap<u32, Arc<SlaveQueues>>,
) {
    let mut primary = PrimaryUnbalanced::new(config.serial.address_len);
    for &address in &config.slave_addresses {
        primary.add_slave(address);
        channel_state.lock().await.insert(address, LinkLayerState::Idle);
    }

    // RESET_REMOTE_LINK every configured slave before the first poll,
    // mirroring CS101_Master's own startup sequence.
    for &address in &config.slave_addresses {
        if let Err(e) = exchange(
            &mut port,
            &config,
            &mut primary,
            address,
            primary.build_reset_remote_link(address).expect("slave was just registered"),
        )
        .await
        {
            warn!("reset of slave {address} failed: {e}");
        }
        let _ = link_event_tx.send((address, primary.state_of(address).unwrap_or(LinkLayerState::Error)));
    }

    let mut next_tick: Vec<u32> = config.slave_addresses.clone();
    let mut tick_index = 0usize;
    let mut poll_deadline = Instant::now() + config.poll_interval;

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(MasterCommand::Shutdown) => break,
                    Some(MasterCommand::PollSingleSlave(address)) => {
                        next_tick.insert(0, address);
                    }
                    Some(MasterCommand::SendAsdu(address, asdu, high_priority)) => {
                        let Some(slave_queues) = queues.get(&address) else {
                            warn!("send_asdu to unconfigured slave {address}");
                            continue;
                        };
                        match asdu.encode(&config.alp) {
                            Ok(bytes) if high_priority => {
                                if let Err(e) = slave_queues.high.lock().await.enqueue(bytes) {
                                    warn!("high-priority queue for slave {address} full: {e}");
                                }
                            }
                            Ok(bytes) => {
                                slave_queues.low.lock().await.enqueue(bytes);
                            }
                            Err(e) => warn!("failed to encode outgoing ASDU for slave {address}: {e}"),
                        }
                    }
                }
            }

            _ = tokio::time::sleep_until(poll_deadline) => {
                if tick_index >= next_tick.len() {
                    tick_index = 0;
                    next_tick = config.slave_addresses.clone();
                }
                if let Some(&address) = next_tick.get(tick_index) {
                    tick_index += 1;
                    poll_one_slave(&mut port, &config, &mut primary, address, &queues, &asdu_tx).await;
                    let _ = link_event_tx.send((address, primary.state_of(address).unwrap_or(LinkLayerState::Error)));
                    channel_state.lock().await.insert(address, primary.state_of(address).unwrap_or(LinkLayerState::Error));
                }
                poll_deadline = Instant::now() + config.poll_interval;
            }
        }
    }
}

/// One full poll cycle for `address`: drain a pending outbound ASDU
/// with a confirmed send if one is queued, otherwise poll class 2 data.
async fn poll_one_slave(
    port: &mut tokio_serial::SerialStream,
    config: &MasterConfig,
    primary: &mut PrimaryUnbalanced,
    address: u32,
    queues: &HashMap<u32, Arc<SlaveQueues>>,
    asdu_tx: &mpsc::UnboundedSender<(u32, Asdu)>,
) {
    let Some(slave_queues) = queues.get(&address) else { return };

    let outbound = {
        let from_high = slave_queues.high.lock().await.dequeue();
        match from_high {
            Some(bytes) => Some(bytes),
            None => slave_queues.low.lock().await.next_waiting().map(|(_, b)| b.to_vec()),
        }
    };

    let frame = match outbound {
        Some(bytes) => match primary.build_send_confirmed(address, bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!("slave {address}: {e}");
                return;
            }
        },
        None => match primary.build_data_request(address, false) {
            Ok(f) => f,
            Err(e) => {
                warn!("slave {address}: {e}");
                return;
            }
        },
    };

    match exchange(port, config, primary, address, frame).await {
        Ok(PrimaryEvent::UserData(bytes)) => match Asdu::decode(&bytes, &config.alp) {
            Ok(asdu) => {
                let _ = asdu_tx.send((address, asdu));
            }
            Err(e) => warn!("slave {address}: failed to decode ASDU: {e}"),
        },
        Ok(_) => {}
        Err(e) => debug!("slave {address}: poll failed: {e}"),
    }
}

async fn exchange(
    port: &mut tokio_serial::SerialStream,
    config: &MasterConfig,
    primary: &mut PrimaryUnbalanced,
    address: u32,
    frame: Frame,
) -> IecResult<PrimaryEvent> {
    let bytes = encode_frame(&frame, config.serial.address_len);
    ft12::send_message(port, &bytes).await?;
    let response = ft12::read_message(
        port,
        config.serial.address_len,
        config.serial.link_timeout,
        config.serial.character_timeout,
    )
    .await;
    match response {
        Ok(frame) => primary.handle_response(address, frame),
        Err(e) => {
            if primary.handle_timeout(address)? {
                warn!("slave {address}: link layer entered Error state after repeated timeouts");
            }
            Err(e)
        }
    }
}

fn encode_frame(frame: &Frame, address_len: usize) -> Vec<u8> {
    match frame {
        Frame::Ack => ft12::encode_ack().to_vec(),
        Frame::Fixed { control, address } => ft12::encode_fixed(*control, *address, address_len),
        Frame::Variable { control, address, data } => ft12::encode_variable(*control, *address, address_len, data),
    }
}

/// Builder for a [`Slave`]'s serial line, address, and queue sizes.
#[derive(Debug, Clone)]
pub struct SlaveConfig {
    pub serial: SerialLineParameters,
    pub alp: ApplicationLayerParameters,
    pub address: u32,
    pub low_prio_queue_size: usize,
    pub high_prio_queue_size: usize,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            serial: SerialLineParameters::default(),
            alp: ApplicationLayerParameters::cs101_compact(),
            address: 1,
            low_prio_queue_size: 1000,
            high_prio_queue_size: 100,
        }
    }
}

impl SlaveConfig {
    pub fn build(self) -> IecResult<Self> {
        self.alp.build()?;
        Ok(self)
    }
}

enum SlaveCommand {
    SendAsdu(Asdu, bool),
    Shutdown,
}

/// A running CS101 secondary-unbalanced slave, answering one primary's
/// polls over a single serial line.
#[derive(Clone)]
pub struct Slave {
    cmd_tx: mpsc::UnboundedSender<SlaveCommand>,
    asdu_rx: Arc<Mutex<mpsc::UnboundedReceiver<Asdu>>>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<LinkLayerState>>>,
}

impl Slave {
    pub async fn bind(config: SlaveConfig) -> IecResult<Self> {
        let config = config.build()?;
        let port = config.serial.open()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (asdu_tx, asdu_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(slave_task(port, config, cmd_rx, asdu_tx, event_tx));

        Ok(Self {
            cmd_tx,
            asdu_rx: Arc::new(Mutex::new(asdu_rx)),
            event_rx: Arc::new(Mutex::new(event_rx)),
        })
    }

    pub fn send_asdu(&self, asdu: Asdu) -> IecResult<()> {
        self.cmd_tx
            .send(SlaveCommand::SendAsdu(asdu, false))
            .map_err(|_| IecError::NotConnected)
    }

    pub fn send_asdu_high_priority(&self, asdu: Asdu) -> IecResult<()> {
        self.cmd_tx
            .send(SlaveCommand::SendAsdu(asdu, true))
            .map_err(|_| IecError::NotConnected)
    }

    pub async fn receive(&self) -> Option<Asdu> {
        self.asdu_rx.lock().await.recv().await
    }

    pub async fn next_link_state_event(&self) -> Option<LinkLayerState> {
        self.event_rx.lock().await.recv().await
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(SlaveCommand::Shutdown);
    }
}

async fn slave_task(
    mut port: tokio_serial::SerialStream,
    config: SlaveConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<SlaveCommand>,
    asdu_tx: mpsc::UnboundedSender<Asdu>,
    event_tx: mpsc::UnboundedSender<LinkLayerState>,
) {
    let mut secondary = SecondaryUnbalanced::new(config.address);
    let mut low_queue = MessageQueue::new(config.low_prio_queue_size);
    let mut high_queue = HighPrioQueue::new(config.high_prio_queue_size);
    let mut last_reply: Option<Frame> = None;

    loop {
        let frame = tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(SlaveCommand::Shutdown) => break,
                    Some(SlaveCommand::SendAsdu(asdu, high_priority)) => {
                        match asdu.encode(&config.alp) {
                            Ok(bytes) if high_priority => {
                                if let Err(e) = high_queue.enqueue(bytes) {
                                    warn!("high-priority queue full: {e}");
                                }
                            }
                            Ok(bytes) => { low_queue.enqueue(bytes); }
                            Err(e) => warn!("failed to encode outgoing ASDU: {e}"),
                        }
                        continue;
                    }
                }
            }

            result = ft12::read_message(&mut port, config.serial.address_len, config.serial.message_timeout, config.serial.character_timeout) => {
                match result {
                    Ok(f) => f,
                    Err(e) => { debug!("read error: {e}"); continue; }
                }
            }
        };

        let event = match secondary.handle_request(frame) {
            Ok(event) => event,
            Err(e) => {
                if e.to_string().contains("duplicate-fcb-replay") {
                    if let Some(reply) = &last_reply {
                        let bytes = encode_frame(reply, config.serial.address_len);
                        let _ = ft12::send_message(&mut port, &bytes).await;
                    }
                } else {
                    warn!("secondary {}: {e}", config.address);
                }
                continue;
            }
        };

        let _ = event_tx.send(LinkLayerState::Available);

        let reply = match event {
            SecondaryEvent::ResetLink => {
                low_queue.clear();
                secondary.build_ack()
            }
            SecondaryEvent::StatusRequest => secondary.build_ack(),
            SecondaryEvent::UserData(bytes) => {
                match Asdu::decode(&bytes, &config.alp) {
                    Ok(asdu) => {
                        let _ = asdu_tx.send(asdu);
                    }
                    Err(e) => warn!("secondary {}: failed to decode ASDU: {e}", config.address),
                }
                secondary.build_ack()
            }
            SecondaryEvent::DataRequest { .. } => {
                let pending = high_queue.dequeue().or_else(|| low_queue.next_waiting().map(|(_, b)| b.to_vec()));
                match pending {
                    Some(bytes) => secondary.build_user_data(bytes),
                    None => secondary.build_nack(),
                }
            }
        };

        let bytes = encode_frame(&reply, config.serial.address_len);
        if let Err(e) = ft12::send_message(&mut port, &bytes).await {
            warn!("secondary {}: write failed: {e}", config.address);
            break;
        }
        last_reply = Some(reply);
    }
}
