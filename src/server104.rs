//! CS104 server orchestration (spec.md §3, component C9): the TCP
//! listener, redundancy-group membership, and per-connection tasks
//! that share a redundancy group's event queue.
//!
//! Grounded on `cs104_slave.h`'s `CS104_ServerMode` (three redundancy
//! modes) and `CS104_RedundancyGroup` (named groups with an IP
//! allow-list), reworked around tokio tasks instead of the reference
//! implementation's thread-per-connection / poll-loop choice
//! (`CONFIG_USE_THREADS`).
//!
//! TLS is configuration surface only here: [`ServerConfig::tls`] is
//! accepted and threaded through to the listener's bind call, but this
//! crate does not implement a TLS handshake — wrap the accepted
//! [`tokio::net::TcpStream`] yourself if you need one, the same way a
//! caller would layer `tokio-rustls` over any other tokio listener.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::apci::ConnectionEvent;
use crate::asdu::Asdu;
use crate::common::{ApciParameters, ApplicationLayerParameters};
use crate::error::{IecError, IecResult};
use crate::queue::{HighPrioQueue, MessageQueue};

/// How incoming connections are grouped for the purpose of sharing an
/// outbound event queue (spec.md §3).
#[derive(Debug, Clone)]
pub enum ServerMode {
    /// Every connection shares one queue: events fan out to all
    /// clients identically, e.g. a single active master assumed.
    SingleRedundancyGroup,
    /// Each connection gets its own private queue.
    ConnectionIsRedundancyGroup,
    /// Connections are assigned to a named [`RedundancyGroup`] by
    /// source IP; each group has its own queue.
    MultipleRedundancyGroups(Vec<RedundancyGroup>),
}

/// A named group of allowed client IPs sharing one event queue.
#[derive(Debug, Clone)]
pub struct RedundancyGroup {
    pub name: String,
    pub allowed_clients: Vec<IpAddr>,
}

impl RedundancyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_clients: Vec::new(),
        }
    }

    pub fn with_allowed_client(mut self, ip: IpAddr) -> Self {
        self.allowed_clients.push(ip);
        self
    }

    fn accepts(&self, addr: IpAddr) -> bool {
        self.allowed_clients.is_empty() || self.allowed_clients.contains(&addr)
    }
}

/// Placeholder for a TLS configuration handle. This crate does not
/// perform a TLS handshake; the field exists so `ServerConfig` mirrors
/// the reference implementation's secure/insecure constructor split
/// without pretending to implement it.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub mode: ServerMode,
    pub alp: ApplicationLayerParameters,
    pub apci: ApciParameters,
    pub low_prio_queue_size: usize,
    pub high_prio_queue_size: usize,
    pub tls: Option<TlsConfig>,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2404".parse().unwrap(),
            mode: ServerMode::SingleRedundancyGroup,
            alp: ApplicationLayerParameters::default(),
            apci: ApciParameters::default(),
            low_prio_queue_size: 1000,
            high_prio_queue_size: 100,
            tls: None,
            max_connections: 32,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn build(self) -> IecResult<Self> {
        self.alp.build()?;
        self.apci.build()?;
        if let ServerMode::MultipleRedundancyGroups(groups) = &self.mode {
            if groups.is_empty() {
                return Err(IecError::ConfigError(
                    "multiple_redundancy_groups mode requires at least one group".into(),
                ));
            }
        }
        Ok(self)
    }
}

/// A dispatch hook consulted before the default received-ASDU channel
/// (spec.md §9 "Plugins"): the reference implementation specifies
/// plugins as a `(handle_asdu, run_task)` function-pointer pair with an
/// opaque context; a trait object is the idiomatic equivalent, with the
/// context captured by the implementor instead of passed back in.
///
/// The file-server plugin named there as the motivating example is out
/// of scope (spec.md's Non-goals exclude dynamic loading of plugins
/// from the network); this trait is the extensibility seam itself, for
/// whatever a caller wants to hang off received ASDUs.
#[cfg_attr(test, mockall::automock)]
pub trait Plugin: Send + Sync {
    /// Returns `true` if the plugin consumed `asdu`. The first plugin
    /// to claim an ASDU stops the chain; if none claim it, it goes to
    /// [`Server::receive`] as usual.
    fn handle_asdu(&self, asdu: &Asdu) -> bool;

    /// Polled once per connection-loop iteration so a plugin can drive
    /// background state (e.g. a multi-frame transfer in progress)
    /// without spawning its own task.
    fn run_task(&self);
}

struct GroupQueues {
    low: Mutex<MessageQueue>,
    high: Mutex<HighPrioQueue>,
    /// The peer currently allowed to be ACTIVE in this redundancy
    /// group. `SingleRedundancyGroup` and `MultipleRedundancyGroups`
    /// enforce exactly one active connection per group (spec.md §4.8):
    /// a new STARTDT_ACT here pushes `Some(peer)`, and every other
    /// connection sharing this group watches for the change and
    /// demotes itself back to inactive. `ConnectionIsRedundancyGroup`
    /// gives each connection its own `GroupQueues`, so this never fires
    /// across peers there.
    active_peer: watch::Sender<Option<SocketAddr>>,
}

impl GroupQueues {
    fn new(low_size: usize, high_size: usize) -> Self {
        let (active_peer, _) = watch::channel(None);
        Self {
            low: Mutex::new(MessageQueue::new(low_size)),
            high: Mutex::new(HighPrioQueue::new(high_size)),
            active_peer,
        }
    }
}

/// A running CS104 server. Accepts connections on `config.bind_address`
/// and fans received ASDUs out on a shared channel; outbound ASDUs are
/// broadcast to every connection in the addressed redundancy group.
pub struct Server {
    local_addr: SocketAddr,
    asdu_rx: Mutex<mpsc::UnboundedReceiver<(SocketAddr, Asdu)>>,
    event_rx: Mutex<mpsc::UnboundedReceiver<(SocketAddr, ConnectionEvent)>>,
    groups: Vec<(String, Arc<GroupQueues>)>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> IecResult<Self> {
        Self::bind_with_plugins(config, Vec::new()).await
    }

    /// Same as [`Server::bind`], additionally consulting `plugins` in
    /// order before an incoming ASDU is forwarded to [`Server::receive`]
    /// (spec.md §9 "Plugins").
    pub async fn bind_with_plugins(config: ServerConfig, plugins: Vec<Arc<dyn Plugin>>) -> IecResult<Self> {
        let config = config.build()?;
        let listener = TcpListener::bind(config.bind_address).await.map_err(IecError::Io)?;
        let local_addr = listener.local_addr().map_err(IecError::Io)?;
        info!("CS104 server listening on {local_addr}");

        let groups: Vec<(String, Arc<GroupQueues>)> = match &config.mode {
            ServerMode::SingleRedundancyGroup => vec![(
                "default".to_string(),
                Arc::new(GroupQueues::new(config.low_prio_queue_size, config.high_prio_queue_size)),
            )],
            ServerMode::ConnectionIsRedundancyGroup => Vec::new(),
            ServerMode::MultipleRedundancyGroups(defs) => defs
                .iter()
                .map(|g| {
                    (
                        g.name.clone(),
                        Arc::new(GroupQueues::new(config.low_prio_queue_size, config.high_prio_queue_size)),
                    )
                })
                .collect(),
        };

        let (asdu_tx, asdu_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let accept_groups = groups.clone();
        let plugins = Arc::new(plugins);
        tokio::spawn(accept_loop(listener, config, accept_groups, plugins, asdu_tx, event_tx));

        Ok(Self {
            local_addr,
            asdu_rx: Mutex::new(asdu_rx),
            event_rx: Mutex::new(event_rx),
            groups,
        })
    }

    /// The address actually bound, useful when `config.bind_address`
    /// asked for an ephemeral port (`:0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn receive(&self) -> Option<(SocketAddr, Asdu)> {
        self.asdu_rx.lock().await.recv().await
    }

    pub async fn next_event(&self) -> Option<(SocketAddr, ConnectionEvent)> {
        self.event_rx.lock().await.recv().await
    }

    /// Enqueues an ASDU for transmission to every connection in the
    /// named redundancy group (or, for `connection_is_redundancy_group`
    /// mode, set `group` to the peer address string captured from a
    /// prior `receive`/`next_event`).
    pub async fn send_to_group(&self, group: &str, asdu: &Asdu, alp: &ApplicationLayerParameters) -> IecResult<()> {
        let bytes = asdu.encode(alp)?;
        let queues = self
            .groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, q)| q.clone())
            .ok_or_else(|| IecError::ConfigError(format!("unknown redundancy group '{group}'")))?;
        queues.low.lock().await.enqueue(bytes);
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    groups: Vec<(String, Arc<GroupQueues>)>,
    plugins: Arc<Vec<Arc<dyn Plugin>>>,
    asdu_tx: mpsc::UnboundedSender<(SocketAddr, Asdu)>,
    event_tx: mpsc::UnboundedSender<(SocketAddr, ConnectionEvent)>,
) {
    let mut active_connections = 0usize;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        if active_connections >= config.max_connections {
            warn!("rejecting connection from {peer}: max_connections reached");
            drop(stream);
            continue;
        }

        let group_queues = match &config.mode {
            ServerMode::SingleRedundancyGroup => groups[0].1.clone(),
            ServerMode::ConnectionIsRedundancyGroup => {
                Arc::new(GroupQueues::new(config.low_prio_queue_size, config.high_prio_queue_size))
            }
            ServerMode::MultipleRedundancyGroups(defs) => {
                let matched = defs.iter().zip(groups.iter()).find(|(def, _)| def.accepts(peer.ip()));
                match matched {
                    Some((_, (_, queues))) => queues.clone(),
                    None => {
                        warn!("rejecting connection from {peer}: not in any redundancy group's allow-list");
                        drop(stream);
                        continue;
                    }
                }
            }
        };

        active_connections += 1;
        let alp = config.alp;
        let apci = config.apci;
        let asdu_tx = asdu_tx.clone();
        let event_tx = event_tx.clone();
        let plugins = plugins.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, alp, apci, group_queues, plugins, asdu_tx.clone(), event_tx.clone()).await;
            let _ = event_tx.send((peer, ConnectionEvent::Closed("connection task ended".into())));
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    alp: ApplicationLayerParameters,
    apci: ApciParameters,
    queues: Arc<GroupQueues>,
    plugins: Arc<Vec<Arc<dyn Plugin>>>,
    asdu_tx: mpsc::UnboundedSender<(SocketAddr, Asdu)>,
    event_tx: mpsc::UnboundedSender<(SocketAddr, ConnectionEvent)>,
) {
    use crate::apci::{Apci, SendWindow, U_STARTDT_CON, U_STOPDT_CON, U_TESTFR_ACT, U_TESTFR_CON};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let _ = event_tx.send((peer, ConnectionEvent::Connected));
    let (mut read_half, mut write_half) = stream.into_split();

    let mut send_window = SendWindow::new(apci.k);
    let mut recv_count: u16 = 0;
    let mut active = false;
    let mut scratch = Vec::new();
    let mut t3_deadline = tokio::time::Instant::now() + apci.t3;
    let mut active_peer_rx = queues.active_peer.subscribe();

    loop {
        let idle_send = async {
            if active && !send_window.is_full() {
                let from_high = {
                    let mut high = queues.high.lock().await;
                    high.dequeue()
                };
                match from_high {
                    Some(bytes) => Some((bytes, None)),
                    None => queues
                        .low
                        .lock()
                        .await
                        .next_waiting()
                        .map(|(id, b)| (b.to_vec(), Some(id))),
                }
            } else {
                None
            }
        };

        tokio::select! {
            biased;

            _ = tokio::time::sleep_until(t3_deadline) => {
                let frame = Apci::U { function: U_TESTFR_ACT };
                if write_half.write_all(&frame.encode()).await.is_err() {
                    break;
                }
                t3_deadline = tokio::time::Instant::now() + apci.t3;
            }

            changed = active_peer_rx.changed(), if active => {
                if changed.is_err() {
                    break;
                }
                if *active_peer_rx.borrow() != Some(peer) {
                    active = false;
                    queues.low.lock().await.requeue_unconfirmed();
                    if write_half.write_all(&Apci::U { function: U_STOPDT_CON }.encode()).await.is_err() {
                        break;
                    }
                    let _ = event_tx.send((peer, ConnectionEvent::StopDtConfirmed));
                }
            }

            maybe_bytes = idle_send => {
                if let Some((bytes, entry_id)) = maybe_bytes {
                    let seq = send_window.record_sent(entry_id);
                    let frame = Apci::I { send_seq: seq, recv_seq: recv_count, asdu: bytes };
                    if write_half.write_all(&frame.encode()).await.is_err() {
                        break;
                    }
                }
            }

            result = read_apdu_half(&mut read_half, &mut scratch) => {
                let frame = match result {
                    Ok(Some(f)) => f,
                    Ok(None) => break,
                    Err(e) => { warn!("{peer}: {e}"); break; }
                };
                t3_deadline = tokio::time::Instant::now() + apci.t3;
                match frame {
                    Apci::U { function } if function == crate::apci::U_STARTDT_ACT => {
                        active = true;
                        let _ = queues.active_peer.send(Some(peer));
                        let _ = write_half.write_all(&Apci::U { function: U_STARTDT_CON }.encode()).await;
                        let _ = event_tx.send((peer, ConnectionEvent::StartDtConfirmed));
                    }
                    Apci::U { function } if function == crate::apci::U_STOPDT_ACT => {
                        active = false;
                        if *queues.active_peer.borrow() == Some(peer) {
                            let _ = queues.active_peer.send(None);
                        }
                        let _ = write_half.write_all(&Apci::U { function: U_STOPDT_CON }.encode()).await;
                        let _ = event_tx.send((peer, ConnectionEvent::StopDtConfirmed));
                    }
                    Apci::U { function } if function == U_TESTFR_ACT => {
                        let _ = write_half.write_all(&Apci::U { function: U_TESTFR_CON }.encode()).await;
                    }
                    Apci::U { .. } => {}
                    Apci::S { recv_seq } => {
                        match send_window.confirm(recv_seq) {
                            Ok(Some(entry_id)) => {
                                queues.low.lock().await.confirm_up_to(entry_id).ok();
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("{peer}: {e}");
                                break;
                            }
                        }
                    }
                    Apci::I { send_seq, recv_seq, asdu } => {
                        if send_seq != recv_count {
                            warn!("{peer}: unexpected N(S) {send_seq}, expected {recv_count}");
                            break;
                        }
                        match send_window.confirm(recv_seq) {
                            Ok(Some(entry_id)) => {
                                queues.low.lock().await.confirm_up_to(entry_id).ok();
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("{peer}: {e}");
                                break;
                            }
                        }
                        recv_count = (recv_count + 1) % crate::apci::SEQ_MODULUS;
                        match Asdu::decode(&asdu, &alp) {
                            Ok(parsed) => {
                                let claimed = plugins.iter().any(|p| p.handle_asdu(&parsed));
                                if !claimed {
                                    let _ = asdu_tx.send((peer, parsed));
                                }
                            }
                            Err(e) => warn!("{peer}: failed to decode ASDU: {e}"),
                        }
                        let ack = Apci::S { recv_seq: recv_count };
                        let _ = write_half.write_all(&ack.encode()).await;
                    }
                }
            }
        }

        for plugin in plugins.iter() {
            plugin.run_task();
        }
    }

    // Whatever was sent but never acknowledged goes back to `waiting`
    // so the next connection accepted into this redundancy group
    // picks it up from `next_waiting` (spec.md §4.7 "Cancellation and
    // shutdown" / §8 scenario 4, redundancy failover).
    queues.low.lock().await.requeue_unconfirmed();
}

async fn read_apdu_half(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    scratch: &mut Vec<u8>,
) -> IecResult<Option<crate::apci::Apci>> {
    use crate::apci::Apci;
    use tokio::io::AsyncReadExt;

    let mut prefix = [0u8; 2];
    match read_half.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IecError::Io(e)),
    }
    if prefix[0] != crate::apci::START_BYTE {
        return Err(IecError::InvalidEncoding("bad APDU start byte".into()));
    }
    let len = Apci::body_len_from_length_byte(prefix[1]);
    scratch.clear();
    scratch.extend_from_slice(&prefix);
    scratch.resize(2 + len, 0);
    read_half.read_exact(&mut scratch[2..]).await.map_err(IecError::Io)?;
    Apci::decode(scratch).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_redundancy_groups_requires_a_group() {
        let config = ServerConfig::default().with_mode(ServerMode::MultipleRedundancyGroups(vec![]));
        assert!(config.build().is_err());
    }

    #[test]
    fn redundancy_group_with_empty_allow_list_accepts_any_ip() {
        let group = RedundancyGroup::new("north");
        assert!(group.accepts("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn redundancy_group_rejects_ip_outside_allow_list() {
        let group = RedundancyGroup::new("north").with_allowed_client("10.0.0.1".parse().unwrap());
        assert!(!group.accepts("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn group_queues_active_peer_overwrite_demotes_prior_holder() {
        let queues = GroupQueues::new(10, 10);
        let mut rx = queues.active_peer.subscribe();
        let first: SocketAddr = "10.0.0.1:2404".parse().unwrap();
        let second: SocketAddr = "10.0.0.2:2404".parse().unwrap();

        queues.active_peer.send(Some(first)).unwrap();
        assert_eq!(*rx.borrow(), Some(first));

        queues.active_peer.send(Some(second)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), Some(second));
    }

    #[test]
    fn plugin_chain_stops_at_the_first_claimant() {
        let mut first = MockPlugin::new();
        first.expect_handle_asdu().returning(|_| false);
        let mut second = MockPlugin::new();
        second.expect_handle_asdu().returning(|_| true);

        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(first), Arc::new(second)];
        let asdu = Asdu::new(
            crate::object::TypeId::CScNa1,
            false,
            crate::common::CauseOfTransmission::Activation,
            false,
            false,
            None,
            1,
        );
        assert!(plugins.iter().any(|p| p.handle_asdu(&asdu)));
    }
}
