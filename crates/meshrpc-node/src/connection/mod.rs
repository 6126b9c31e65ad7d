//! Transport connections
//!
//! A [`Connection`] wraps exactly one TCP stream, one UDP peer or one HTTP
//! client binding. Callers write through it concurrently; for TCP and dialed
//! UDP a single read loop task owns the read half, reassembles frames and
//! routes each complete message:
//!
//! - responses settle the connection's [`CorrelationTable`]
//! - requests go to the node's [`Inbound`] handler, which runs them in their
//!   own task so a slow handler never stalls the read loop
//!
//! A failed write flags the connection `wrong`. It stays usable for probing
//! but is skipped by routing until a probe clears the flag.

mod http;
mod tcp;
mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use meshrpc_common::protocol::builtin::{DIAL_REGISTER, PING, RESERVED_MAX};
use meshrpc_common::protocol::error::{MeshError, Result};
use meshrpc_common::protocol::frame::MAX_CORRELATION_ID;
use meshrpc_common::protocol::{Message, MessageKind, NodeIdentity, Reassembler};
use meshrpc_common::transport::FrameCodec;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::correlation::{CorrelationTable, Waiter};

use self::http::HttpLink;
use self::tcp::TcpLink;
use self::udp::UdpLink;

/// How many times a call draws a fresh correlation id when the drawn one is
/// still held by an older call.
const REGISTER_ATTEMPTS: usize = 8;

/// Transport a call went over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Network {
    Tcp,
    Udp,
    Http,
    /// Executed in-process without touching the wire.
    Local,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Tcp => "TCP",
            Network::Udp => "UDP",
            Network::Http => "HTTP",
            Network::Local => "Local",
        };
        f.write_str(name)
    }
}

/// Receiver of inbound requests and connection lifecycle events.
pub trait Inbound: Send + Sync + 'static {
    /// Handles one complete request message. Must not block.
    fn on_request(self: Arc<Self>, connection: Arc<Connection>, message: Message);

    /// Called once when a connection's read loop ends.
    fn on_closed(&self, _connection: &Arc<Connection>) {}
}

/// Inbound handler for client-only use; requests are dropped.
struct NoInbound;

impl Inbound for NoInbound {
    fn on_request(self: Arc<Self>, _connection: Arc<Connection>, _message: Message) {}
}

/// Shared settings every connection of one node is created with.
#[derive(Clone)]
pub struct ConnectionContext {
    tcp_codec: Arc<FrameCodec>,
    udp_codec: Arc<FrameCodec>,
    identity: NodeIdentity,
    inbound: Weak<dyn Inbound>,
    stale_after: Duration,
    dial_timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl ConnectionContext {
    pub fn new(identity: NodeIdentity, inbound: Weak<dyn Inbound>, config: &NodeConfig) -> Self {
        Self {
            tcp_codec: Arc::new(FrameCodec::tcp()),
            udp_codec: Arc::new(FrameCodec::udp()),
            identity,
            inbound,
            stale_after: config.stale_after,
            dial_timeout: config.dial_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Context for a pure client: inbound requests are ignored.
    pub fn detached(identity: NodeIdentity) -> Self {
        let inbound: Weak<dyn Inbound> = Weak::<NoInbound>::new();
        Self::new(identity, inbound, &NodeConfig::default())
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn tcp_codec(&self) -> &Arc<FrameCodec> {
        &self.tcp_codec
    }

    pub fn udp_codec(&self) -> &Arc<FrameCodec> {
        &self.udp_codec
    }

    pub(crate) fn inbound(&self) -> &Weak<dyn Inbound> {
        &self.inbound
    }

    pub(crate) fn stale_after(&self) -> Duration {
        self.stale_after
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Per-connection correlation id counters.
///
/// Built-in functions draw from 1..=99; everything else from
/// 100..=0xFFFFFF, wrapping.
#[derive(Debug, Default)]
pub(crate) struct SerialAllocator {
    builtin: AtomicU32,
    user: AtomicU32,
}

impl SerialAllocator {
    const BUILTIN_SPAN: u32 = RESERVED_MAX as u32 - 1;
    const USER_SPAN: u32 = MAX_CORRELATION_ID - RESERVED_MAX as u32 + 1;

    pub(crate) fn next(&self, function_id: u16) -> u32 {
        if function_id < RESERVED_MAX {
            1 + self.builtin.fetch_add(1, Ordering::Relaxed) % Self::BUILTIN_SPAN
        } else {
            RESERVED_MAX as u32 + self.user.fetch_add(1, Ordering::Relaxed) % Self::USER_SPAN
        }
    }
}

enum Link {
    Tcp(TcpLink),
    Udp(UdpLink),
    Http(HttpLink),
}

/// One physical link to a peer node.
pub struct Connection {
    id: u64,
    network: Network,
    link: Link,
    codec: Arc<FrameCodec>,
    peer: RwLock<NodeIdentity>,
    pending: Arc<CorrelationTable>,
    partials: Mutex<Reassembler>,
    serials: SerialAllocator,
    wrong: AtomicBool,
    closed: AtomicBool,
    touched: Mutex<Instant>,
    reader: Mutex<Option<AbortHandle>>,
    stale_after: Duration,
    probe_timeout: Duration,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("network", &self.network)
            .field("peer", &self.peer.read().uuid)
            .field("wrong", &self.is_wrong())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    fn build(ctx: &ConnectionContext, network: Network, link: Link, peer: NodeIdentity) -> Arc<Self> {
        let codec = match network {
            Network::Udp => ctx.udp_codec.clone(),
            _ => ctx.tcp_codec.clone(),
        };
        Arc::new(Self {
            id: ctx.next_id(),
            network,
            link,
            codec,
            peer: RwLock::new(peer),
            pending: CorrelationTable::new(),
            partials: Mutex::new(Reassembler::new()),
            serials: SerialAllocator::default(),
            wrong: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            touched: Mutex::new(Instant::now()),
            reader: Mutex::new(None),
            stale_after: ctx.stale_after,
            probe_timeout: ctx.dial_timeout,
        })
    }

    /// Dials `peer` over TCP and announces this node with a dial-registration
    /// message.
    ///
    /// # Errors
    ///
    /// - `MeshError::NoConnection` if the peer offers no TCP port
    /// - `MeshError::Timeout` if the dial does not complete in time
    /// - `MeshError::Connection` if the peer refuses
    pub async fn dial_tcp(peer: NodeIdentity, ctx: &ConnectionContext) -> Result<Arc<Self>> {
        let addr = peer
            .tcp_addr()
            .ok_or_else(|| MeshError::NoConnection(format!("{} offers no TCP port", peer.uuid)))?;
        let stream = tokio::time::timeout(ctx.dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MeshError::timeout(ctx.dial_timeout))?
            .map_err(|e| MeshError::from_io(e, "dialing TCP"))?;
        let connection = Self::from_stream(stream, peer, ctx)?;
        connection.announce(&ctx.identity).await?;
        info!("Dialed {}", connection.describe());
        Ok(connection)
    }

    /// Wraps a stream accepted by the TCP listener. The peer's identity is
    /// filled in once it sends its dial registration.
    pub fn accept_tcp(stream: TcpStream, ctx: &ConnectionContext) -> Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        let peer = NodeIdentity {
            host: peer_addr.ip().to_string(),
            ..Default::default()
        };
        Self::from_stream(stream, peer, ctx)
    }

    fn from_stream(stream: TcpStream, peer: NodeIdentity, ctx: &ConnectionContext) -> Result<Arc<Self>> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let connection = Self::build(ctx, Network::Tcp, Link::Tcp(TcpLink::new(writer, peer_addr)), peer);
        let task = tokio::spawn(tcp::read_loop(connection.clone(), reader, ctx.inbound.clone()));
        *connection.reader.lock() = Some(task.abort_handle());
        Ok(connection)
    }

    /// Dials `peer` over UDP with a connected socket of its own.
    ///
    /// # Errors
    ///
    /// - `MeshError::NoConnection` if the peer offers no UDP port or the
    ///   address does not resolve
    /// - `MeshError::Io` if no local socket can be bound
    pub async fn dial_udp(peer: NodeIdentity, ctx: &ConnectionContext) -> Result<Arc<Self>> {
        let addr = peer
            .udp_addr()
            .ok_or_else(|| MeshError::NoConnection(format!("{} offers no UDP port", peer.uuid)))?;
        let remote = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| MeshError::from_io(e, "resolving UDP address"))?
            .next()
            .ok_or_else(|| MeshError::NoConnection(format!("{} did not resolve", addr)))?;
        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| MeshError::from_io(e, "binding UDP socket"))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| MeshError::from_io(e, "connecting UDP socket"))?;
        let socket = Arc::new(socket);

        let connection = Self::build(
            ctx,
            Network::Udp,
            Link::Udp(UdpLink::connected(socket.clone(), remote)),
            peer,
        );
        let task = tokio::spawn(udp::read_loop(connection.clone(), socket, ctx.inbound.clone()));
        *connection.reader.lock() = Some(task.abort_handle());
        connection.announce(&ctx.identity).await?;
        info!("Dialed {}", connection.describe());
        Ok(connection)
    }

    /// A peer seen on the UDP listener's socket. The listener feeds its
    /// frames through [`Connection::handle_frame`]; replies go out via `send_to`.
    pub(crate) fn udp_peer(socket: Arc<UdpSocket>, peer_addr: SocketAddr, ctx: &ConnectionContext) -> Arc<Self> {
        let peer = NodeIdentity {
            host: peer_addr.ip().to_string(),
            ..Default::default()
        };
        Self::build(ctx, Network::Udp, Link::Udp(UdpLink::shared(socket, peer_addr)), peer)
    }

    /// Binds an HTTP client to `peer`'s HTTP listener. No I/O happens until
    /// the first call.
    pub fn http(peer: NodeIdentity, ctx: &ConnectionContext) -> Result<Arc<Self>> {
        let url = peer
            .http_url()
            .ok_or_else(|| MeshError::NoConnection(format!("{} offers no HTTP port", peer.uuid)))?;
        Ok(Self::build(ctx, Network::Http, Link::Http(HttpLink::new(&url)), peer))
    }

    /// Opens the most preferred transport `peer` offers: TCP, then UDP, then
    /// HTTP after a successful ping.
    ///
    /// # Errors
    ///
    /// Returns the last dial error when no transport works.
    pub async fn connect(peer: NodeIdentity, ctx: &ConnectionContext) -> Result<Arc<Self>> {
        let mut last = MeshError::NoConnection(format!("{} offers no transport", peer.uuid));

        if peer.tcp_port != 0 {
            match Self::dial_tcp(peer.clone(), ctx).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!("TCP dial to {} failed: {}", peer.host, e);
                    last = e;
                }
            }
        }
        if peer.udp_port != 0 {
            match Self::dial_udp(peer.clone(), ctx).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!("UDP dial to {} failed: {}", peer.host, e);
                    last = e;
                }
            }
        }
        if peer.http_port != 0 {
            let connection = Self::http(peer.clone(), ctx)?;
            match connection.test().await {
                Ok(()) => return Ok(connection),
                Err(e) => {
                    debug!("HTTP ping to {} failed: {}", peer.host, e);
                    last = e;
                }
            }
        }
        Err(last)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn peer(&self) -> NodeIdentity {
        self.peer.read().clone()
    }

    pub fn peer_uuid(&self) -> String {
        self.peer.read().uuid.clone()
    }

    pub(crate) fn set_peer(&self, identity: NodeIdentity) {
        *self.peer.write() = identity;
    }

    /// Socket address of the peer; `None` for HTTP.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.link {
            Link::Tcp(tcp) => Some(tcp.peer_addr()),
            Link::Udp(udp) => Some(udp.peer_addr()),
            Link::Http(_) => None,
        }
    }

    pub fn pending(&self) -> &Arc<CorrelationTable> {
        &self.pending
    }

    pub(crate) fn codec(&self) -> &Arc<FrameCodec> {
        &self.codec
    }

    pub(crate) fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Timer driving [`Connection::sweep_partials`] from the read loop.
    pub(crate) fn sweep_timer(&self) -> tokio::time::Interval {
        tokio::time::interval(self.stale_after.max(Duration::from_millis(1)))
    }

    pub fn describe(&self) -> String {
        let peer = self.peer.read();
        let who = if peer.name.is_empty() { &peer.uuid } else { &peer.name };
        match &self.link {
            Link::Tcp(tcp) => format!("{}#{} {}@{}", self.network, self.id, who, tcp.peer_addr()),
            Link::Udp(udp) => format!("{}#{} {}@{}", self.network, self.id, who, udp.peer_addr()),
            Link::Http(http) => format!("{}#{} {}@{}", self.network, self.id, who, http.base_url()),
        }
    }

    // ========================================================================
    // Health flags
    // ========================================================================

    pub fn is_wrong(&self) -> bool {
        self.wrong.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Neither flagged wrong nor closed.
    pub fn is_usable(&self) -> bool {
        !self.is_wrong() && !self.is_closed()
    }

    pub fn mark_wrong(&self) {
        if !self.wrong.swap(true, Ordering::AcqRel) {
            warn!("Connection {} flagged wrong", self.describe());
        }
    }

    pub fn clear_wrong(&self) {
        self.wrong.store(false, Ordering::Release);
    }

    pub fn touch(&self) {
        *self.touched.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.touched.lock().elapsed()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Issues a request and waits for its response until `deadline`.
    ///
    /// `api_name` is only used by HTTP, which addresses functions by path.
    ///
    /// # Errors
    ///
    /// - `MeshError::Connection`/`MeshError::Io` if the write fails; the
    ///   connection is flagged wrong
    /// - `MeshError::Timeout` if the deadline passes; no table entry remains
    /// - `MeshError::Remote`/`MeshError::RemoteNotFound` for failure answers
    pub async fn call(
        &self,
        function_id: u16,
        api_name: &str,
        payload: &[u8],
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if let Link::Http(http) = &self.link {
            let result = self.http_call(http, function_id, api_name, payload, deadline).await;
            return self.observe(result);
        }

        let waiter = self.register_waiter(function_id)?;
        let frames = self.codec.encode_request(payload, waiter.id(), function_id)?;
        debug!(
            "Calling fid {} cid {} on {} ({} frames)",
            function_id,
            waiter.id(),
            self.describe(),
            frames.len()
        );
        self.write(frames).await?;
        waiter.wait_until(deadline).await
    }

    /// Writes a request without waiting for any response.
    ///
    /// # Errors
    ///
    /// Returns the write error; the connection is flagged wrong.
    pub async fn send(&self, function_id: u16, api_name: &str, payload: &[u8], deadline: Instant) -> Result<()> {
        self.ensure_open()?;
        if let Link::Http(http) = &self.link {
            let result = self.http_call(http, function_id, api_name, payload, deadline).await;
            return self.observe(result).map(|_| ());
        }

        let correlation_id = self.serials.next(function_id);
        let frames = self.codec.encode_request(payload, correlation_id, function_id)?;
        self.write(frames).await
    }

    /// Answers a request received on this connection.
    ///
    /// An error result goes out as one failure frame carrying its message. A
    /// success body that cannot be framed is answered with a failure too.
    pub async fn respond(&self, correlation_id: u32, function_id: u16, result: Result<Vec<u8>>) -> Result<()> {
        if matches!(self.link, Link::Http(_)) {
            return Ok(());
        }
        let frames = match result {
            Ok(body) => match self.codec.encode_response(&body, correlation_id, function_id, None) {
                Ok(frames) => frames,
                Err(e) => self.failure_frames(correlation_id, function_id, &e)?,
            },
            Err(e) => self.failure_frames(correlation_id, function_id, &e)?,
        };
        self.write(frames).await
    }

    /// Answers a request for a function id this node does not know.
    pub async fn respond_not_found(&self, correlation_id: u32, function_id: u16) -> Result<()> {
        if matches!(self.link, Link::Http(_)) {
            return Ok(());
        }
        let frame = self.codec.encode_not_found(correlation_id, function_id);
        self.write(vec![frame]).await
    }

    /// Liveness probe: a ping frame answered by the peer, or `POST /Ping` over
    /// HTTP. A failed probe flags the connection wrong.
    pub async fn test(&self) -> Result<()> {
        self.ensure_open()?;
        let deadline = Instant::now() + self.probe_timeout;
        let result = match &self.link {
            Link::Http(http) => http.ping(deadline).await,
            _ => {
                let waiter = self.register_waiter(PING)?;
                let frame = self.codec.encode_ping(waiter.id());
                self.write(vec![frame]).await?;
                waiter.wait_until(deadline).await.map(|_| ())
            }
        };
        if result.is_err() {
            self.mark_wrong();
        } else {
            self.touch();
        }
        result
    }

    /// Stops the read loop, fails outstanding calls and shuts the socket down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.pending
            .fail_all(MeshError::Connection(format!("{} closed", self.describe())));
        if let Link::Tcp(tcp) = &self.link {
            tcp.shutdown().await;
        }
        debug!("Closed {}", self.describe());
    }

    async fn announce(&self, identity: &NodeIdentity) -> Result<()> {
        let payload = serde_json::to_vec(identity)?;
        let correlation_id = self.serials.next(DIAL_REGISTER);
        let frames = self.codec.encode_request(&payload, correlation_id, DIAL_REGISTER)?;
        self.write(frames).await
    }

    async fn http_call(
        &self,
        http: &HttpLink,
        function_id: u16,
        api_name: &str,
        payload: &[u8],
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        if function_id < RESERVED_MAX {
            let num = self.serials.next(function_id);
            http.call_builtin(function_id, num, payload.to_vec(), deadline).await
        } else {
            http.call(api_name, payload.to_vec(), deadline).await
        }
    }

    fn observe(&self, result: Result<Vec<u8>>) -> Result<Vec<u8>> {
        match &result {
            Ok(_) => self.touch(),
            Err(e) if e.is_transport() => self.mark_wrong(),
            Err(_) => {}
        }
        result
    }

    fn register_waiter(&self, function_id: u16) -> Result<Waiter> {
        let mut last = None;
        for _ in 0..REGISTER_ATTEMPTS {
            match self.pending.register(self.serials.next(function_id)) {
                Ok(waiter) => return Ok(waiter),
                Err(e @ MeshError::CorrelationInUse(_)) => last = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(MeshError::CorrelationInUse(0)))
    }

    fn failure_frames(&self, correlation_id: u32, function_id: u16, error: &MeshError) -> Result<Vec<Vec<u8>>> {
        self.codec
            .encode_response(&[], correlation_id, function_id, Some(&error.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MeshError::Connection(format!("{} is closed", self.describe())));
        }
        Ok(())
    }

    async fn write(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        let result = match &self.link {
            Link::Tcp(tcp) => tcp.write(&frames).await,
            Link::Udp(udp) => udp.write(&frames).await,
            Link::Http(_) => Err(MeshError::Connection("HTTP carries no frames".to_string())),
        };
        self.codec.recycle(frames);
        match &result {
            Ok(()) => self.touch(),
            Err(e) => {
                warn!("Write to {} failed: {}", self.describe(), e);
                self.mark_wrong();
            }
        }
        result
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Number of multi-chunk messages still waiting for chunks.
    pub fn partial_messages(&self) -> usize {
        self.partials.lock().len()
    }

    /// Drops partial messages whose first chunk arrived more than `max_age`
    /// ago. A peer that stops mid-message would otherwise pin the buffers for
    /// the life of the connection.
    pub fn sweep_partials(&self, max_age: Duration) -> usize {
        let evicted = self.partials.lock().evict_older_than(max_age);
        if evicted > 0 {
            warn!("Dropped {} incomplete messages from {}", evicted, self.describe());
        }
        evicted
    }

    /// Decodes one raw frame, feeds it to the reassembler and routes the
    /// message once complete. Structural errors drop the frame and nothing else.
    pub(crate) fn handle_frame(self: &Arc<Self>, bytes: &[u8], inbound: &Weak<dyn Inbound>) {
        let view = match self.codec.decode(bytes) {
            Ok(view) => view,
            Err(e) => {
                warn!("Dropping frame from {}: {}", self.describe(), e);
                return;
            }
        };
        self.touch();

        let accepted = self.partials.lock().accept(&view);
        let message = match accepted {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping message from {}: {}", self.describe(), e);
                return;
            }
        };

        let id = message.correlation_id;
        let delivered = match message.kind {
            MessageKind::Request => {
                match inbound.upgrade() {
                    Some(inbound) => inbound.on_request(self.clone(), message),
                    None => debug!("No inbound handler; dropping request fid {}", message.function_id),
                }
                return;
            }
            MessageKind::Success => self.pending.resolve(id, message.payload),
            MessageKind::Failed => self.pending.fail(
                id,
                MeshError::Remote(String::from_utf8_lossy(&message.payload).into_owned()),
            ),
            MessageKind::NotFound => self.pending.fail(
                id,
                MeshError::RemoteNotFound(String::from_utf8_lossy(&message.payload).into_owned()),
            ),
        };
        if !delivered {
            debug!("No waiter for cid {} on {}; response dropped", id, self.describe());
        }
    }

    pub(crate) fn on_read_closed(self: &Arc<Self>, inbound: &Weak<dyn Inbound>) {
        self.closed.store(true, Ordering::Release);
        self.wrong.store(true, Ordering::Release);
        let failed = self
            .pending
            .fail_all(MeshError::Connection(format!("{} closed", self.describe())));
        if failed > 0 {
            warn!("Connection {} closed with {} calls outstanding", self.describe(), failed);
        }
        if let Some(inbound) = inbound.upgrade() {
            inbound.on_closed(self);
        }
    }
}
