//! The running node (§5, §6): owns the tokio connection tasks and scheduler
//! ticks that turn the pure state machines in `mesh-routing`/`mesh-timesync`/
//! `mesh-ota`/`mesh-gateway` into a live mesh participant over TCP.
//!
//! `Transport` has no generic split, only `TcpTransport`/`MockTransport` do
//! (so a connection's read and write sides can run without sharing a lock).
//! Each connection therefore runs two tasks, a reader and a writer, joined
//! by an unbounded channel and a shared per-connection `CancellationToken`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use dashmap::DashMap;
use mesh_connection::{CloseReason, Connection, ConnectionId};
use mesh_core::{
    MeshClock, Message, NodeId, OtaAnnouncePayload, OtaTransferPayload, SystemClock,
    TcpTransport, TimeSyncBody, TransportError, TransportReader, TransportWriter,
};
use mesh_gateway::{
    GatewayAckPayload, GatewayCallback, GatewayClient, GatewayConfig, GatewayDataPayload,
    GatewayElection, GatewayForwarder, GatewayPriority, HeartbeatPayload, InternetHealth,
    TcpProber, TYPE_GATEWAY_ACK, TYPE_GATEWAY_DATA, TYPE_GATEWAY_HEARTBEAT,
};
use mesh_ota::{
    ChunkSource, InMemoryChunkSource, InMemoryOtaStore, OtaAction, OtaReceiver, OtaSender,
    OtaStore,
};
use mesh_plugin::{BoxError, DispatchOutcome, PluginRegistry};
use mesh_routing::{Router, RoutingAction};
use mesh_timesync::{request_message, reply_message, TimeSyncAction, TimeSyncManager};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callbacks::Callbacks;
use crate::config::NodeConfig;
use crate::error::{MeshError, MeshResult};

fn is_gateway_type(type_id: u16) -> bool {
    matches!(type_id, TYPE_GATEWAY_HEARTBEAT | TYPE_GATEWAY_DATA | TYPE_GATEWAY_ACK)
}

fn io_err(e: std::io::Error) -> MeshError {
    MeshError::Transport(TransportError::Io(e))
}

struct GatewayRuntime {
    election: GatewayElection,
    health: InternetHealth,
    client: Arc<GatewayClient>,
    forwarder: Arc<GatewayForwarder>,
    config: GatewayConfig,
}

impl GatewayRuntime {
    fn new(node_id: NodeId, config: GatewayConfig) -> Self {
        Self {
            election: GatewayElection::new(config.clone()),
            health: InternetHealth::new(),
            client: Arc::new(GatewayClient::new(node_id, config.clone())),
            forwarder: Arc::new(GatewayForwarder::new(&config)),
            config,
        }
    }
}

struct Inner {
    router: Router,
    time_sync: TimeSyncManager,
    ota_sender: Option<OtaSender>,
    ota_receiver: OtaReceiver,
    gateway: Option<GatewayRuntime>,
    rng: StdRng,
}

/// A running mesh participant: one node's view of the tree, bound to real
/// TCP connections and a real clock.
///
/// Always held behind an `Arc` (returned that way by the constructors) since
/// every connection and scheduler task keeps its own handle back into it.
pub struct Mesh {
    node_id: NodeId,
    config: NodeConfig,
    clock: Arc<MeshClock<SystemClock>>,
    callbacks: Arc<Callbacks>,
    plugins: StdRwLock<PluginRegistry>,
    inner: StdMutex<Inner>,
    outboxes: DashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>,
    peers: DashMap<ConnectionId, NodeId>,
    connection_id_counter: AtomicU64,
    ota_store: Arc<dyn OtaStore>,
    cancel: CancellationToken,
    started: AtomicBool,
    last_time_sync_micros: AtomicU64,
}

impl Mesh {
    pub fn new(node_id: NodeId, config: NodeConfig) -> Arc<Self> {
        Self::with_ota_store(node_id, config, Arc::new(InMemoryOtaStore::new()))
    }

    pub fn with_ota_store(node_id: NodeId, config: NodeConfig, ota_store: Arc<dyn OtaStore>) -> Arc<Self> {
        let router = Router::new(node_id, config.is_root);
        let ota_receiver = OtaReceiver::new(node_id, config.ota_role.clone(), config.ota_hardware.clone(), config.ota);
        let gateway = config.gateway.clone().map(|gateway_config| GatewayRuntime::new(node_id, gateway_config));
        let inner = Inner {
            router,
            time_sync: TimeSyncManager::new(),
            ota_sender: None,
            ota_receiver,
            gateway,
            rng: StdRng::seed_from_u64(rand::random::<u64>()),
        };
        Arc::new(Self {
            node_id,
            config,
            clock: Arc::new(MeshClock::new(SystemClock::new())),
            callbacks: Arc::new(Callbacks::new()),
            plugins: StdRwLock::new(PluginRegistry::new()),
            inner: StdMutex::new(inner),
            outboxes: DashMap::new(),
            peers: DashMap::new(),
            connection_id_counter: AtomicU64::new(1),
            ota_store,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            last_time_sync_micros: AtomicU64::new(0),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn clock(&self) -> &Arc<MeshClock<SystemClock>> {
        &self.clock
    }

    pub fn callbacks(&self) -> &Arc<Callbacks> {
        &self.callbacks
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.connection_id_counter.fetch_add(1, Ordering::Relaxed))
    }

    // ---- listening / dialing --------------------------------------------

    pub async fn listen<A: ToSocketAddrs>(self: &Arc<Self>, addr: A) -> MeshResult<std::net::SocketAddr> {
        let listener = TcpListener::bind(addr).await.map_err(io_err)?;
        let local_addr = listener.local_addr().map_err(io_err)?;
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                debug!(%peer_addr, "accepted connection");
                                this.accept_connection(stream);
                            }
                            Err(e) => warn!(error = %e, "accept failed"),
                        }
                    }
                }
            }
        });
        Ok(local_addr)
    }

    fn accept_connection(self: &Arc<Self>, stream: TcpStream) {
        let now = self.clock.local_micros();
        let id = self.next_connection_id();
        let conn = Connection::new(id, false, self.config.connection.clone(), now);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.router.add_connection(conn);
        }
        let (reader, writer) = TcpTransport::new(stream).split();
        self.spawn_connection(id, Box::new(reader), Box::new(writer));
    }

    pub async fn connect<A: ToSocketAddrs>(self: &Arc<Self>, addr: A) -> MeshResult<()> {
        let stream = TcpStream::connect(addr).await.map_err(io_err)?;
        let now = self.clock.local_micros();
        let id = self.next_connection_id();
        let conn = Connection::new(id, true, self.config.connection.clone(), now);
        let handshake = conn.handshake_request(self.node_id);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.router.add_connection(conn);
        }
        let (reader, writer) = TcpTransport::new(stream).split();
        let tx = self.spawn_connection(id, Box::new(reader), Box::new(writer));
        let cap = self.config.connection.message_cap_bytes;
        let bytes = handshake.encode(cap)?;
        let _ = tx.send(mesh_buffer::frame(&bytes));
        Ok(())
    }

    fn spawn_connection(
        self: &Arc<Self>,
        id: ConnectionId,
        reader: Box<dyn TransportReader>,
        writer: Box<dyn TransportWriter>,
    ) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.outboxes.insert(id, tx.clone());
        let cancel = self.cancel.child_token();

        let reader_this = Arc::clone(self);
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            reader_this.run_reader(id, reader, reader_cancel).await;
        });
        tokio::spawn(run_writer(writer, rx, cancel));

        tx
    }

    async fn run_reader(
        self: Arc<Self>,
        id: ConnectionId,
        mut reader: Box<dyn TransportReader>,
        cancel: CancellationToken,
    ) {
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => {
                            let now = self.clock.local_micros();
                            let actions = {
                                let mut inner = self.inner.lock().unwrap();
                                inner.router.handle_inbound_bytes(id, &buf[..n], now)
                            };
                            self.apply_routing_actions(actions).await;
                        }
                        Err(e) => {
                            warn!(connection = %id, error = %e, "transport read failed");
                            break;
                        }
                    }
                }
            }
        }
        let actions = self.close_connection(id, CloseReason::Transport);
        self.apply_routing_actions(actions).await;
        cancel.cancel();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ---- routing action plumbing ------------------------------------------

    fn apply_routing_actions<'a>(
        &'a self,
        actions: Vec<RoutingAction>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            for action in actions {
                match action {
                    RoutingAction::SendOn { connection, message } => self.send_on(connection, message),
                    RoutingAction::DeliverLocal(message) => self.deliver_local(message).await,
                    RoutingAction::CloseConnection { connection, reason } => {
                        let reentrant = self.close_connection(connection, reason);
                        self.apply_routing_actions(reentrant).await;
                    }
                    RoutingAction::Unreachable { dest } => {
                        warn!(%dest, "message undeliverable, no route");
                    }
                    RoutingAction::Established { connection, peer_node_id, is_station } => {
                        self.on_established(connection, peer_node_id, is_station);
                    }
                }
            }
        })
    }

    fn send_on(&self, connection: ConnectionId, message: Message) {
        let cap = self.config.connection.message_cap_bytes;
        let bytes = match message.encode(cap) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return;
            }
        };
        if let Some(tx) = self.outboxes.get(&connection) {
            let _ = tx.send(mesh_buffer::frame(&bytes));
        }
    }

    fn on_established(&self, connection: ConnectionId, peer_node_id: NodeId, is_station: bool) {
        self.peers.insert(connection, peer_node_id);
        if is_station {
            let now = self.clock.local_micros();
            let mut inner = self.inner.lock().unwrap();
            inner.time_sync.track(connection, self.config.time_sync, now);
        }
        self.callbacks.fire_on_new_connection(peer_node_id);
        self.callbacks.fire_on_changed_connections();
    }

    fn close_connection(&self, connection: ConnectionId, reason: CloseReason) -> Vec<RoutingAction> {
        self.outboxes.remove(&connection);
        let had_peer = self.peers.remove(&connection);
        let actions = {
            let mut inner = self.inner.lock().unwrap();
            inner.time_sync.untrack(connection);
            inner.router.close_connection(connection, reason)
        };
        if let Some((_, peer_node_id)) = had_peer {
            self.callbacks.fire_on_dropped_connection(peer_node_id);
            self.callbacks.fire_on_changed_connections();
        }
        actions
    }

    fn originate(&self, message: Message) -> Vec<RoutingAction> {
        let mut inner = self.inner.lock().unwrap();
        let broadcast_data_chunk = matches!(
            &message,
            Message::OtaTransfer { transfer, .. } if transfer.is_data() && transfer.announce.broadcasted
        );
        if broadcast_data_chunk {
            inner.router.broadcast(message, None)
        } else {
            inner.router.send(message)
        }
    }

    // ---- locally-delivered messages ---------------------------------------

    async fn deliver_local(&self, message: Message) {
        match &message {
            Message::TimeSync { from, body, .. } => self.handle_time_sync(*from, *body).await,
            Message::OtaAnnounce { from, announce } => self.handle_ota_announce(*from, announce.clone()).await,
            Message::OtaTransfer { from, transfer, .. } => self.handle_ota_transfer(*from, transfer.clone()).await,
            Message::User { type_id, .. } if is_gateway_type(*type_id) => {
                self.handle_gateway_message(message.clone()).await;
            }
            Message::Broadcast { from, payload } | Message::Single { from, payload, .. } => {
                self.callbacks.fire_on_receive(*from, payload);
                self.dispatch_plugin(&message);
            }
            Message::User { from, payload, .. } => {
                self.callbacks.fire_on_receive(*from, payload);
                self.dispatch_plugin(&message);
            }
            _ => {}
        }
    }

    fn dispatch_plugin(&self, message: &Message) {
        let outcome = self.plugins.read().unwrap().dispatch(message);
        if let DispatchOutcome::Failed(err) = outcome {
            warn!(error = %err, "plugin dispatch failed");
        }
    }

    async fn handle_time_sync(&self, from: NodeId, body: TimeSyncBody) {
        let connection = {
            let inner = self.inner.lock().unwrap();
            inner.router.connection_for_peer(from)
        };
        let Some(connection) = connection else {
            warn!(%from, "time sync message from a node with no tracked connection");
            return;
        };
        let node_time = self.clock.node_time();
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            inner.time_sync.handle_message(connection, body, node_time)
        };
        match outcome {
            Ok(TimeSyncAction::SendReply { connection, body }) => {
                let message = reply_message(self.node_id, from, body);
                self.send_on(connection, message);
            }
            Ok(TimeSyncAction::ApplyOffset { outcome, .. }) => {
                self.clock.set_offset_micros(outcome.offset_micros);
                self.last_time_sync_micros.store(self.clock.local_micros(), Ordering::SeqCst);
                self.callbacks.fire_on_node_time_adjusted(outcome.offset_micros);
            }
            Ok(TimeSyncAction::SendRequest { .. }) => {}
            Err(e) => warn!(error = %e, "time sync message rejected"),
        }
    }

    async fn handle_ota_announce(&self, from: NodeId, announce: OtaAnnouncePayload) {
        let now = self.clock.local_micros();
        let running_md5 = self.config.ota_running_md5.clone();
        let actions = {
            let mut inner = self.inner.lock().unwrap();
            inner.ota_receiver.on_announce(from, announce, &running_md5, now)
        };
        self.apply_ota_actions(actions).await;
    }

    async fn handle_ota_transfer(&self, from: NodeId, transfer: OtaTransferPayload) {
        if transfer.is_data() {
            let now = self.clock.local_micros();
            let result = {
                let mut inner = self.inner.lock().unwrap();
                inner.ota_receiver.on_data(transfer, now)
            };
            match result {
                Ok(actions) => self.apply_ota_actions(actions).await,
                Err(e) => warn!(error = %e, "ota data chunk rejected"),
            }
        } else {
            let reply = {
                let inner = self.inner.lock().unwrap();
                match inner.ota_sender.as_ref() {
                    Some(sender) => sender.handle_request(from, self.node_id, &transfer),
                    None => Ok(None),
                }
            };
            match reply {
                Ok(Some(message)) => {
                    let routing = self.originate(message);
                    self.apply_routing_actions(routing).await;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to answer ota data request"),
            }
        }
    }

    async fn apply_ota_actions(&self, actions: Vec<OtaAction>) {
        for action in actions {
            match action {
                OtaAction::RequestChunk { message, .. } => {
                    let routing = self.originate(message);
                    self.apply_routing_actions(routing).await;
                }
                OtaAction::Commit => {
                    let snapshot = {
                        let inner = self.inner.lock().unwrap();
                        inner.ota_receiver.snapshot()
                    };
                    if let Some(snapshot) = snapshot {
                        if let Err(e) = self.ota_store.save(&snapshot) {
                            warn!(error = %e, "failed to persist completed ota image");
                        } else {
                            info!("ota image complete and persisted");
                        }
                    }
                }
                OtaAction::IntegrityFailed => {
                    warn!("ota image failed integrity check, clearing store");
                    if let Err(e) = self.ota_store.clear() {
                        warn!(error = %e, "failed to clear ota store after integrity failure");
                    }
                }
            }
        }
    }

    async fn handle_gateway_message(&self, message: Message) {
        match message.type_id() {
            TYPE_GATEWAY_HEARTBEAT => {
                let Ok(heartbeat) = HeartbeatPayload::from_message(&message) else { return };
                let now = self.clock.local_micros();
                let mut inner = self.inner.lock().unwrap();
                if let Some(gateway) = inner.gateway.as_mut() {
                    gateway.election.on_heartbeat(message.from(), &heartbeat, now);
                }
            }
            TYPE_GATEWAY_DATA => {
                let Ok(data) = GatewayDataPayload::from_message(&message) else { return };
                let forwarder = {
                    let inner = self.inner.lock().unwrap();
                    inner.gateway.as_ref().map(|g| Arc::clone(&g.forwarder))
                };
                let Some(forwarder) = forwarder else { return };
                let now = self.clock.local_micros();
                if let Some(ack) = forwarder.handle(&data, now).await {
                    let reply = ack.to_message(self.node_id, data.origin_node);
                    let routing = self.originate(reply);
                    self.apply_routing_actions(routing).await;
                }
            }
            TYPE_GATEWAY_ACK => {
                let Ok(ack) = GatewayAckPayload::from_message(&message) else { return };
                let client = {
                    let inner = self.inner.lock().unwrap();
                    inner.gateway.as_ref().map(|g| Arc::clone(&g.client))
                };
                if let Some(client) = client {
                    client.on_ack(&ack);
                }
            }
            _ => {}
        }
    }

    // ---- public send API ---------------------------------------------------

    pub async fn send_broadcast(&self, payload: serde_json::Value) {
        let message = Message::Broadcast { from: self.node_id, payload };
        let routing = self.originate(message);
        self.apply_routing_actions(routing).await;
    }

    pub async fn send_single(&self, dest: NodeId, payload: serde_json::Value) {
        let message = Message::Single { from: self.node_id, dest, payload };
        let routing = self.originate(message);
        self.apply_routing_actions(routing).await;
    }

    pub async fn send_user(&self, type_id: u16, dest: Option<NodeId>, payload: serde_json::Value) {
        let message = Message::User { from: self.node_id, dest, type_id, payload };
        let routing = self.originate(message);
        self.apply_routing_actions(routing).await;
    }

    pub fn on_broadcast<F>(&self, type_id: u16, handler: F)
    where
        F: Fn(&Message) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.plugins.write().unwrap().on_broadcast(type_id, handler);
    }

    pub fn on_single<F>(&self, type_id: u16, handler: F)
    where
        F: Fn(&Message) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.plugins.write().unwrap().on_single(type_id, handler);
    }

    /// Start offering `image` for OTA distribution (§4.7). `compressed`
    /// gzips the wire payload; the md5 carried in the announce is always
    /// over the original, uncompressed bytes, matching what the receiver
    /// checks after it decompresses the assembled image.
    pub fn offer_firmware(&self, image: Vec<u8>, forced: bool, broadcasted: bool, compressed: bool) -> MeshResult<()> {
        let md5 = mesh_ota::md5_hex(&image);
        let wire_image = if compressed {
            use std::io::Write as _;
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&image).map_err(io_err)?;
            encoder.finish().map_err(io_err)?
        } else {
            image
        };
        let chunk_size = self.config.ota.chunk_size_bytes;
        let no_part = wire_image.len().div_ceil(chunk_size).max(1) as u32;
        let announce = OtaAnnouncePayload {
            role: self.config.ota_role.clone(),
            hardware: self.config.ota_hardware.clone(),
            md5,
            no_part,
            forced,
            broadcasted,
            compressed,
        };
        let now = self.clock.local_micros();
        let source: Box<dyn ChunkSource> = Box::new(InMemoryChunkSource::new(wire_image, chunk_size));
        let sender = OtaSender::new(announce, source, self.config.ota, now);
        self.inner.lock().unwrap().ota_sender = Some(sender);
        Ok(())
    }

    pub async fn send_to_internet(
        &self,
        destination: impl Into<String>,
        content_type: impl Into<String>,
        body: Vec<u8>,
        priority: GatewayPriority,
        callback: GatewayCallback,
    ) -> MeshResult<u64> {
        let (client, available, primary) = {
            let inner = self.inner.lock().unwrap();
            let gateway = inner.gateway.as_ref().ok_or(MeshError::GatewayNotConfigured)?;
            (Arc::clone(&gateway.client), gateway.health.available(), gateway.election.current_primary())
        };
        let now = self.clock.local_micros();
        let (message_id, message) = client
            .send_to_internet(destination, content_type, body, priority, callback, available, primary, now)
            .await;
        if let Some(message) = message {
            let routing = self.originate(message);
            self.apply_routing_actions(routing).await;
        }
        Ok(message_id)
    }

    // ---- scheduler -----------------------------------------------------------

    pub fn start(self: &Arc<Self>) -> MeshResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MeshError::AlreadyStarted);
        }
        self.spawn_liveness_tick();
        self.spawn_node_sync_tick();
        self.spawn_time_sync_tick();
        self.spawn_ota_sender_tick();
        self.spawn_ota_receiver_tick();
        if self.config.max_offset_staleness_ms.is_some() {
            self.spawn_time_sync_watchdog();
        }
        if self.config.gateway.is_some() {
            self.spawn_gateway_ticks();
        }
        Ok(())
    }

    fn spawn_liveness_tick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let now = this.clock.local_micros();
                        let actions = { let mut inner = this.inner.lock().unwrap(); inner.router.tick_liveness(now) };
                        this.apply_routing_actions(actions).await;
                    }
                }
            }
        });
    }

    fn spawn_node_sync_tick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval_ms = self.config.node_sync_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let actions = { let inner = this.inner.lock().unwrap(); inner.router.tick_node_sync() };
                        this.apply_routing_actions(actions).await;
                    }
                }
            }
        });
    }

    fn spawn_time_sync_tick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let node_time = this.clock.node_time();
                        let now = this.clock.local_micros();
                        let actions = {
                            let mut inner = this.inner.lock().unwrap();
                            inner.time_sync.tick(node_time, now, &mut inner.rng)
                        };
                        for action in actions {
                            if let TimeSyncAction::SendRequest { connection, t0 } = action {
                                let Some(peer) = this.peers.get(&connection).map(|e| *e.value()) else { continue };
                                let message = request_message(this.node_id, peer, t0);
                                this.send_on(connection, message);
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_ota_sender_tick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let now = this.clock.local_micros();
                        let message = {
                            let mut inner = this.inner.lock().unwrap();
                            inner
                                .ota_sender
                                .as_mut()
                                .filter(|sender| sender.is_announce_due(now))
                                .map(|sender| sender.build_announce(this.node_id, now))
                        };
                        if let Some(message) = message {
                            let routing = this.originate(message);
                            this.apply_routing_actions(routing).await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_ota_receiver_tick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let now = this.clock.local_micros();
                        let actions = { let mut inner = this.inner.lock().unwrap(); inner.ota_receiver.tick(now) };
                        this.apply_ota_actions(actions).await;
                    }
                }
            }
        });
    }

    /// §9 decision 3: staleness is implementation-defined and disabled by
    /// default; when configured this only logs, it does not reset the
    /// offset (a reset with no fresher sample would just make things worse).
    fn spawn_time_sync_watchdog(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let Some(threshold_ms) = self.config.max_offset_staleness_ms else { return };
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let last = this.last_time_sync_micros.load(Ordering::SeqCst);
                        if last == 0 {
                            continue;
                        }
                        let now = this.clock.local_micros();
                        let elapsed_ms = now.saturating_sub(last) / 1_000;
                        if elapsed_ms > threshold_ms {
                            warn!(elapsed_ms, threshold_ms, "node time offset is stale");
                        }
                    }
                }
            }
        });
    }

    fn spawn_gateway_ticks(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let Some(gateway_config) = self.config.gateway.clone() else { return };
        tokio::spawn(async move {
            let mut health_interval = tokio::time::interval(std::time::Duration::from_millis(gateway_config.internet_check_interval_ms));
            let mut heartbeat_interval = tokio::time::interval(std::time::Duration::from_millis(gateway_config.heartbeat_interval_ms));
            let mut ack_interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = health_interval.tick() => this.run_gateway_health_check(&gateway_config).await,
                    _ = heartbeat_interval.tick() => this.run_gateway_heartbeat().await,
                    _ = ack_interval.tick() => this.run_gateway_ack_timeout(),
                }
            }
        });
    }

    async fn run_gateway_health_check(&self, gateway_config: &GatewayConfig) {
        let mut health = {
            let inner = self.inner.lock().unwrap();
            match inner.gateway.as_ref() {
                Some(gateway) => gateway.health.clone(),
                None => return,
            }
        };
        let now = self.clock.local_micros();
        health
            .check(&TcpProber, &gateway_config.internet_check_host, gateway_config.internet_check_port, gateway_config.probe_timeout(), now)
            .await;
        let mut inner = self.inner.lock().unwrap();
        if let Some(gateway) = inner.gateway.as_mut() {
            gateway.health = health;
        }
    }

    /// `router_rssi` is hardcoded to 0: this is a host-native node with no
    /// WiFi radio to read an RSSI from, so it always runs the election at
    /// the weakest possible signal and lets real radio-equipped peers win.
    async fn run_gateway_heartbeat(&self) {
        let now = self.clock.local_micros();
        let message = {
            let mut inner = self.inner.lock().unwrap();
            let Some(gateway) = inner.gateway.as_mut() else { return };
            let available = gateway.health.available();
            let primary = gateway.election.elect(self.node_id, 0, available, now);
            let heartbeat = HeartbeatPayload {
                is_primary: primary == Some(self.node_id),
                has_internet: available,
                router_rssi: 0,
                uptime_ms: now / 1_000,
                participates: gateway.config.participate_in_election,
            };
            heartbeat.to_message(self.node_id)
        };
        let routing = self.originate(message);
        self.apply_routing_actions(routing).await;
    }

    fn run_gateway_ack_timeout(&self) {
        let now = self.clock.local_micros();
        let client = {
            let inner = self.inner.lock().unwrap();
            inner.gateway.as_ref().map(|gateway| Arc::clone(&gateway.client))
        };
        if let Some(client) = client {
            client.tick(now);
        }
    }
}

async fn run_writer(mut writer: Box<dyn TransportWriter>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => {
                match received {
                    Some(bytes) => {
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn join(mesh_a: &Arc<Mesh>, mesh_b: &Arc<Mesh>) {
        let (a, b) = MockTransport::pair();
        let (a_reader, a_writer) = a.split();
        let (b_reader, b_writer) = b.split();

        let now = mesh_a.clock.local_micros();
        let id_a = mesh_a.next_connection_id();
        let conn_a = Connection::new(id_a, true, mesh_a.config.connection.clone(), now);
        let handshake = conn_a.handshake_request(mesh_a.node_id);
        mesh_a.inner.lock().unwrap().router.add_connection(conn_a);
        let tx_a = mesh_a.spawn_connection(id_a, Box::new(a_reader), Box::new(a_writer));
        let cap = mesh_a.config.connection.message_cap_bytes;
        let _ = tx_a.send(mesh_buffer::frame(&handshake.encode(cap).unwrap()));

        let now = mesh_b.clock.local_micros();
        let id_b = mesh_b.next_connection_id();
        let conn_b = Connection::new(id_b, false, mesh_b.config.connection.clone(), now);
        mesh_b.inner.lock().unwrap().router.add_connection(conn_b);
        mesh_b.spawn_connection(id_b, Box::new(b_reader), Box::new(b_writer));
    }

    #[tokio::test]
    async fn two_nodes_establish_over_a_mock_transport() {
        let mesh_a = Mesh::new(NodeId::new(1), NodeConfig::default());
        let mesh_b = Mesh::new(NodeId::new(2), NodeConfig::default().with_root(true));
        join(&mesh_a, &mesh_b);
        settle().await;

        assert_eq!(mesh_a.peers.len(), 1);
        assert_eq!(mesh_b.peers.len(), 1);
        assert_eq!(*mesh_a.peers.iter().next().unwrap().value(), NodeId::new(2));
    }

    #[tokio::test]
    async fn broadcast_reaches_the_other_node() {
        let mesh_a = Mesh::new(NodeId::new(1), NodeConfig::default());
        let mesh_b = Mesh::new(NodeId::new(2), NodeConfig::default().with_root(true));
        join(&mesh_a, &mesh_b);
        settle().await;

        let received = Arc::new(AtomicUsize::new(0));
        let received2 = Arc::clone(&received);
        mesh_b.callbacks.set_on_receive(Box::new(move |from, payload| {
            assert_eq!(from, NodeId::new(1));
            assert_eq!(payload["hello"], "world");
            received2.fetch_add(1, Ordering::SeqCst);
        }));

        mesh_a.send_broadcast(serde_json::json!({"hello": "world"})).await;
        settle().await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mesh = Mesh::new(NodeId::new(1), NodeConfig::default());
        mesh.start().unwrap();
        assert!(matches!(mesh.start(), Err(MeshError::AlreadyStarted)));
        mesh.shutdown();
    }

    #[tokio::test]
    async fn offer_firmware_computes_md5_over_the_uncompressed_image() {
        let mesh = Mesh::new(NodeId::new(1), NodeConfig::default());
        let image = b"firmware bytes".to_vec();
        let expected_md5 = mesh_ota::md5_hex(&image);
        mesh.offer_firmware(image, false, true, true).unwrap();

        let inner = mesh.inner.lock().unwrap();
        let sender = inner.ota_sender.as_ref().unwrap();
        assert!(sender.is_active());
        assert_eq!(sender.md5(), expected_md5);
    }

    #[tokio::test]
    async fn dropped_connection_fires_the_dropped_callback() {
        let mesh_a = Mesh::new(NodeId::new(1), NodeConfig::default());
        let mesh_b = Mesh::new(NodeId::new(2), NodeConfig::default().with_root(true));
        join(&mesh_a, &mesh_b);
        settle().await;

        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped2 = Arc::clone(&dropped);
        mesh_a.callbacks.set_on_dropped_connection(Box::new(move |_peer| {
            dropped2.fetch_add(1, Ordering::SeqCst);
        }));

        mesh_b.shutdown();
        settle().await;

        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
