//! Mesh router
//!
//! Wires the routing components to the transport collaborator:
//! - `submit` is the application send entry point
//! - `handle_inbound` decodes and dispatches everything a link delivers
//! - `on_peer_connected` / `on_peer_lost` keep topology, acks and
//!   arbitration consistent with link state
//! - `start` owns the drain loop and the periodic sweeps; `shutdown`
//!   stops them
//!
//! The queue and the dedup cache are the two structures hit from many
//! tasks at once; each sits behind its own RwLock and every mutation is
//! one write-locked critical section. Timers only touch their own
//! component's state and never wait on transport I/O.

use crate::{
    ack::AckTracker,
    arbitration::ConnectionArbitration,
    config::RoutingConfig,
    dedup::DeduplicationCache,
    discovery::{DiscoveryAction, RouteDiscovery},
    error::{Result, RoutingError},
    queue::{PriorityQueue, QueueStats},
    topology::TopologyTable,
    transport::Transport,
};
use embermesh_protocol::{
    Ack, Envelope, MessageId, PeerId, Recipient, RouteError, RouteReply, RouteRequest,
    TopologyAnnouncement, WireMessage,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};

/// Router statistics
#[derive(Debug, Default, Clone)]
pub struct RouterStats {
    pub routed: u64,
    pub delivered_local: u64,
    pub relayed: u64,
    pub duplicates_dropped: u64,
    pub ttl_expired: u64,
    pub invalid_dropped: u64,
    pub acks_received: u64,
    pub retransmissions: u64,
    pub delivery_failures: u64,
}

/// Asynchronous outcomes the embedding layer may care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// Ack retries exhausted or the target peer was lost
    DeliveryFailed { message_id: MessageId, peer: PeerId },
    /// A route through `via` stopped working
    RouteBroken { destination: PeerId, via: PeerId },
    /// Reactive discovery found a path
    RouteDiscovered { destination: PeerId, next_hop: PeerId },
    /// Reactive discovery timed out without a reply
    DiscoveryFailed { destination: PeerId },
    /// A queued envelope had no usable next hop and was dropped
    EnvelopeDropped { message_id: MessageId, destination: PeerId },
}

/// Message routing core for one mesh peer
pub struct MeshRouter {
    local: PeerId,
    config: RoutingConfig,
    transport: Arc<dyn Transport>,

    /// Outbound envelopes, most urgent first
    queue: Arc<RwLock<PriorityQueue>>,

    /// Flood suppression for every inbound identity
    dedup: Arc<RwLock<DeduplicationCache>>,

    /// Adjacency snapshots and derived next hops
    topology: Arc<RwLock<TopologyTable>>,

    /// Outstanding reactive discoveries
    discovery: Arc<RwLock<RouteDiscovery>>,

    /// Unacknowledged envelopes and their retry budget
    acks: Arc<RwLock<AckTracker>>,

    /// Link-setup tie-break, mutex and cooldown
    arbitration: Arc<RwLock<ConnectionArbitration>>,

    stats: Arc<RwLock<RouterStats>>,

    /// Envelopes addressed to this peer go here
    delivery_tx: Option<mpsc::UnboundedSender<Envelope>>,

    /// Delivery failures and route changes go here
    event_tx: Option<mpsc::UnboundedSender<RouterEvent>>,

    shutdown_tx: watch::Sender<bool>,
}

impl MeshRouter {
    /// Create a router for `local` using the given transport
    pub fn new(local: PeerId, config: RoutingConfig, transport: Arc<dyn Transport>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        MeshRouter {
            local,
            queue: Arc::new(RwLock::new(PriorityQueue::new(config.queue_capacity))),
            dedup: Arc::new(RwLock::new(DeduplicationCache::new(
                config.dedup_capacity,
                config.dedup_window,
            ))),
            topology: Arc::new(RwLock::new(TopologyTable::new(
                local,
                config.stale_threshold,
            ))),
            discovery: Arc::new(RwLock::new(RouteDiscovery::new(
                local,
                config.discovery_ttl,
            ))),
            acks: Arc::new(RwLock::new(AckTracker::new(
                config.ack_timeout,
                config.max_ack_attempts,
            ))),
            arbitration: Arc::new(RwLock::new(ConnectionArbitration::new(
                local,
                config.connection_cooldown,
            ))),
            stats: Arc::new(RwLock::new(RouterStats::default())),
            delivery_tx: None,
            event_tx: None,
            shutdown_tx,
            config,
            transport,
        }
    }

    /// This router's peer identity
    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// Create a channel pair for locally delivered envelopes
    pub fn delivery_channel() -> (
        mpsc::UnboundedSender<Envelope>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Create a channel pair for router events
    pub fn event_channel() -> (
        mpsc::UnboundedSender<RouterEvent>,
        mpsc::UnboundedReceiver<RouterEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Set the sink for envelopes addressed to this peer
    pub fn set_local_delivery_channel(&mut self, tx: mpsc::UnboundedSender<Envelope>) {
        self.delivery_tx = Some(tx);
    }

    /// Set the sink for delivery failures and route changes
    pub fn set_event_channel(&mut self, tx: mpsc::UnboundedSender<RouterEvent>) {
        self.event_tx = Some(tx);
    }

    /// Application send entry point
    ///
    /// A unicast with no known route starts a reactive discovery and
    /// reports `NoRoute`; the caller retries once discovery resolves.
    pub async fn submit(&self, envelope: Envelope) -> Result<()> {
        if let Recipient::Peer(target) = envelope.recipient {
            if target == self.local {
                return self.deliver_local(envelope).await;
            }
        }

        // Our own flood must not come back as fresh work
        self.dedup.write().await.mark(envelope.id);

        if let Recipient::Peer(target) = envelope.recipient {
            if !self.topology.read().await.is_reachable(&target) {
                self.start_discovery(target).await?;
                return Err(RoutingError::NoRoute(target));
            }
            if envelope.requires_ack {
                self.acks.write().await.track(envelope.clone(), target);
            }
        }

        self.queue.write().await.enqueue(envelope);
        Ok(())
    }

    /// Decode and dispatch bytes received from a direct neighbor
    pub async fn handle_inbound(&self, from: PeerId, bytes: &[u8]) -> Result<()> {
        let message = WireMessage::decode(bytes)?;
        log::debug!("{}: inbound {} from {}", self.local, message.kind_name(), from);

        match message {
            WireMessage::Envelope(envelope) => self.handle_envelope(from, envelope).await,
            WireMessage::Topology(announcement) => self.handle_topology(from, announcement).await,
            WireMessage::RouteRequest(request) => self.handle_route_request(from, request).await,
            WireMessage::RouteReply(reply) => self.handle_route_reply(reply).await,
            WireMessage::RouteError(error) => self.handle_route_error(from, error).await,
            WireMessage::Ack(ack) => self.handle_ack(ack).await,
        }
    }

    /// Link established: record adjacency and re-announce
    pub async fn on_peer_connected(&self, peer: PeerId) {
        log::info!("{}: peer {} connected", self.local, peer);
        self.topology.write().await.record_direct_link(peer);
        self.arbitration.write().await.complete(&peer, true);

        if let Err(e) = self.broadcast_topology().await {
            log::warn!("{}: topology broadcast failed: {}", self.local, e);
        }
    }

    /// Link lost: the unified cancellation event
    ///
    /// Removes the peer's snapshot and recomputes routes, fails pending
    /// acks addressed to it, releases its arbitration slot into cooldown,
    /// and emits RouteErrors for destinations that depended on it.
    /// Committed dedup records are deliberately untouched.
    pub async fn on_peer_lost(&self, peer: PeerId) {
        log::info!("{}: peer {} lost", self.local, peer);

        let dependents: Vec<PeerId> = {
            let mut topology = self.topology.write().await;
            let dependents = topology
                .routes_via(&peer)
                .into_iter()
                .filter(|target| *target != peer)
                .collect();
            topology.remove_peer(&peer);
            dependents
        };

        let failed = self.acks.write().await.fail_peer(&peer);
        if !failed.is_empty() {
            let mut stats = self.stats.write().await;
            stats.delivery_failures += failed.len() as u64;
        }
        for message_id in failed {
            self.emit_event(RouterEvent::DeliveryFailed { message_id, peer });
        }

        self.arbitration.write().await.release(&peer);

        for destination in dependents {
            let error = self
                .discovery
                .read()
                .await
                .report_broken_link(destination, peer);
            self.dedup.write().await.mark(error.id);
            self.emit_event(RouterEvent::RouteBroken {
                destination,
                via: peer,
            });
            if let Err(e) = self
                .flood_control(&WireMessage::RouteError(error), &[peer])
                .await
            {
                log::warn!("{}: route error flood failed: {}", self.local, e);
            }
        }

        if let Err(e) = self.broadcast_topology().await {
            log::warn!("{}: topology broadcast failed: {}", self.local, e);
        }
    }

    /// Whether the local side initiates the link toward `remote`
    pub async fn should_initiate(&self, remote: &PeerId) -> bool {
        self.arbitration.read().await.should_initiate(remote)
    }

    /// Claim the single connect/accept slot for `peer`
    pub async fn try_begin_connection(&self, peer: PeerId) -> bool {
        self.arbitration.write().await.try_begin(peer)
    }

    /// A connect/accept attempt toward `peer` failed; start its cooldown
    pub async fn connection_failed(&self, peer: &PeerId) {
        self.arbitration.write().await.complete(peer, false);
    }

    /// Confirm or refresh the path to `target` before an important send
    ///
    /// No-op when a discovery toward `target` is already outstanding.
    pub async fn refresh_route(&self, target: PeerId) -> Result<()> {
        self.start_discovery(target).await
    }

    /// Announce this peer's current adjacency to the neighborhood
    pub async fn broadcast_topology(&self) -> Result<()> {
        let neighbors = self.topology.read().await.direct_neighbors();
        if neighbors.is_empty() {
            return Ok(());
        }

        let announcement =
            TopologyAnnouncement::new(self.local, neighbors, self.config.announcement_ttl);
        self.dedup.write().await.mark(announcement.id);
        self.flood_control(&WireMessage::Topology(announcement), &[])
            .await
    }

    /// Start the drain loop and the periodic sweeps
    pub fn start(self: &Arc<Self>) {
        self.spawn_drain_loop();
        self.spawn_ack_loop();
        self.spawn_topology_sweep();
        self.spawn_dedup_sweep();
    }

    /// Stop every task started by `start`
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// First hop on a known path to `target`
    pub async fn next_hop(&self, target: &PeerId) -> Option<PeerId> {
        self.topology.read().await.next_hop(target)
    }

    /// Whether any route to `target` is known
    pub async fn is_reachable(&self, target: &PeerId) -> bool {
        self.topology.read().await.is_reachable(target)
    }

    /// Whether `target` is one hop away
    pub async fn is_direct_neighbor(&self, target: &PeerId) -> bool {
        self.topology.read().await.is_direct_neighbor(target)
    }

    /// Router counters
    pub async fn get_stats(&self) -> RouterStats {
        self.stats.read().await.clone()
    }

    /// Queue admission counters
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.read().await.stats()
    }

    /// Pending outbound envelopes
    pub async fn queue_len(&self) -> usize {
        self.queue.read().await.len()
    }

    // ---- inbound handlers ----

    async fn handle_envelope(&self, from: PeerId, envelope: Envelope) -> Result<()> {
        if envelope.payload.len() > embermesh_protocol::envelope::MAX_PAYLOAD_SIZE {
            log::warn!(
                "{}: oversize envelope {} from {} dropped",
                self.local,
                envelope.id,
                from
            );
            self.stats.write().await.invalid_dropped += 1;
            return Ok(());
        }

        if !self.dedup.write().await.should_process(envelope.id) {
            self.stats.write().await.duplicates_dropped += 1;
            return Ok(());
        }

        match envelope.recipient {
            Recipient::Peer(target) if target == self.local => {
                // TTL exhaustion never blocks local delivery
                if envelope.requires_ack {
                    self.send_ack(&envelope, from).await;
                }
                self.deliver_local(envelope).await
            }
            Recipient::Broadcast => {
                self.deliver_local(envelope.clone()).await?;
                self.relay(envelope).await;
                Ok(())
            }
            Recipient::Peer(_) => {
                self.relay(envelope).await;
                Ok(())
            }
        }
    }

    async fn handle_topology(&self, from: PeerId, announcement: TopologyAnnouncement) -> Result<()> {
        if !self.dedup.write().await.should_process(announcement.id) {
            self.stats.write().await.duplicates_dropped += 1;
            return Ok(());
        }

        self.topology.write().await.apply_announcement(&announcement);

        if let Some(copy) = announcement.relay_copy(self.local) {
            let mut exclude = copy.visited.clone();
            exclude.push(copy.sender);
            exclude.push(from);
            self.flood_control(&WireMessage::Topology(copy), &exclude)
                .await?;
        }
        Ok(())
    }

    async fn handle_route_request(&self, from: PeerId, request: RouteRequest) -> Result<()> {
        if !self.dedup.write().await.should_process(request.request_id) {
            self.stats.write().await.duplicates_dropped += 1;
            return Ok(());
        }

        let knows_route = self.topology.read().await.is_reachable(&request.destination);
        let action = self.discovery.read().await.handle_request(&request, knows_route);

        match action {
            DiscoveryAction::Reply(reply) => {
                // Retrace toward the peer that handed us the request
                self.send_wire(from, &WireMessage::RouteReply(reply)).await;
            }
            DiscoveryAction::Flood(forwarded) => {
                let mut exclude = forwarded.path_so_far.clone();
                exclude.push(forwarded.origin);
                exclude.push(from);
                self.flood_control(&WireMessage::RouteRequest(forwarded), &exclude)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_route_reply(&self, reply: RouteReply) -> Result<()> {
        let action = self.discovery.write().await.handle_reply(&reply);

        match action {
            DiscoveryAction::Install {
                destination,
                next_hop,
            } => {
                self.topology
                    .write()
                    .await
                    .install_discovered_route(destination, next_hop);
                self.emit_event(RouterEvent::RouteDiscovered {
                    destination,
                    next_hop,
                });
            }
            DiscoveryAction::Forward { to, reply } => {
                self.send_wire(to, &WireMessage::RouteReply(reply)).await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_route_error(&self, from: PeerId, error: RouteError) -> Result<()> {
        if !self.dedup.write().await.should_process(error.id) {
            self.stats.write().await.duplicates_dropped += 1;
            return Ok(());
        }

        self.topology
            .write()
            .await
            .invalidate_routes_via(&error.broken_next_hop);
        self.emit_event(RouterEvent::RouteBroken {
            destination: error.destination,
            via: error.broken_next_hop,
        });

        let exclude = [from, error.broken_next_hop, error.reporter];
        self.flood_control(&WireMessage::RouteError(error), &exclude)
            .await
    }

    async fn handle_ack(&self, ack: Ack) -> Result<()> {
        if ack.to == self.local {
            if self.acks.write().await.on_ack(&ack.message_id) {
                self.stats.write().await.acks_received += 1;
            }
            return Ok(());
        }

        // Not ours; pass it one hop closer to the waiting sender
        let hop = self.topology.read().await.next_hop(&ack.to);
        if let Some(hop) = hop {
            self.send_wire(hop, &WireMessage::Ack(ack)).await;
        }
        Ok(())
    }

    // ---- outbound path ----

    async fn relay(&self, envelope: Envelope) {
        if !envelope.can_relay() {
            self.stats.write().await.ttl_expired += 1;
            return;
        }

        if let Some(copy) = envelope.relay_copy(self.local) {
            self.queue.write().await.enqueue(copy);
            self.stats.write().await.relayed += 1;
        }
    }

    async fn dispatch_outbound(&self, envelope: Envelope) {
        match envelope.recipient {
            Recipient::Peer(target) => {
                let hop = self.topology.read().await.next_hop(&target);
                match hop {
                    Some(hop) => self.forward_unicast(envelope, target, hop).await,
                    None => {
                        log::debug!(
                            "{}: no route to {}, starting discovery",
                            self.local,
                            target
                        );
                        self.emit_event(RouterEvent::EnvelopeDropped {
                            message_id: envelope.id,
                            destination: target,
                        });
                        if let Err(e) = self.start_discovery(target).await {
                            log::warn!("{}: discovery start failed: {}", self.local, e);
                        }
                    }
                }
            }
            Recipient::Broadcast => {
                let neighbors = self.topology.read().await.direct_neighbors();
                let message = WireMessage::Envelope(envelope.clone());
                let bytes = match message.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("{}: broadcast encode failed: {}", self.local, e);
                        return;
                    }
                };

                for peer in neighbors {
                    if peer == envelope.sender || envelope.was_visited(&peer) {
                        continue;
                    }
                    if let Err(e) = self.transport.send_to_peer(peer, bytes.clone()).await {
                        log::warn!("{}: broadcast to {} failed: {}", self.local, peer, e);
                    }
                }
                self.stats.write().await.routed += 1;
            }
        }
    }

    async fn forward_unicast(&self, envelope: Envelope, target: PeerId, hop: PeerId) {
        let bytes = match WireMessage::Envelope(envelope).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("{}: envelope encode failed: {}", self.local, e);
                return;
            }
        };

        match self.transport.send_to_peer(hop, bytes).await {
            Ok(()) => {
                self.stats.write().await.routed += 1;
            }
            Err(e) => {
                log::warn!("{}: forward to {} via {} failed: {}", self.local, target, hop, e);
                self.handle_forward_failure(target, hop).await;
            }
        }
    }

    /// A previously advertised path failed underneath us: invalidate,
    /// tell the neighborhood, rediscover
    async fn handle_forward_failure(&self, destination: PeerId, broken: PeerId) {
        self.topology.write().await.invalidate_routes_via(&broken);

        let error = self
            .discovery
            .read()
            .await
            .report_broken_link(destination, broken);
        self.dedup.write().await.mark(error.id);
        self.emit_event(RouterEvent::RouteBroken {
            destination,
            via: broken,
        });

        if let Err(e) = self
            .flood_control(&WireMessage::RouteError(error), &[broken])
            .await
        {
            log::warn!("{}: route error flood failed: {}", self.local, e);
        }

        if let Err(e) = self.start_discovery(destination).await {
            log::warn!("{}: discovery start failed: {}", self.local, e);
        }
    }

    async fn start_discovery(&self, target: PeerId) -> Result<()> {
        let request = self.discovery.write().await.begin(target);
        if let Some(request) = request {
            self.dedup.write().await.mark(request.request_id);
            self.flood_control(&WireMessage::RouteRequest(request), &[])
                .await?;
        }
        Ok(())
    }

    /// Send a control message to every direct neighbor not excluded
    async fn flood_control(&self, message: &WireMessage, exclude: &[PeerId]) -> Result<()> {
        let bytes = message.encode()?;
        let neighbors = self.topology.read().await.direct_neighbors();

        for peer in neighbors {
            if exclude.contains(&peer) {
                continue;
            }
            if let Err(e) = self.transport.send_to_peer(peer, bytes.clone()).await {
                log::warn!("{}: {} to {} failed: {}", self.local, message.kind_name(), peer, e);
            }
        }
        Ok(())
    }

    /// Send one control message to one peer, logging failures
    async fn send_wire(&self, peer: PeerId, message: &WireMessage) {
        match message.encode() {
            Ok(bytes) => {
                if let Err(e) = self.transport.send_to_peer(peer, bytes).await {
                    log::warn!("{}: {} to {} failed: {}", self.local, message.kind_name(), peer, e);
                }
            }
            Err(e) => log::warn!("{}: {} encode failed: {}", self.local, message.kind_name(), e),
        }
    }

    async fn send_ack(&self, envelope: &Envelope, from: PeerId) {
        let ack = Ack {
            message_id: envelope.id,
            from: self.local,
            to: envelope.sender,
        };
        // Prefer a known route back to the sender; fall back to the
        // relay that delivered the envelope
        let hop = self
            .topology
            .read()
            .await
            .next_hop(&envelope.sender)
            .unwrap_or(from);
        self.send_wire(hop, &WireMessage::Ack(ack)).await;
    }

    async fn deliver_local(&self, envelope: Envelope) -> Result<()> {
        self.stats.write().await.delivered_local += 1;

        match &self.delivery_tx {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| RoutingError::DeliveryChannelClosed),
            None => {
                log::debug!("{}: no delivery channel, envelope {} dropped", self.local, envelope.id);
                Ok(())
            }
        }
    }

    fn emit_event(&self, event: RouterEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.send(event).is_err() {
                log::debug!("{}: event channel closed", self.local);
            }
        }
    }

    // ---- background tasks ----

    fn spawn_drain_loop(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let next = router.queue.write().await.dequeue();
                match next {
                    Some(envelope) => router.dispatch_outbound(envelope).await,
                    None => {
                        tokio::select! {
                            _ = tokio::time::sleep(router.config.drain_idle_interval) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_ack_loop(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(router.config.ack_tick_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let tick = router.acks.write().await.tick();

                if !tick.retries.is_empty() {
                    let mut queue = router.queue.write().await;
                    for envelope in &tick.retries {
                        queue.enqueue(envelope.clone());
                    }
                    router.stats.write().await.retransmissions += tick.retries.len() as u64;
                }

                if !tick.failures.is_empty() {
                    router.stats.write().await.delivery_failures += tick.failures.len() as u64;
                    for (message_id, peer) in tick.failures {
                        log::warn!("{}: delivery of {} to {} failed", router.local, message_id, peer);
                        router.emit_event(RouterEvent::DeliveryFailed { message_id, peer });
                    }
                }

                let expired = router
                    .discovery
                    .write()
                    .await
                    .sweep_expired(router.config.discovery_timeout);
                for destination in expired {
                    router.emit_event(RouterEvent::DiscoveryFailed { destination });
                }
            }
        });
    }

    fn spawn_topology_sweep(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(router.config.topology_sweep_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let removed = router.topology.write().await.sweep_stale();
                if !removed.is_empty() {
                    log::debug!("{}: swept {} stale snapshots", router.local, removed.len());
                }
                router.arbitration.write().await.sweep_expired();
            }
        });
    }

    fn spawn_dedup_sweep(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(router.config.dedup_sweep_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                router.dedup.write().await.sweep_expired();
            }
        });
    }
}
