//! Proactive topology table
//!
//! Peers periodically flood adjacency announcements; the table keeps one
//! snapshot per known peer and derives single-hop routes by breadth-first
//! search from the local peer. The derived route map is never patched in
//! place: every change to the graph rebuilds it wholesale, so readers
//! never observe a half-updated table.

use embermesh_protocol::{PeerId, TopologyAnnouncement};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// One peer's last reported adjacency
#[derive(Debug, Clone)]
pub struct PeerTopologySnapshot {
    /// The peer's direct neighbors as last announced
    pub neighbors: BTreeSet<PeerId>,
    /// When the announcement was applied locally
    pub last_update: Instant,
}

/// Adjacency map plus derived next-hop routes
#[derive(Debug)]
pub struct TopologyTable {
    local: PeerId,
    /// Peers we hold a live link to, in deterministic order
    direct: BTreeSet<PeerId>,
    /// Last announced adjacency per known peer
    snapshots: HashMap<PeerId, PeerTopologySnapshot>,
    /// Derived: target -> first hop on a shortest path; rebuilt wholesale
    routes: BTreeMap<PeerId, PeerId>,
    /// Routes learned reactively, consulted when BFS knows nothing
    discovered: BTreeMap<PeerId, PeerId>,
    stale_threshold: Duration,
}

impl TopologyTable {
    /// Create a table rooted at `local`
    pub fn new(local: PeerId, stale_threshold: Duration) -> Self {
        TopologyTable {
            local,
            direct: BTreeSet::new(),
            snapshots: HashMap::new(),
            routes: BTreeMap::new(),
            discovered: BTreeMap::new(),
            stale_threshold,
        }
    }

    /// Record a live link to `peer` and recompute routes
    pub fn record_direct_link(&mut self, peer: PeerId) {
        if peer != self.local && self.direct.insert(peer) {
            self.recompute();
        }
    }

    /// Forget everything about `peer` (link loss or staleness) and
    /// recompute routes
    pub fn remove_peer(&mut self, peer: &PeerId) {
        let had_link = self.direct.remove(peer);
        let had_snapshot = self.snapshots.remove(peer).is_some();
        self.discovered
            .retain(|target, hop| target != peer && *hop != *peer);

        if had_link || had_snapshot {
            self.recompute();
        }
    }

    /// Replace `sender`'s snapshot wholesale and recompute routes
    pub fn apply_announcement(&mut self, announcement: &TopologyAnnouncement) {
        if announcement.sender == self.local {
            return;
        }

        let neighbors: BTreeSet<PeerId> = announcement
            .neighbors
            .iter()
            .copied()
            .filter(|n| *n != announcement.sender)
            .collect();

        self.snapshots.insert(
            announcement.sender,
            PeerTopologySnapshot {
                neighbors,
                last_update: Instant::now(),
            },
        );
        self.recompute();
    }

    /// Drop snapshots older than the stale threshold; returns the peers
    /// removed. Routes are recomputed when anything was dropped.
    pub fn sweep_stale(&mut self) -> Vec<PeerId> {
        let threshold = self.stale_threshold;
        let stale: Vec<PeerId> = self
            .snapshots
            .iter()
            .filter(|(_, snap)| snap.last_update.elapsed() > threshold)
            .map(|(peer, _)| *peer)
            .collect();

        for peer in &stale {
            self.snapshots.remove(peer);
            self.discovered
                .retain(|target, hop| target != peer && *hop != *peer);
        }

        if !stale.is_empty() {
            self.recompute();
        }
        stale
    }

    /// First hop on a shortest path to `target`, if one is known
    pub fn next_hop(&self, target: &PeerId) -> Option<PeerId> {
        self.routes
            .get(target)
            .or_else(|| self.discovered.get(target))
            .copied()
    }

    /// Whether any route to `target` is known
    pub fn is_reachable(&self, target: &PeerId) -> bool {
        self.next_hop(target).is_some()
    }

    /// Whether `target` is one hop away
    pub fn is_direct_neighbor(&self, target: &PeerId) -> bool {
        self.direct.contains(target)
    }

    /// Current direct neighbors, in deterministic order
    pub fn direct_neighbors(&self) -> Vec<PeerId> {
        self.direct.iter().copied().collect()
    }

    /// Every peer a route is currently known for
    pub fn known_peers(&self) -> Vec<PeerId> {
        let mut peers: BTreeSet<PeerId> = self.routes.keys().copied().collect();
        peers.extend(self.discovered.keys().copied());
        peers.into_iter().collect()
    }

    /// Targets currently routed through `hop`
    pub fn routes_via(&self, hop: &PeerId) -> Vec<PeerId> {
        self.routes
            .iter()
            .chain(self.discovered.iter())
            .filter(|(_, next)| *next == hop)
            .map(|(target, _)| *target)
            .collect()
    }

    /// Drop every route whose next hop is `hop`, forcing rediscovery
    ///
    /// Adjacency snapshots stay; the next announcement or recompute may
    /// legitimately restore a proactive route.
    pub fn invalidate_routes_via(&mut self, hop: &PeerId) {
        self.routes.retain(|_, next| *next != *hop);
        self.discovered.retain(|_, next| *next != *hop);
    }

    /// Remember a reactively discovered route
    pub fn install_discovered_route(&mut self, target: PeerId, next_hop: PeerId) {
        if target != self.local {
            self.discovered.insert(target, next_hop);
        }
    }

    /// Number of peers with a live snapshot
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Rebuild the route map by BFS from the local peer
    ///
    /// Each newly discovered peer is tagged with the direct neighbor it
    /// was first reached through; the FIFO frontier makes tie-breaks
    /// deterministic given the sorted neighbor sets.
    fn recompute(&mut self) {
        let mut routes = BTreeMap::new();
        let mut visited: BTreeSet<PeerId> = BTreeSet::new();
        let mut frontier: VecDeque<(PeerId, PeerId)> = VecDeque::new();

        visited.insert(self.local);
        for neighbor in &self.direct {
            if visited.insert(*neighbor) {
                routes.insert(*neighbor, *neighbor);
                frontier.push_back((*neighbor, *neighbor));
            }
        }

        while let Some((peer, first_hop)) = frontier.pop_front() {
            if let Some(snapshot) = self.snapshots.get(&peer) {
                for next in &snapshot.neighbors {
                    if visited.insert(*next) {
                        routes.insert(*next, first_hop);
                        frontier.push_back((*next, first_hop));
                    }
                }
            }
        }

        self.routes = routes;
        // Proactive knowledge supersedes stale reactive entries
        let proactive = &self.routes;
        self.discovered.retain(|target, _| !proactive.contains_key(target));
    }
}
