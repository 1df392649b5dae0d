//! Reactive route discovery
//!
//! Complements the proactive topology table: when no route to a needed
//! destination exists, a TTL-bounded RouteRequest is flooded; whichever
//! peer is the destination or already routes to it answers with a
//! RouteReply retraced along the accumulated path. RouteErrors invalidate
//! entries that depended on a broken next hop.
//!
//! This module decides; the router moves bytes. Every handler returns a
//! [`DiscoveryAction`] for the caller to carry out.

use embermesh_protocol::{PeerId, RouteError, RouteReply, RouteRequest};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// A discovery the local peer is still waiting on
#[derive(Debug, Clone)]
pub struct PendingDiscovery {
    pub destination: PeerId,
    pub started: Instant,
}

/// What the router should do with a handled discovery message
#[derive(Debug, Clone)]
pub enum DiscoveryAction {
    /// Re-flood the request to direct neighbors
    Flood(RouteRequest),
    /// Send a reply to the peer the request arrived from
    Reply(RouteReply),
    /// Pass a reply one hop closer to its origin
    Forward { to: PeerId, reply: RouteReply },
    /// A reply reached its origin; remember the route
    Install { destination: PeerId, next_hop: PeerId },
    /// Nothing further; TTL exhausted or the message is not ours to act on
    Drop,
}

/// Tracks outstanding route requests originated locally
#[derive(Debug)]
pub struct RouteDiscovery {
    local: PeerId,
    ttl: u8,
    pending: HashMap<PeerId, PendingDiscovery>,
}

impl RouteDiscovery {
    pub fn new(local: PeerId, ttl: u8) -> Self {
        RouteDiscovery {
            local,
            ttl,
            pending: HashMap::new(),
        }
    }

    /// Start a discovery toward `destination`
    ///
    /// Returns the request to flood, or None when one is already in
    /// flight for the same destination.
    pub fn begin(&mut self, destination: PeerId) -> Option<RouteRequest> {
        if self.pending.contains_key(&destination) {
            return None;
        }

        let request = RouteRequest::new(self.local, destination, self.ttl);
        self.pending.insert(
            destination,
            PendingDiscovery {
                destination,
                started: Instant::now(),
            },
        );
        Some(request)
    }

    /// Whether a discovery toward `destination` is outstanding
    pub fn is_pending(&self, destination: &PeerId) -> bool {
        self.pending.contains_key(destination)
    }

    /// Handle a request received from another peer
    ///
    /// `knows_route` tells whether the local topology table already holds
    /// a route to the request's destination.
    pub fn handle_request(&self, request: &RouteRequest, knows_route: bool) -> DiscoveryAction {
        if request.origin == self.local {
            // Our own flood came back around
            return DiscoveryAction::Drop;
        }

        if request.destination == self.local || knows_route {
            let mut path = request.path_so_far.clone();
            path.push(self.local);
            return DiscoveryAction::Reply(RouteReply {
                request_id: request.request_id,
                origin: request.origin,
                destination: request.destination,
                path,
                hop_count: 0,
            });
        }

        match request.forwarded(self.local) {
            Some(forwarded) => DiscoveryAction::Flood(forwarded),
            None => DiscoveryAction::Drop,
        }
    }

    /// Handle a reply travelling back toward its origin
    pub fn handle_reply(&mut self, reply: &RouteReply) -> DiscoveryAction {
        if reply.origin == self.local {
            self.pending.remove(&reply.destination);
            return match reply.first_hop() {
                Some(next_hop) => DiscoveryAction::Install {
                    destination: reply.destination,
                    next_hop,
                },
                None => DiscoveryAction::Drop,
            };
        }

        match reply.next_toward_origin(&self.local) {
            Some(to) => {
                let mut forwarded = reply.clone();
                forwarded.hop_count += 1;
                DiscoveryAction::Forward {
                    to,
                    reply: forwarded,
                }
            }
            None => DiscoveryAction::Drop,
        }
    }

    /// Build the error a peer emits when it cannot forward along a
    /// previously advertised path
    pub fn report_broken_link(&self, destination: PeerId, broken_next_hop: PeerId) -> RouteError {
        RouteError::new(self.local, destination, broken_next_hop)
    }

    /// Drop discoveries that outlived `timeout`; returns their
    /// destinations so the router can surface the failures
    pub fn sweep_expired(&mut self, timeout: Duration) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .pending
            .values()
            .filter(|p| p.started.elapsed() > timeout)
            .map(|p| p.destination)
            .collect();

        for destination in &expired {
            self.pending.remove(destination);
        }
        expired
    }

    /// Number of outstanding discoveries
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 16])
    }

    #[tokio::test]
    async fn test_begin_is_idempotent_per_destination() {
        let mut discovery = RouteDiscovery::new(peer(1), 8);

        let request = discovery.begin(peer(9)).unwrap();
        assert_eq!(request.origin, peer(1));
        assert_eq!(request.destination, peer(9));
        assert!(discovery.is_pending(&peer(9)));

        // Second begin while the first is outstanding floods nothing
        assert!(discovery.begin(peer(9)).is_none());
        assert_eq!(discovery.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_destination_replies_with_full_path() {
        let discovery = RouteDiscovery::new(peer(9), 8);

        let request = RouteRequest::new(peer(1), peer(9), 8)
            .forwarded(peer(2))
            .unwrap();

        match discovery.handle_request(&request, false) {
            DiscoveryAction::Reply(reply) => {
                assert_eq!(reply.origin, peer(1));
                assert_eq!(reply.path, vec![peer(2), peer(9)]);
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_holder_replies_without_being_destination() {
        let discovery = RouteDiscovery::new(peer(5), 8);
        let request = RouteRequest::new(peer(1), peer(9), 8);

        match discovery.handle_request(&request, true) {
            DiscoveryAction::Reply(reply) => {
                assert_eq!(reply.path, vec![peer(5)]);
                assert_eq!(reply.destination, peer(9));
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_intermediate_refloods_until_ttl() {
        let discovery = RouteDiscovery::new(peer(5), 8);

        let request = RouteRequest::new(peer(1), peer(9), 2);
        match discovery.handle_request(&request, false) {
            DiscoveryAction::Flood(fwd) => {
                assert_eq!(fwd.path_so_far, vec![peer(5)]);
                assert_eq!(fwd.hop_count, 1);
            }
            other => panic!("expected flood, got {:?}", other),
        }

        // TTL-exhausted requests die quietly
        let spent = RouteRequest::new(peer(1), peer(9), 1)
            .forwarded(peer(2))
            .unwrap();
        assert!(matches!(
            discovery.handle_request(&spent, false),
            DiscoveryAction::Drop
        ));
    }

    #[tokio::test]
    async fn test_origin_installs_from_reply() {
        let mut discovery = RouteDiscovery::new(peer(1), 8);
        let request = discovery.begin(peer(9)).unwrap();

        let reply = RouteReply {
            request_id: request.request_id,
            origin: peer(1),
            destination: peer(9),
            path: vec![peer(2), peer(9)],
            hop_count: 1,
        };

        match discovery.handle_reply(&reply) {
            DiscoveryAction::Install {
                destination,
                next_hop,
            } => {
                assert_eq!(destination, peer(9));
                assert_eq!(next_hop, peer(2));
            }
            other => panic!("expected install, got {:?}", other),
        }
        assert!(!discovery.is_pending(&peer(9)));
    }

    #[tokio::test]
    async fn test_intermediate_forwards_reply_toward_origin() {
        let mut discovery = RouteDiscovery::new(peer(2), 8);

        let reply = RouteReply {
            request_id: embermesh_protocol::MessageId::random(&peer(9)),
            origin: peer(1),
            destination: peer(9),
            path: vec![peer(2), peer(3), peer(9)],
            hop_count: 1,
        };

        match discovery.handle_reply(&reply) {
            DiscoveryAction::Forward { to, reply } => {
                assert_eq!(to, peer(1));
                assert_eq!(reply.hop_count, 2);
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_discoveries_are_reported() {
        let mut discovery = RouteDiscovery::new(peer(1), 8);
        discovery.begin(peer(9)).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(discovery.sweep_expired(Duration::from_secs(10)).is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        let expired = discovery.sweep_expired(Duration::from_secs(10));
        assert_eq!(expired, vec![peer(9)]);
        assert_eq!(discovery.pending_count(), 0);
    }
}
