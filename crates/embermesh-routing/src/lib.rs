//! Embermesh Message Routing
//!
//! This module implements the routing core for a peer-to-peer mesh:
//! - Bounded priority queue for outgoing traffic
//! - Time-windowed message deduplication
//! - Proactive topology table with BFS-derived next hops
//! - Reactive route discovery (request/reply/error)
//! - Acknowledgment tracking with bounded retry
//! - Connection arbitration (tie-break, mutex, cooldown)

pub mod ack;
pub mod arbitration;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod queue;
pub mod router;
pub mod topology;
pub mod transport;

pub use ack::{AckTick, AckTracker, PendingAck};
pub use arbitration::ConnectionArbitration;
pub use config::RoutingConfig;
pub use dedup::DeduplicationCache;
pub use discovery::{DiscoveryAction, RouteDiscovery};
pub use error::{Result, RoutingError};
pub use queue::{PriorityQueue, QueueStats};
pub use router::{MeshRouter, RouterEvent, RouterStats};
pub use topology::{PeerTopologySnapshot, TopologyTable};
pub use transport::Transport;
