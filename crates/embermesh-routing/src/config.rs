//! Routing configuration
//!
//! Every tunable the core uses is injected here at construction time;
//! components never consult a process-wide global. Mode presets mirror
//! the operating profiles of the embedding application.

use std::time::Duration;

/// Tunables for every routing component
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Maximum envelopes held in the outbound priority queue
    pub queue_capacity: usize,

    /// Maximum records held in the deduplication cache
    pub dedup_capacity: usize,

    /// Freshness window for deduplication records
    pub dedup_window: Duration,

    /// How often expired dedup records are physically removed
    pub dedup_sweep_interval: Duration,

    /// Age at which a peer's topology snapshot is discarded
    pub stale_threshold: Duration,

    /// How often stale topology snapshots are swept
    pub topology_sweep_interval: Duration,

    /// TTL for outgoing topology announcements
    pub announcement_ttl: u8,

    /// TTL for reactive route discovery floods
    pub discovery_ttl: u8,

    /// How long a pending discovery waits before it is reported failed
    pub discovery_timeout: Duration,

    /// Time allowed for an acknowledgment before a retransmission
    pub ack_timeout: Duration,

    /// Retransmissions before a delivery is reported failed
    pub max_ack_attempts: u32,

    /// How often the ack tracker checks for due retries
    pub ack_tick_interval: Duration,

    /// Retry block after a failed or dropped connection attempt
    pub connection_cooldown: Duration,

    /// Drain-loop sleep when the outbound queue is empty
    pub drain_idle_interval: Duration,
}

impl RoutingConfig {
    /// Everyday operation
    pub fn standard() -> Self {
        RoutingConfig {
            queue_capacity: 100,
            dedup_capacity: 500,
            dedup_window: Duration::from_secs(300),
            dedup_sweep_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(30),
            topology_sweep_interval: Duration::from_secs(10),
            announcement_ttl: 8,
            discovery_ttl: 8,
            discovery_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            max_ack_attempts: 3,
            ack_tick_interval: Duration::from_millis(500),
            connection_cooldown: Duration::from_secs(30),
            drain_idle_interval: Duration::from_millis(50),
        }
    }

    /// Reduced buffers and fewer retries for battery operation
    pub fn power_saving() -> Self {
        RoutingConfig {
            queue_capacity: 50,
            max_ack_attempts: 2,
            connection_cooldown: Duration::from_secs(45),
            drain_idle_interval: Duration::from_millis(200),
            ..Self::standard()
        }
    }

    /// Larger buffers and more retries when delivery matters most
    pub fn high_availability() -> Self {
        RoutingConfig {
            queue_capacity: 200,
            max_ack_attempts: 5,
            connection_cooldown: Duration::from_secs(20),
            ..Self::standard()
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self::standard()
    }
}
