use std::time::Duration;

/// How long a tombstone survives before a tidy sweep may drop it (seconds).
pub const TOMBSTONE_HORIZON_SECS: u64 = 3600;

/// Bound on the symmetric difference recovered per reconciliation exchange.
pub const RECON_MAX_BATCH: usize = 100;

/// Capacity of a peer stream's update channel; a full channel drops the
/// update, to be recovered by the next reconciliation round.
pub const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Default interval between liveness pings to a connected peer.
pub const DEFAULT_PEER_PING_INTERVAL: Duration = Duration::from_millis(500);

/// Default duration after which a failing peer is redialed.
pub const DEFAULT_PEER_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between tombstone sweeps.
pub const DEFAULT_TIDY_INTERVAL: Duration = Duration::from_secs(5);
