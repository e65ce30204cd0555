use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use meshkv_common::Result;

use crate::config::{DEFAULT_PEER_PING_INTERVAL, DEFAULT_PEER_RECONNECT_INTERVAL, DEFAULT_TIDY_INTERVAL};
use crate::metric::Metric;
use crate::server::Server;
use crate::store::{Store, SystemClock};

/// Node configuration.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Listener address in the format `tcp://localhost:5000`.
    pub listen_url: String,

    /// Peer addresses in the format `tcp://localhost:5000`.
    pub peer_urls: Vec<String>,

    /// Interval in which a peer is pinged to test its availability.
    pub peer_ping_interval: Duration,

    /// Duration after which a failing peer is reconnected.
    pub peer_reconnect_interval: Duration,

    /// Interval in which the store is cleaned up.
    pub tidy_interval: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        NodeOptions {
            listen_url: "tcp://localhost:0".to_string(),
            peer_urls: Vec::new(),
            peer_ping_interval: DEFAULT_PEER_PING_INTERVAL,
            peer_reconnect_interval: DEFAULT_PEER_RECONNECT_INTERVAL,
            tidy_interval: DEFAULT_TIDY_INTERVAL,
        }
    }
}

/// One node of the store: the local replica, its server, its update
/// streams and the periodic tombstone sweep.
pub struct Node {
    store: Arc<Store>,
    server: Server,
    cancel: CancellationToken,
    tidy_handle: JoinHandle<()>,
}

impl Node {
    /// Builds the store and server, wires the update observer, performs a
    /// best-effort startup reconciliation with every configured peer,
    /// attaches the update streams and starts the tidy ticker.
    pub async fn start(options: NodeOptions, metric: Arc<dyn Metric>) -> Result<Node> {
        let store = Arc::new(Store::new(Arc::new(SystemClock), metric.clone()));
        let server = Server::new(store.clone(), &options.listen_url, metric).await?;

        for peer_url in &options.peer_urls {
            if let Err(err) = server.reconcile(peer_url).await {
                tracing::warn!("reconcile [{peer_url}]: {err}");
            }
            server.add_peer(peer_url, options.peer_ping_interval, options.peer_reconnect_interval);
        }

        let cancel = CancellationToken::new();
        let tidy_handle = tokio::spawn(tidy_loop(store.clone(), options.tidy_interval, cancel.clone()));

        Ok(Node { store, server, cancel, tidy_handle })
    }

    /// The local replica; mutations stream to connected peers.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// URL of the node's listener.
    pub fn listen_url(&self) -> String {
        self.server.listen_url()
    }

    /// Tears down the node: stops the tidy ticker, the update streams and
    /// the server.
    pub async fn close(self) -> Result<()> {
        self.cancel.cancel();
        if let Err(err) = self.tidy_handle.await {
            tracing::debug!("tidy loop join: {err}");
        }
        self.server.close().await
    }
}

async fn tidy_loop(store: Arc<Store>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => store.tidy(),
        }
    }
}
