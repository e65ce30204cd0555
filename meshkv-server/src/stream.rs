use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use meshkv_client::Conn;
use meshkv_common::{Container, KeyHash, Result};

use crate::config::UPDATE_CHANNEL_CAPACITY;
use crate::metric::Metric;

struct StreamUpdate {
    key_hash: KeyHash,
    container: Container,
}

type UpdateSlot = Arc<Mutex<Option<mpsc::Sender<StreamUpdate>>>>;

/// Background worker forwarding container updates to one peer.
///
/// The update channel exists only while a connection is established;
/// `update` is a non-blocking send that drops the update otherwise. Missed
/// updates are recovered by the next reconciliation round.
pub struct Stream {
    peer_url: String,
    updates: UpdateSlot,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Stream {
    /// Spawns the worker; it dials the peer immediately and keeps
    /// reconnecting until closed.
    pub fn new(
        peer_url: String,
        ping_interval: Duration,
        reconnect_interval: Duration,
        metric: Arc<dyn Metric>,
    ) -> Stream {
        let updates: UpdateSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            peer_url.clone(),
            ping_interval,
            reconnect_interval,
            updates.clone(),
            cancel.clone(),
            metric,
        ));
        Stream { peer_url, updates, cancel, handle }
    }

    pub fn peer_url(&self) -> &str {
        &self.peer_url
    }

    /// Queues a container update for the peer; drops it when the peer is
    /// not currently connected or the channel is full.
    pub fn update(&self, kh: KeyHash, container: &Container) {
        let guard = self.updates.lock();
        if let Some(sender) = guard.as_ref() {
            let update = StreamUpdate { key_hash: kh, container: container.clone() };
            if sender.try_send(update).is_err() {
                tracing::debug!("stream [{}]: update dropped", self.peer_url);
            }
        }
    }

    /// Signals the worker to shut down and waits for it to terminate.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            tracing::debug!("stream [{}]: join: {err}", self.peer_url);
        }
    }
}

async fn run(
    peer_url: String,
    ping_interval: Duration,
    reconnect_interval: Duration,
    updates: UpdateSlot,
    cancel: CancellationToken,
    metric: Arc<dyn Metric>,
) {
    loop {
        // connecting
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return,
            dialed = Conn::dial(&peer_url) => dialed,
        };
        let mut conn = match dialed {
            Ok(conn) => conn,
            Err(err) => {
                tracing::debug!("stream [{peer_url}]: {err}");
                if wait(&cancel, reconnect_interval).await {
                    return;
                }
                continue;
            }
        };

        // connected
        let (sender, mut receiver) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        *updates.lock() = Some(sender);
        metric.peer_connected(&peer_url);

        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = loop {
            tokio::select! {
                _ = cancel.cancelled() => break true,
                _ = ping.tick() => {
                    if let Err(err) = conn.ping().await {
                        tracing::debug!("stream [{peer_url}]: ping: {err}");
                        break false;
                    }
                }
                update = receiver.recv() => {
                    // The sender lives in the slot until teardown, so the
                    // channel cannot yield `None` here.
                    let Some(update) = update else { break false };
                    if let Err(err) = forward(&mut conn, &update).await {
                        tracing::debug!("stream [{peer_url}]: update: {err}");
                        break false;
                    }
                }
            }
        };

        // reconnecting (or terminating)
        *updates.lock() = None;
        if shutdown {
            // Drain what producers already queued before terminating.
            while let Ok(update) = receiver.try_recv() {
                if forward(&mut conn, &update).await.is_err() {
                    break;
                }
            }
            let _ = conn.close().await;
            metric.peer_disconnected(&peer_url);
            return;
        }
        let _ = conn.close().await;
        metric.peer_disconnected(&peer_url);
        if wait(&cancel, reconnect_interval).await {
            return;
        }
    }
}

async fn forward(conn: &mut Conn, update: &StreamUpdate) -> Result<()> {
    conn.set_container(update.key_hash, &update.container.encode()).await
}

/// Sleeps for the provided duration; returns `true` if cancelled first.
async fn wait(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
