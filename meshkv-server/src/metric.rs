/// Observer interface for node-level events; implementations must be safe
/// for concurrent use.
pub trait Metric: Send + Sync {
    /// Called whenever the number of live or deleted containers changes.
    fn count_changed(&self, live: usize, deleted: usize);

    /// Called when a client connection is accepted.
    fn client_connected(&self, url: &str);

    /// Called when a client connection ends.
    fn client_disconnected(&self, url: &str);

    /// Called when an update stream establishes a peer connection.
    fn peer_connected(&self, url: &str);

    /// Called when an update stream loses its peer connection.
    fn peer_disconnected(&self, url: &str);
}

/// Metric implementation that logs every event.
pub struct LogMetric;

impl Metric for LogMetric {
    fn count_changed(&self, live: usize, deleted: usize) {
        tracing::debug!("count changed: values = {live} / deleted = {deleted}");
    }

    fn client_connected(&self, url: &str) {
        tracing::debug!("client connected: {url}");
    }

    fn client_disconnected(&self, url: &str) {
        tracing::debug!("client disconnected: {url}");
    }

    fn peer_connected(&self, url: &str) {
        tracing::info!("peer connected: {url}");
    }

    fn peer_disconnected(&self, url: &str) {
        tracing::info!("peer disconnected: {url}");
    }
}

/// Metric implementation that ignores every event.
pub struct NoopMetric;

impl Metric for NoopMetric {
    fn count_changed(&self, _live: usize, _deleted: usize) {}

    fn client_connected(&self, _url: &str) {}

    fn client_disconnected(&self, _url: &str) {}

    fn peer_connected(&self, _url: &str) {}

    fn peer_disconnected(&self, _url: &str) {}
}
