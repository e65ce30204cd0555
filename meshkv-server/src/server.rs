use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use meshkv_client::Conn;
use meshkv_common::resp::{RespReader, RespWriter};
use meshkv_common::urls::{parse_url, url_for};
use meshkv_common::{Container, KeyHash, Result, MAX_KEY_SIZE};

use crate::config::RECON_MAX_BATCH;
use crate::metric::Metric;
use crate::recon;
use crate::store::Store;
use crate::stream::Stream;

const HELP: &str = "Supported commands:
help              - prints this help message
set <key> <value> - sets <value> at <key>
get <key>         - returns value at <key>
del <key>         - removes value at <key>
keys              - returns all keys
tidy              - cleans up the store
quit              - closes the connection
";

enum CommandOutcome {
    Closed,
    Reconcile,
}

struct ServerInner {
    store: Arc<Store>,
    metric: Arc<dyn Metric>,
    listen_addr: SocketAddr,
    streams: Mutex<Vec<Stream>>,
    cancel: CancellationToken,
}

/// Listener plus per-connection command dispatch; also owns the update
/// streams towards this node's peers.
pub struct Server {
    inner: Arc<ServerInner>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Binds the listener, installs this server as the store's update
    /// observer and starts accepting connections.
    pub async fn new(store: Arc<Store>, listen_url: &str, metric: Arc<dyn Metric>) -> Result<Server> {
        let (host, port) = parse_url(listen_url)?;
        let listener = TcpListener::bind((host.as_str(), port)).await?;
        let listen_addr = listener.local_addr()?;

        let inner = Arc::new(ServerInner {
            store: store.clone(),
            metric,
            listen_addr,
            streams: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        let observer = Arc::downgrade(&inner);
        store.set_update_fn(Box::new(move |kh, container| {
            if let Some(inner) = observer.upgrade() {
                inner.update(kh, container);
            }
        }));

        let accept_inner = inner.clone();
        let accept_handle = tokio::spawn(accept_loop(accept_inner, listener));

        Ok(Server { inner, accept_handle: Mutex::new(Some(accept_handle)) })
    }

    /// URL of the bound listener.
    pub fn listen_url(&self) -> String {
        url_for(self.inner.listen_addr)
    }

    /// Adds another node as a target for updates. Never blocks; the stream
    /// dials in the background.
    pub fn add_peer(&self, peer_url: &str, ping_interval: Duration, reconnect_interval: Duration) {
        let stream = Stream::new(
            peer_url.to_string(),
            ping_interval,
            reconnect_interval,
            self.inner.metric.clone(),
        );
        self.inner.streams.lock().push(stream);
    }

    /// Performs one reconciliation with the node at the provided URL:
    /// recovers the differing key hashes over a dedicated connection, then
    /// fetches and applies each container over a fresh one. Returns the
    /// number of differing hashes.
    pub async fn reconcile(&self, peer_url: &str) -> Result<usize> {
        let conn = Conn::dial(peer_url).await?;
        let mut transport = conn.reconcile().await?;
        let view = self.inner.store.state();
        let outcome = recon::initiate(&mut transport, &view, RECON_MAX_BATCH).await;
        let _ = transport.shutdown().await;
        let (missing, _remote_extra) = outcome?;

        let mut payload_conn = Conn::dial(peer_url).await?;
        for kh in &missing {
            // The remote may have tidied the container away in the
            // meantime; a null fetch is skipped.
            let Some(bytes) = payload_conn.get_container(*kh).await? else { continue };
            self.inner.store.set_container(*kh, &bytes)?;
        }
        payload_conn.close().await?;

        Ok(missing.len())
    }

    /// Tears down the streams and stops the accept loop along with any
    /// in-flight command loops.
    pub async fn close(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let streams: Vec<Stream> = std::mem::take(&mut *self.inner.streams.lock());
        for stream in streams {
            stream.close().await;
        }
        let handle = self.accept_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::debug!("accept loop join: {err}");
            }
        }
        Ok(())
    }
}

impl ServerInner {
    /// Fans a local store update out to every peer stream.
    fn update(&self, kh: KeyHash, container: &Container) {
        for stream in self.streams.lock().iter() {
            stream.update(kh, container);
        }
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!("accept: {err}");
                continue;
            }
        };

        let client_url = url_for(peer_addr);
        inner.metric.client_connected(&client_url);

        let conn_inner = inner.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(&conn_inner, stream).await {
                tracing::debug!("conn {client_url}: {err}");
            }
            conn_inner.metric.client_disconnected(&client_url);
        });
    }
}

async fn handle_conn(inner: &Arc<ServerInner>, mut stream: TcpStream) -> Result<()> {
    let outcome = {
        let (read_half, write_half) = stream.split();
        let mut reader = RespReader::new(read_half);
        let mut writer = RespWriter::new(write_half);
        command_loop(inner, &mut reader, &mut writer).await?
    };

    if let CommandOutcome::Reconcile = outcome {
        let view = inner.store.state();
        recon::accept(&mut stream, &view).await?;
    }
    Ok(())
}

async fn command_loop<R, W>(
    inner: &ServerInner,
    reader: &mut RespReader<R>,
    writer: &mut RespWriter<W>,
) -> Result<CommandOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let command = tokio::select! {
            _ = inner.cancel.cancelled() => return Ok(CommandOutcome::Closed),
            command = reader.read_command() => command?,
        };
        let Some(parts) = command else {
            // EOF on the client side is a graceful close.
            return Ok(CommandOutcome::Closed);
        };
        let Some((name, arguments)) = parts.split_first() else {
            writer.write_error("ERR empty command").await?;
            writer.flush().await?;
            continue;
        };

        match name.to_ascii_lowercase().as_slice() {
            b"help" => writer.write_bulk(HELP.as_bytes()).await?,
            b"quit" => {
                writer.write_simple("OK").await?;
                writer.flush().await?;
                return Ok(CommandOutcome::Closed);
            }
            b"ping" => writer.write_simple("OK").await?,
            b"set" => match arguments {
                [key, value] if key.len() <= MAX_KEY_SIZE => {
                    inner.store.set(key, value);
                    writer.write_simple("OK").await?;
                }
                [key, _] => {
                    let message = format!("ERR key exceeds maximum size of {} bytes ({})", MAX_KEY_SIZE, key.len());
                    writer.write_error(&message).await?;
                }
                _ => wrong_arity(writer, "set").await?,
            },
            b"get" => match arguments {
                [key] => match inner.store.get(key) {
                    Some(value) => writer.write_bulk(&value).await?,
                    None => writer.write_null().await?,
                },
                _ => wrong_arity(writer, "get").await?,
            },
            b"del" => match arguments {
                [key] => {
                    inner.store.delete(key);
                    writer.write_simple("OK").await?;
                }
                _ => wrong_arity(writer, "del").await?,
            },
            b"keys" => {
                let mut keys = Vec::new();
                inner.store.each(|key, _| {
                    keys.push(key.to_vec());
                    Ok(())
                })?;
                writer.write_array_header(keys.len()).await?;
                for key in keys {
                    writer.write_bulk(&key).await?;
                }
            }
            b"tidy" => {
                inner.store.tidy();
                writer.write_simple("OK").await?;
            }
            b"cset" => match arguments {
                [kh_bytes, bytes] => match KeyHash::from_slice(kh_bytes) {
                    Some(kh) => match inner.store.set_container(kh, bytes) {
                        Ok(()) => writer.write_simple("OK").await?,
                        Err(err) => writer.write_error(&format!("ERR {err}")).await?,
                    },
                    None => writer.write_error("ERR invalid key hash").await?,
                },
                _ => wrong_arity(writer, "cset").await?,
            },
            b"cget" => match arguments {
                [kh_bytes] => match KeyHash::from_slice(kh_bytes) {
                    Some(kh) => match inner.store.get_container(kh) {
                        Some(bytes) => writer.write_bulk(&bytes).await?,
                        None => writer.write_null().await?,
                    },
                    None => writer.write_error("ERR invalid key hash").await?,
                },
                _ => wrong_arity(writer, "cget").await?,
            },
            b"reconcile" => {
                writer.write_simple("OK").await?;
                writer.flush().await?;
                return Ok(CommandOutcome::Reconcile);
            }
            other => {
                let message = format!("ERR unknown command [{}]", String::from_utf8_lossy(other));
                writer.write_error(&message).await?;
            }
        }

        writer.flush().await?;
    }
}

async fn wrong_arity<W>(writer: &mut RespWriter<W>, command: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_error(&format!("ERR wrong number of arguments for [{command}]")).await
}
