use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use meshkv_common::resp::{Reply, RespReader, RespWriter};
use meshkv_common::urls::parse_url;
use meshkv_common::{KeyHash, MeshKvError, Result};

/// A client connection to a MeshKV node, speaking the RESP command
/// protocol over a single TCP socket.
pub struct Conn {
    reader: RespReader<OwnedReadHalf>,
    writer: RespWriter<OwnedWriteHalf>,
}

impl Conn {
    /// Establishes a connection to the node at the provided URL
    /// (`tcp://<host>:<port>`).
    pub async fn dial(url: &str) -> Result<Conn> {
        let (host, port) = parse_url(url)?;
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Conn {
            reader: RespReader::new(read_half),
            writer: RespWriter::new(write_half),
        })
    }

    /// Sets the provided value at the provided key.
    pub async fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let reply = self.request(&[b"SET", key, value]).await?;
        expect_ok(reply, "set")
    }

    /// Returns the value at the provided key, or `None` if the key is
    /// absent or deleted.
    pub async fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.request(&[b"GET", key]).await? {
            Reply::Bulk(value) => Ok(Some(value)),
            Reply::Null => Ok(None),
            Reply::Error(message) => Err(MeshKvError::Protocol(message)),
            _ => Err(MeshKvError::Protocol("get command failed".into())),
        }
    }

    /// Removes the value at the provided key.
    pub async fn delete(&mut self, key: &[u8]) -> Result<()> {
        let reply = self.request(&[b"DEL", key]).await?;
        expect_ok(reply, "del")
    }

    /// Returns all keys with a live value.
    pub async fn keys(&mut self) -> Result<Vec<Vec<u8>>> {
        match self.request(&[b"KEYS"]).await? {
            Reply::Array(elements) => elements
                .into_iter()
                .map(|element| match element {
                    Reply::Bulk(key) => Ok(key),
                    _ => Err(MeshKvError::Protocol("keys command failed".into())),
                })
                .collect(),
            Reply::Error(message) => Err(MeshKvError::Protocol(message)),
            _ => Err(MeshKvError::Protocol("keys command failed".into())),
        }
    }

    /// Asks the node to clean up expired tombstones.
    pub async fn tidy(&mut self) -> Result<()> {
        let reply = self.request(&[b"TIDY"]).await?;
        expect_ok(reply, "tidy")
    }

    /// Probes the connection.
    pub async fn ping(&mut self) -> Result<()> {
        let reply = self.request(&[b"PING"]).await?;
        expect_ok(reply, "ping")
    }

    /// Replication-internal: stores a serialized container under its key
    /// hash on the remote node.
    pub async fn set_container(&mut self, kh: KeyHash, bytes: &[u8]) -> Result<()> {
        let reply = self.request(&[b"CSET", kh.as_bytes(), bytes]).await?;
        expect_ok(reply, "cset")
    }

    /// Replication-internal: fetches the serialized container stored under
    /// the provided key hash, or `None` if the remote no longer has it.
    pub async fn get_container(&mut self, kh: KeyHash) -> Result<Option<Vec<u8>>> {
        match self.request(&[b"CGET", kh.as_bytes()]).await? {
            Reply::Bulk(bytes) => Ok(Some(bytes)),
            Reply::Null => Ok(None),
            Reply::Error(message) => Err(MeshKvError::Protocol(message)),
            _ => Err(MeshKvError::Protocol("cget command failed".into())),
        }
    }

    /// Switches the remote node into reconciliation mode and returns the
    /// raw transport, invalidating this connection. The caller owns the
    /// stream exclusively until the reconciliation protocol completes.
    pub async fn reconcile(mut self) -> Result<TcpStream> {
        let reply = self.request(&[b"RECONCILE"]).await?;
        expect_ok(reply, "reconcile")?;
        let read_half = self.reader.into_inner();
        let write_half = self.writer.into_inner();
        read_half
            .reunite(write_half)
            .map_err(|_| MeshKvError::Protocol("connection halves diverged".into()))
    }

    /// Tears down the connection.
    pub async fn close(self) -> Result<()> {
        let mut write_half = self.writer.into_inner();
        // The peer may already be gone; closing is best-effort.
        if let Err(err) = write_half.shutdown().await {
            tracing::debug!("shutdown: {err}");
        }
        Ok(())
    }

    async fn request(&mut self, parts: &[&[u8]]) -> Result<Reply> {
        self.writer.write_command(parts).await?;
        self.writer.flush().await?;
        self.reader.read_reply().await
    }
}

fn expect_ok(reply: Reply, command: &str) -> Result<()> {
    match reply {
        Reply::Simple(status) if status == "OK" => Ok(()),
        Reply::Error(message) => Err(MeshKvError::Protocol(message)),
        _ => Err(MeshKvError::Protocol(format!("{} command failed", command))),
    }
}
