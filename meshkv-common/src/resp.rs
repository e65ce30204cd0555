use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::{MeshKvError, Result};

/// Upper bound on a single bulk string, guarding the reader against
/// malformed length prefixes.
const MAX_BULK_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on the number of elements in a command or reply array.
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// A single RESP reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Reply>),
}

/// Streaming reader for RESP commands and replies.
pub struct RespReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(inner: R) -> Self {
        RespReader { reader: BufReader::new(inner), line: Vec::new() }
    }

    /// Returns the wrapped stream, discarding any buffered input.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Reads the next command: an array of bulk strings. Returns `None` on
    /// a clean end-of-stream before the first byte of a command.
    pub async fn read_command(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        let line = match self.read_line().await? {
            Some(line) => line,
            None => return Ok(None),
        };
        if line.first() != Some(&b'*') {
            return Err(MeshKvError::Protocol("expected command array".into()));
        }
        let count = parse_len(&line[1..])?;
        if count < 0 {
            return Err(MeshKvError::Protocol("negative command array length".into()));
        }
        let mut parts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parts.push(self.read_bulk_frame().await?);
        }
        Ok(Some(parts))
    }

    /// Reads a single reply of any shape.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let line = self.read_line().await?.ok_or(MeshKvError::Closed)?;
        let (kind, rest) = line.split_first().ok_or_else(|| MeshKvError::Protocol("empty reply line".into()))?;
        match kind {
            b'+' => Ok(Reply::Simple(String::from_utf8_lossy(rest).into_owned())),
            b'-' => Ok(Reply::Error(String::from_utf8_lossy(rest).into_owned())),
            b'$' => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Null);
                }
                Ok(Reply::Bulk(self.read_bulk_body(len as usize).await?))
            }
            b'*' => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Null);
                }
                if len as usize > MAX_ARRAY_LEN {
                    return Err(MeshKvError::Protocol("reply array too long".into()));
                }
                let mut elements = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    elements.push(Box::pin(self.read_reply()).await?);
                }
                Ok(Reply::Array(elements))
            }
            other => Err(MeshKvError::Protocol(format!("unexpected reply type byte {:#04x}", other))),
        }
    }

    async fn read_bulk_frame(&mut self) -> Result<Vec<u8>> {
        let line = self.read_line().await?.ok_or(MeshKvError::Closed)?;
        if line.first() != Some(&b'$') {
            return Err(MeshKvError::Protocol("expected bulk string".into()));
        }
        let len = parse_len(&line[1..])?;
        if len < 0 {
            return Err(MeshKvError::Protocol("null bulk string in command".into()));
        }
        self.read_bulk_body(len as usize).await
    }

    async fn read_bulk_body(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > MAX_BULK_LEN {
            return Err(MeshKvError::Protocol("bulk string too long".into()));
        }
        let mut body = vec![0u8; len + 2];
        self.reader.read_exact(&mut body).await.map_err(unexpected_eof_as_closed)?;
        if &body[len..] != b"\r\n" {
            return Err(MeshKvError::Protocol("bulk string missing trailing CRLF".into()));
        }
        body.truncate(len);
        Ok(body)
    }

    /// Reads one CRLF-terminated line without the terminator. Returns
    /// `None` on end-of-stream at a line boundary.
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        self.line.clear();
        loop {
            let byte = match self.reader.read_u8().await {
                Ok(byte) => byte,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if self.line.is_empty() {
                        return Ok(None);
                    }
                    return Err(MeshKvError::Closed);
                }
                Err(err) => return Err(err.into()),
            };
            if byte == b'\n' {
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }
                return Ok(Some(std::mem::take(&mut self.line)));
            }
            if self.line.len() > 128 * 1024 {
                return Err(MeshKvError::Protocol("header line too long".into()));
            }
            self.line.push(byte);
        }
    }
}

/// Buffered writer for RESP commands and replies; nothing hits the socket
/// until `flush` is called.
pub struct RespWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> RespWriter<W> {
    pub fn new(inner: W) -> Self {
        RespWriter { writer: BufWriter::new(inner) }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    pub async fn write_simple(&mut self, value: &str) -> Result<()> {
        self.writer.write_all(b"+").await?;
        self.writer.write_all(value.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn write_error(&mut self, message: &str) -> Result<()> {
        self.writer.write_all(b"-").await?;
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn write_bulk(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(format!("${}\r\n", value.len()).as_bytes()).await?;
        self.writer.write_all(value).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn write_null(&mut self) -> Result<()> {
        self.writer.write_all(b"$-1\r\n").await?;
        Ok(())
    }

    /// Writes an array header; the caller writes the announced number of
    /// elements afterwards.
    pub async fn write_array_header(&mut self, len: usize) -> Result<()> {
        self.writer.write_all(format!("*{}\r\n", len).as_bytes()).await?;
        Ok(())
    }

    /// Writes a full command: an array of bulk strings.
    pub async fn write_command(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.write_array_header(parts.len()).await?;
        for part in parts {
            self.write_bulk(part).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

fn parse_len(digits: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| MeshKvError::Protocol("non-ascii length".into()))?;
    text.parse::<i64>()
        .map_err(|_| MeshKvError::Protocol(format!("invalid length [{}]", text)))
}

fn unexpected_eof_as_closed(err: std::io::Error) -> MeshKvError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        MeshKvError::Closed
    } else {
        err.into()
    }
}
