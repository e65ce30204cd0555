use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use meshkv_common::{KeyHash, MeshKvError, Result};

use crate::state::{Prefix, StateSet, StateToken, STATE_TOKEN_BITS, STATE_TOKEN_SIZE};

/// Upper bound on a single protocol message.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// One message of the set-difference protocol. The active side drives the
/// exchange; the passive side only ever answers.
#[derive(Debug, Serialize, Deserialize)]
enum Message {
    /// Asks for the fingerprint of the subtree under a path.
    NodeQuery { prefix: Prefix },
    /// Count and ZZ_p digest of the queried subtree.
    NodeInfo { count: u64, digest: Vec<u8> },
    /// Asks for every token under a path.
    ElementsQuery { prefix: Prefix },
    /// The queried tokens.
    Elements { tokens: Vec<[u8; STATE_TOKEN_SIZE]> },
    /// The active side is finished; both sides close the transport.
    Done,
}

/// Drives the active side of the reconciliation protocol against the
/// provided view of the local state set.
///
/// Walks the prefix tree top-down: equal subtree fingerprints prune,
/// subtrees whose combined count fits `max_batch` exchange their full
/// token lists, larger differing subtrees recurse into both children.
///
/// Returns the key hashes present remotely but absent locally (or present
/// locally under a different revision), and the key hashes only the local
/// side has. Fingerprint collisions may produce spurious hashes; fetching
/// and applying them is idempotent, so callers treat the lists as hints.
///
/// The transport is consumed exclusively until this returns; the caller
/// must close it afterwards.
pub async fn initiate<T>(
    transport: &mut T,
    view: &StateSet,
    max_batch: usize,
) -> Result<(Vec<KeyHash>, Vec<KeyHash>)>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut queue = vec![Prefix::root()];
    let mut missing = BTreeSet::new();
    let mut extra = BTreeSet::new();

    while let Some(prefix) = queue.pop() {
        let (local_count, local_sum) = view.node_info(&prefix);

        write_message(transport, &Message::NodeQuery { prefix: prefix.clone() }).await?;
        let (remote_count, remote_digest) = match read_message(transport).await? {
            Message::NodeInfo { count, digest } => (count, digest),
            other => return Err(unexpected(&other)),
        };

        if remote_count == local_count && remote_digest == local_sum.to_bytes() {
            continue;
        }

        if remote_count as usize + local_count as usize <= max_batch {
            write_message(transport, &Message::ElementsQuery { prefix: prefix.clone() }).await?;
            let tokens = match read_message(transport).await? {
                Message::Elements { tokens } => tokens,
                other => return Err(unexpected(&other)),
            };

            let remote: BTreeSet<_> = tokens.into_iter().map(StateToken::from_bytes).collect();
            let local: BTreeSet<_> = view.items_under(&prefix).into_iter().collect();
            for token in remote.difference(&local) {
                missing.insert(token.key_hash());
            }
            for token in local.difference(&remote) {
                extra.insert(token.key_hash());
            }
        } else if prefix.len() < STATE_TOKEN_BITS {
            queue.push(prefix.child(0));
            queue.push(prefix.child(1));
        }
    }

    write_message(transport, &Message::Done).await?;
    Ok((missing.into_iter().collect(), extra.into_iter().collect()))
}

/// Serves the passive side of the reconciliation protocol against the
/// provided view, answering queries until the active side is done.
pub async fn accept<T>(transport: &mut T, view: &StateSet) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match read_message(transport).await? {
            Message::NodeQuery { prefix } => {
                let (count, sum) = view.node_info(&prefix);
                write_message(transport, &Message::NodeInfo { count, digest: sum.to_bytes() }).await?;
            }
            Message::ElementsQuery { prefix } => {
                let tokens = view
                    .items_under(&prefix)
                    .into_iter()
                    .map(|token| *token.as_bytes())
                    .collect();
                write_message(transport, &Message::Elements { tokens }).await?;
            }
            Message::Done => return Ok(()),
            other => return Err(unexpected(&other)),
        }
    }
}

fn unexpected(message: &Message) -> MeshKvError {
    MeshKvError::Reconcile(format!("unexpected message {:?}", message))
}

async fn write_message<T>(transport: &mut T, message: &Message) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(message).map_err(|err| MeshKvError::Reconcile(err.to_string()))?;
    transport.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    transport.write_all(&payload).await?;
    transport.flush().await?;
    Ok(())
}

async fn read_message<T>(transport: &mut T) -> Result<Message>
where
    T: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    transport.read_exact(&mut header).await.map_err(eof_as_closed)?;
    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_MESSAGE_LEN {
        return Err(MeshKvError::Reconcile(format!("oversized message [{} bytes]", length)));
    }
    let mut payload = vec![0u8; length];
    transport.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    bincode::deserialize(&payload).map_err(|err| MeshKvError::Reconcile(err.to_string()))
}

fn eof_as_closed(err: std::io::Error) -> MeshKvError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        MeshKvError::Closed
    } else {
        err.into()
    }
}
