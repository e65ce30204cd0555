use crate::{MeshKvError, Result};

/// Size of the fixed container header: revision (8) + deleted_at (8) +
/// key length (2) + two reserved bytes kept for layout stability.
const HEADER_SIZE: usize = 20;

/// The versioned record stored per key.
///
/// A container is either live (`deleted_at == None`) or a tombstone
/// (`deleted_at == Some(t)`, empty value). The revision advances by one on
/// every local transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub revision: u64,
    pub deleted_at: Option<u64>,
}

impl Container {
    /// Creates a live container at revision zero.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Container { key, value, revision: 0, deleted_at: None }
    }

    /// Turns the container into a tombstone, dropping its value.
    pub fn delete(&mut self, now: u64) {
        self.value.clear();
        self.deleted_at = Some(now);
    }

    /// Clears the tombstone marker.
    pub fn undelete(&mut self) {
        self.deleted_at = None;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Encodes the container into its big-endian wire layout:
    /// revision (8), deleted_at (8, 0 = none), key length (2), key, value.
    pub fn encode(&self) -> Vec<u8> {
        let key_length = self.key.len().min(crate::MAX_KEY_SIZE) as u16;
        let mut buffer = Vec::with_capacity(HEADER_SIZE + key_length as usize + self.value.len());
        buffer.extend_from_slice(&self.revision.to_be_bytes());
        buffer.extend_from_slice(&self.deleted_at.unwrap_or(0).to_be_bytes());
        buffer.extend_from_slice(&key_length.to_be_bytes());
        buffer.extend_from_slice(&[0u8; 2]);
        buffer.extend_from_slice(&self.key[..key_length as usize]);
        buffer.extend_from_slice(&self.value);
        buffer
    }

    /// Decodes a container from its wire layout. Fails with `ShortFrame`
    /// if the frame is under 20 bytes or the key is truncated.
    pub fn decode(data: &[u8]) -> Result<Container> {
        if data.len() < HEADER_SIZE {
            return Err(MeshKvError::ShortFrame { needed: HEADER_SIZE, got: data.len() });
        }
        let revision = u64::from_be_bytes(data[..8].try_into().expect("8-byte slice"));
        let deleted_at_raw = u64::from_be_bytes(data[8..16].try_into().expect("8-byte slice"));
        let key_length = u16::from_be_bytes(data[16..18].try_into().expect("2-byte slice")) as usize;
        if data.len() < HEADER_SIZE + key_length {
            return Err(MeshKvError::ShortFrame { needed: HEADER_SIZE + key_length, got: data.len() });
        }
        Ok(Container {
            key: data[HEADER_SIZE..HEADER_SIZE + key_length].to_vec(),
            value: data[HEADER_SIZE + key_length..].to_vec(),
            revision,
            deleted_at: if deleted_at_raw == 0 { None } else { Some(deleted_at_raw) },
        })
    }
}
