use std::net::SocketAddr;
use url::Url;

use crate::{MeshKvError, Result};

/// Parses a node URL of the form `tcp://<host>:<port>` into its host and
/// port parts.
pub fn parse_url(input: &str) -> Result<(String, u16)> {
    let url = Url::parse(input).map_err(|err| MeshKvError::Parse(format!("url [{}]: {}", input, err)))?;
    if url.scheme() != "tcp" {
        return Err(MeshKvError::Parse(format!("unsupported scheme [{}]", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| MeshKvError::Parse(format!("url [{}] has no host", input)))?
        .to_string();
    let port = url
        .port()
        .ok_or_else(|| MeshKvError::Parse(format!("url [{}] has no port", input)))?;
    Ok((host, port))
}

/// Formats a bound socket address back into a node URL.
pub fn url_for(addr: SocketAddr) -> String {
    format!("tcp://{}", addr)
}
