//! Naming protocol spoken over a transport channel.
//!
//! Once a channel to the `naming` service is open, the server announces the
//! protocol versions it speaks and the client answers with the one it picked.
//! From then on each message on the channel is one frame:
//!
//! ```text
//! [command: u8][correlation id: i32 BE][payload...]
//! ```
//!
//! A response echoes the command and correlation id of its request, followed
//! by an outcome byte and the tagged result values (see [`codec`]).
//!
//! # Key Components
//!
//! - [`Command`]: the table of supported operations and their handlers.
//! - [`RemoteStore`]: client proxy multiplexing requests over one channel.
//! - [`NamingService`]: server side dispatcher running commands against a
//!   [`Directory`](crate::directory::Directory).
pub mod codec;
mod command;
mod correlation;
mod server;
mod store;
mod thread;

use std::time::Duration;

use log::debug;

use crate::transport::{Channel, TransportError};

pub use command::{Command, CommandEntry, Param, Reply};
pub use correlation::{CorrelationTable, Reservation};
pub use server::{NamingService, dispatch};
pub use store::RemoteStore;
pub use thread::ThreadPool;

/// Name of the transport service carrying the protocol.
pub const SERVICE_NAME: &str = "naming";

/// Leading bytes of both handshake messages.
pub const MAGIC: &[u8; 6] = b"naming";

pub const VERSION_ONE: u8 = 0x01;

/// Versions this build speaks, lowest first.
pub const SUPPORTED_VERSIONS: &[u8] = &[VERSION_ONE];

/// How long either side waits for the other's handshake message.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for the response to a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Encodes the server greeting: magic, version count, versions.
pub fn encode_greeting(versions: &[u8]) -> Result<Vec<u8>, TransportError> {
    let count = u8::try_from(versions.len())
        .map_err(|_| TransportError::protocol("too many protocol versions"))?;
    let mut buf = Vec::with_capacity(MAGIC.len() + 1 + versions.len());
    buf.extend_from_slice(MAGIC);
    buf.push(count);
    buf.extend_from_slice(versions);
    Ok(buf)
}

/// Decodes a server greeting into the offered versions.
pub fn decode_greeting(bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
    let rest = strip_magic(bytes)?;
    let Some((&count, versions)) = rest.split_first() else {
        return Err(TransportError::protocol("truncated greeting"));
    };
    versions
        .get(..usize::from(count))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| TransportError::protocol("truncated greeting"))
}

/// Highest offered version this build also speaks.
pub fn choose_version(offered: &[u8]) -> Option<u8> {
    offered
        .iter()
        .copied()
        .filter(|v| SUPPORTED_VERSIONS.contains(v))
        .max()
}

pub fn encode_choice(version: u8) -> Vec<u8> {
    let mut buf = MAGIC.to_vec();
    buf.push(version);
    buf
}

pub fn decode_choice(bytes: &[u8]) -> Result<u8, TransportError> {
    match strip_magic(bytes)? {
        [version] => Ok(*version),
        _ => Err(TransportError::protocol("malformed version choice")),
    }
}

fn strip_magic(bytes: &[u8]) -> Result<&[u8], TransportError> {
    bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| TransportError::protocol("invalid protocol header"))
}

/// Server half of the handshake. Returns the version the client picked.
pub fn server_handshake(channel: &Channel) -> Result<u8, TransportError> {
    channel.send(encode_greeting(SUPPORTED_VERSIONS)?)?;
    let version = decode_choice(&channel.receive_timeout(HANDSHAKE_TIMEOUT)?)?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(TransportError::UnsupportedVersion {
            offered: vec![version],
        });
    }
    debug!("{} selected protocol version {version:#04x}", channel.peer());
    Ok(version)
}

/// Client half of the handshake. Returns the negotiated version.
pub fn client_handshake(channel: &Channel, timeout: Duration) -> Result<u8, TransportError> {
    let offered = decode_greeting(&channel.receive_timeout(timeout)?)?;
    let Some(version) = choose_version(&offered) else {
        return Err(TransportError::UnsupportedVersion { offered });
    };
    channel.send(encode_choice(version))?;
    debug!("negotiated protocol version {version:#04x} with {}", channel.peer());
    Ok(version)
}
