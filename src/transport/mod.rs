//! Connection-oriented message transport.
//!
//! The naming protocol runs on top of a small TCP transport offering named logical
//! channels multiplexed over one authenticated connection. A client-side
//! [`Endpoint`] opens [`Connection`]s, each of which can carry several
//! [`Channel`]s; a [`TransportServer`] accepts connections, authenticates them and
//! hands every channel opened by a peer to the [`Service`] registered under the
//! requested name.
//!
//! # Binary Format
//!
//! Every packet exchanged on a connection is a bincode-encoded [`Packet`] using a
//! big-endian, fixed-int configuration, and no packet may exceed [`MAX_FRAME`]
//! bytes. Channel payloads are opaque byte vectors;
//! the framing of naming commands inside them lives in [`protocol`](crate::protocol).
//!
//! # See Also
//!
//! - [`protocol`](crate::protocol): Naming protocol spoken over a channel.
//! - [`client`](crate::client): Caches endpoints and connections built here.
use std::{collections::BTreeMap, fmt, io, str::FromStr, time::Duration};

use bincode::{
    config::{BigEndian, Configuration, Fixint, Limit},
    error::DecodeError,
};
use thiserror::Error;

mod auth;
mod connection;
mod packet;
mod server;

pub use auth::{
    AllowAnonymous, Anonymous, AuthenticationHandler, Authenticator, Credentials,
    PasswordAuthenticator, PasswordRealm,
};
pub use connection::{Channel, Connection, Endpoint, TCP_NODELAY};
pub use packet::{Packet, PacketTransport};
pub use server::{Service, TransportServer};

/// Largest packet, or marshalled value, a peer may send.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Bincode configuration of everything read off the wire.
pub(crate) type WireConfig = Configuration<BigEndian, Fixint, Limit<MAX_FRAME>>;

pub(crate) fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_FRAME>()
}

/// Scheme assumed when a destination does not name one.
pub const DEFAULT_SCHEME: &str = "remote";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode packet: {0}")]
    Serialize(#[from] bincode::error::EncodeError),

    #[error("failed to decode packet: {0}")]
    Deserialize(#[source] DecodeError),

    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),

    #[error("could not resolve '{0}'")]
    Resolve(String),

    #[error("authentication failed using mechanism '{mechanism}': {reason}")]
    Authentication { mechanism: String, reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("channel closed")]
    ChannelClosed,

    #[error("channel '{service}' rejected: {reason}")]
    ChannelRejected { service: String, reason: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no supported protocol version, peer offered {offered:?}")]
    UnsupportedVersion { offered: Vec<u8> },

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Io { inner, .. } => TransportError::Io(inner),
            DecodeError::LimitExceeded => {
                TransportError::protocol(format!("peer sent more than {MAX_FRAME} bytes"))
            }
            e => TransportError::Deserialize(e),
        }
    }
}

impl TransportError {
    /// Credential or mechanism rejection by the peer.
    pub fn is_authentication(&self) -> bool {
        matches!(self, TransportError::Authentication { .. })
    }

    /// Failure to reach a peer at all, as opposed to a misbehaving one.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::Resolve(_)
                | TransportError::ConnectionClosed
                | TransportError::Timeout(..)
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        TransportError::Protocol(message.into())
    }
}

/// String-keyed option map.
///
/// Option maps take part in cache keys, so they are ordered and hashable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OptionMap(BTreeMap<String, String>);

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Returns `self` with every entry of `overrides` applied on top.
    pub fn merged(&self, overrides: &OptionMap) -> OptionMap {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OptionMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Address of a server, written `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: host.into(),
            port,
        }
    }

    /// `host:port` form accepted by socket address resolution.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Parses a comma-separated list of destinations.
    pub fn parse_list(value: &str) -> Result<Vec<Destination>, TransportError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for Destination {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => (scheme, rest),
            Some(_) => return Err(TransportError::Resolve(s.to_string())),
            None => (DEFAULT_SCHEME, s),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| TransportError::Resolve(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse()
            .map_err(|_| TransportError::Resolve(s.to_string()))?;
        if host.is_empty() {
            return Err(TransportError::Resolve(s.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}
