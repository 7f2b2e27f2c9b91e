use std::{
    fmt,
    io::{Read, Write},
};

use bincode::{Decode, Encode, decode_from_std_read, encode_to_vec};

use super::{MAX_FRAME, TransportError, WireConfig, wire_config};

/// Unit of exchange on a transport connection.
///
/// The `Debug` output never includes the authentication secret.
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub enum Packet {
    /// First packet of every connection, sent by the client.
    Authenticate {
        mechanism: String,
        principal: String,
        secret: String,
        realm: String,
    },
    Authenticated,
    Rejected {
        reason: String,
    },
    OpenChannel {
        id: u32,
        service: String,
        options: Vec<(String, String)>,
    },
    ChannelOpened {
        id: u32,
    },
    ChannelRejected {
        id: u32,
        reason: String,
    },
    Message {
        id: u32,
        payload: Vec<u8>,
    },
    CloseChannel {
        id: u32,
    },
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Authenticate { .. } => "authenticate",
            Packet::Authenticated => "authenticated",
            Packet::Rejected { .. } => "rejected",
            Packet::OpenChannel { .. } => "open channel",
            Packet::ChannelOpened { .. } => "channel opened",
            Packet::ChannelRejected { .. } => "channel rejected",
            Packet::Message { .. } => "message",
            Packet::CloseChannel { .. } => "close channel",
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Authenticate {
                mechanism,
                principal,
                realm,
                ..
            } => f
                .debug_struct("Authenticate")
                .field("mechanism", mechanism)
                .field("principal", principal)
                .field("realm", realm)
                .finish_non_exhaustive(),
            Packet::Authenticated => f.write_str("Authenticated"),
            Packet::Rejected { reason } => {
                f.debug_struct("Rejected").field("reason", reason).finish()
            }
            Packet::OpenChannel {
                id,
                service,
                options,
            } => f
                .debug_struct("OpenChannel")
                .field("id", id)
                .field("service", service)
                .field("options", options)
                .finish(),
            Packet::ChannelOpened { id } => f.debug_struct("ChannelOpened").field("id", id).finish(),
            Packet::ChannelRejected { id, reason } => f
                .debug_struct("ChannelRejected")
                .field("id", id)
                .field("reason", reason)
                .finish(),
            Packet::Message { id, payload } => f
                .debug_struct("Message")
                .field("id", id)
                .field("len", &payload.len())
                .finish(),
            Packet::CloseChannel { id } => f.debug_struct("CloseChannel").field("id", id).finish(),
        }
    }
}

/// Reads and writes [`Packet`]s over a byte stream.
pub struct PacketTransport<T> {
    stream: T,
    config: WireConfig,
}

impl<T> PacketTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            config: wire_config(),
        }
    }
}

impl<T: Write> PacketTransport<T> {
    /// Writes the packet with a single write so that concurrent writers sharing
    /// the stream through a lock never interleave.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = encode_to_vec(packet, self.config)?;
        if bytes.len() > MAX_FRAME {
            return Err(TransportError::protocol(format!(
                "packet of {} bytes exceeds {MAX_FRAME}",
                bytes.len()
            )));
        }
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<T: Read> PacketTransport<T> {
    /// Reads the next packet. A packet larger than [`MAX_FRAME`] is a
    /// protocol error and leaves the stream unusable.
    pub fn read_packet(&mut self) -> Result<Packet, TransportError> {
        Ok(decode_from_std_read(&mut self.stream, self.config)?)
    }
}
