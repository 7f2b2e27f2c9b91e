use std::{
    collections::HashMap,
    io::BufReader,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender},
    },
    thread,
    time::Duration,
};

use log::{debug, trace, warn};

use super::{
    Authenticator, Credentials, Destination, OptionMap, Packet, PacketTransport, TransportError,
    server::Services,
};

/// Connect option toggling `TCP_NODELAY`; enabled unless set to `false`.
pub const TCP_NODELAY: &str = "tcp_nodelay";

enum Slot {
    Opening {
        service: String,
        result: SyncSender<Result<(), TransportError>>,
        inbound: Sender<Vec<u8>>,
    },
    Open(Sender<Vec<u8>>),
}

/// State shared by a connection, its channels and its reader thread.
pub(super) struct Shared {
    peer: String,
    stream: TcpStream,
    writer: Mutex<PacketTransport<TcpStream>>,
    channels: Mutex<HashMap<u32, Slot>>,
    closed: AtomicBool,
}

impl Shared {
    pub(super) fn new(peer: String, stream: TcpStream) -> Result<Arc<Self>, TransportError> {
        let writer = PacketTransport::new(stream.try_clone()?);
        Ok(Arc::new(Self {
            peer,
            stream,
            writer: Mutex::new(writer),
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<u32, Slot>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_packet(packet)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the socket and every channel riding on it.
    pub(super) fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closing connection to {}", self.peer);
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                debug!("failed to shut down socket to {}: {e}", self.peer);
            }
        }
        // dropping the senders wakes up every blocked receiver
        self.channels().clear();
    }
}

/// Reads packets until the stream ends, routing them to channels.
///
/// With `services` set the connection plays the server role and accepts
/// channel-open requests; otherwise it only completes its own requests.
pub(super) fn read_packets(
    shared: &Arc<Shared>,
    mut reader: PacketTransport<BufReader<TcpStream>>,
    services: Option<&Services>,
) {
    loop {
        let packet = match reader.read_packet() {
            Ok(packet) => packet,
            Err(e) => {
                if !shared.is_closed() {
                    debug!("connection to {} ended: {e}", shared.peer);
                }
                break;
            }
        };

        let result = match packet {
            Packet::Message { id, payload } => {
                trace!("{}: {} byte message on channel {id}", shared.peer, payload.len());
                let mut channels = shared.channels();
                match channels.get(&id) {
                    Some(Slot::Open(inbound)) => {
                        if inbound.send(payload).is_err() {
                            channels.remove(&id);
                        }
                    }
                    _ => debug!("dropping message for unknown channel {id}"),
                }
                Ok(())
            }
            Packet::CloseChannel { id } => {
                shared.channels().remove(&id);
                Ok(())
            }
            Packet::ChannelOpened { id } => {
                let mut channels = shared.channels();
                match channels.remove(&id) {
                    Some(Slot::Opening {
                        result, inbound, ..
                    }) => {
                        channels.insert(id, Slot::Open(inbound));
                        let _ = result.send(Ok(()));
                    }
                    Some(slot) => {
                        channels.insert(id, slot);
                    }
                    None => debug!("channel {id} opened after its requester gave up"),
                }
                Ok(())
            }
            Packet::ChannelRejected { id, reason } => {
                if let Some(Slot::Opening {
                    service, result, ..
                }) = shared.channels().remove(&id)
                {
                    let _ = result.send(Err(TransportError::ChannelRejected { service, reason }));
                }
                Ok(())
            }
            Packet::OpenChannel { id, service, .. } => match services {
                Some(services) => open_channel(shared, id, &service, services),
                None => Err(TransportError::protocol("peer tried to open a channel")),
            },
            other => Err(TransportError::protocol(format!(
                "unexpected {} packet",
                other.kind()
            ))),
        };

        if let Err(e) = result {
            warn!("dropping connection to {}: {e}", shared.peer);
            break;
        }
    }

    shared.shutdown();
}

fn open_channel(
    shared: &Arc<Shared>,
    id: u32,
    service: &str,
    services: &Services,
) -> Result<(), TransportError> {
    let Some(handler) = services.get(service) else {
        warn!("{} requested unknown service '{service}'", shared.peer);
        return shared.send(&Packet::ChannelRejected {
            id,
            reason: format!("unknown service '{service}'"),
        });
    };

    let (sender, receiver) = mpsc::channel();
    shared.channels().insert(id, Slot::Open(sender));
    shared.send(&Packet::ChannelOpened { id })?;

    let channel = Channel::new(id, service.to_string(), Arc::clone(shared), receiver);
    let handler = Arc::clone(handler);
    thread::Builder::new()
        .name(format!("channel-{service}-{id}"))
        .spawn(move || handler.serve(channel))?;
    Ok(())
}

/// Logical, bidirectional message stream multiplexed over a [`Connection`].
pub struct Channel {
    id: u32,
    service: String,
    shared: Arc<Shared>,
    inbound: Mutex<Receiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl Channel {
    fn new(id: u32, service: String, shared: Arc<Shared>, inbound: Receiver<Vec<u8>>) -> Self {
        Self {
            id,
            service,
            shared,
            inbound: Mutex::new(inbound),
            closed: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.is_closed()
    }

    /// Sends one whole message.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed);
        }
        self.shared.send(&Packet::Message {
            id: self.id,
            payload,
        })
    }

    /// Blocks until the next message arrives or the channel closes.
    pub fn receive(&self) -> Result<Vec<u8>, TransportError> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv()
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(timeout)
        {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(timeout, "a message")),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ChannelClosed),
        }
    }

    /// Closes the channel. Receivers blocked on it return [`TransportError::ChannelClosed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.channels().remove(&self.id);
        if !self.shared.is_closed() {
            if let Err(e) = self.shared.send(&Packet::CloseChannel { id: self.id }) {
                debug!("failed to notify peer of channel {} closing: {e}", self.id);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Authenticated client connection able to open channels.
pub struct Connection {
    shared: Arc<Shared>,
    next_channel: AtomicU32,
}

impl Connection {
    fn establish(
        stream: TcpStream,
        peer: String,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Arc<Self>, TransportError> {
        stream.set_read_timeout(Some(timeout))?;
        let mut reader = PacketTransport::new(BufReader::new(stream.try_clone()?));
        let shared = Shared::new(peer, stream)?;

        let mechanism = credentials.mechanism.clone();
        shared.send(&Packet::Authenticate {
            mechanism: credentials.mechanism,
            principal: credentials.principal,
            secret: credentials.secret,
            realm: credentials.realm,
        })?;

        let reply = reader.read_packet().map_err(|e| match e {
            TransportError::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                TransportError::Timeout(timeout, "authentication")
            }
            other => other,
        });
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                shared.shutdown();
                return Err(e);
            }
        };
        match reply {
            Packet::Authenticated => {}
            Packet::Rejected { reason } => {
                shared.shutdown();
                return Err(TransportError::Authentication { mechanism, reason });
            }
            other => {
                shared.shutdown();
                return Err(TransportError::protocol(format!(
                    "expected authentication outcome, got {} packet",
                    other.kind()
                )));
            }
        }
        shared.stream.set_read_timeout(None)?;

        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("connection-{}", shared.peer))
            .spawn(move || read_packets(&reader_shared, reader, None))?;

        Ok(Arc::new(Self {
            shared,
            next_channel: AtomicU32::new(1),
        }))
    }

    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Opens a channel to the service registered under `service` on the peer.
    pub fn open_channel(
        &self,
        service: &str,
        options: &OptionMap,
        timeout: Duration,
    ) -> Result<Channel, TransportError> {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        let (result, opened) = mpsc::sync_channel(1);
        let (inbound, receiver) = mpsc::channel();
        self.shared.channels().insert(
            id,
            Slot::Opening {
                service: service.to_string(),
                result,
                inbound,
            },
        );

        self.shared.send(&Packet::OpenChannel {
            id,
            service: service.to_string(),
            options: options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })?;

        match opened.recv_timeout(timeout) {
            Ok(Ok(())) => {
                debug!("opened channel '{service}' ({id}) to {}", self.shared.peer);
                Ok(Channel::new(
                    id,
                    service.to_string(),
                    Arc::clone(&self.shared),
                    receiver,
                ))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => {
                self.shared.channels().remove(&id);
                let _ = self.shared.send(&Packet::CloseChannel { id });
                Err(TransportError::Timeout(timeout, "channel open"))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ConnectionClosed),
        }
    }

    pub fn close(&self) {
        self.shared.shutdown();
    }

    pub fn close_async(&self) {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || shared.shutdown());
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Client-side factory of connections.
pub struct Endpoint {
    name: String,
    options: OptionMap,
    connections: Mutex<Vec<Weak<Connection>>>,
    closed: AtomicBool,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, options: OptionMap) -> Self {
        let name = name.into();
        debug!("created endpoint '{name}'");
        Self {
            name,
            options,
            connections: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Connects to `destination` and authenticates, all within `timeout`.
    pub fn connect(
        &self,
        destination: &Destination,
        options: &OptionMap,
        authenticator: &dyn Authenticator,
        timeout: Duration,
    ) -> Result<Arc<Connection>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let addresses = destination
            .authority()
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(destination.to_string()))?;

        let mut last_error = None;
        let mut stream = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err(e.into()),
            (None, None) => return Err(TransportError::Resolve(destination.to_string())),
        };
        stream.set_nodelay(options.get_bool(TCP_NODELAY).unwrap_or(true))?;

        let connection = Connection::establish(
            stream,
            destination.to_string(),
            authenticator.credentials(),
            timeout,
        )?;
        debug!("endpoint '{}' connected to {destination}", self.name);

        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connections.retain(|c| c.strong_count() > 0);
        connections.push(Arc::downgrade(&connection));
        Ok(connection)
    }

    /// Closes the endpoint along with every connection it opened.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing endpoint '{}'", self.name);
        let connections = std::mem::take(
            &mut *self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for connection in connections.iter().filter_map(Weak::upgrade) {
            connection.close();
        }
    }
}
