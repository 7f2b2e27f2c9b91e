use std::{
    collections::HashMap,
    io::{self, BufReader},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info, warn};

use super::{
    AuthenticationHandler, Channel, Credentials, Packet, PacketTransport, TransportError,
    connection::{Shared, read_packets},
};

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const AUTHENTICATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles the channels peers open under a service name.
pub trait Service: Send + Sync {
    /// Runs on a dedicated thread for as long as the channel is in use.
    fn serve(&self, channel: Channel);
}

pub(super) type Services = HashMap<String, Arc<dyn Service>>;

type Live = Arc<Mutex<Vec<Arc<Shared>>>>;

/// Accepts authenticated connections and routes their channels to services.
pub struct TransportServer {
    address: SocketAddr,
    shutdown: Arc<AtomicBool>,
    connections: Live,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl TransportServer {
    /// Binds `address` and starts accepting connections in the background.
    pub fn bind(
        address: SocketAddr,
        handler: Arc<dyn AuthenticationHandler>,
        services: HashMap<String, Arc<dyn Service>>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;
        info!("listening at {address}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let connections: Live = Arc::default();
        let services = Arc::new(services);

        let acceptor = {
            let shutdown = Arc::clone(&shutdown);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name(format!("acceptor-{address}"))
                .spawn(move || accept(listener, handler, services, shutdown, connections))?
        };

        Ok(Self {
            address,
            shutdown,
            connections,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Stops accepting and drops every live connection.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down server at {}", self.address);
        self.join_acceptor();

        let live = std::mem::take(
            &mut *self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for connection in live {
            connection.shutdown();
        }
    }

    /// Blocks until the server is closed.
    pub fn wait(&self) {
        self.join_acceptor();
    }

    fn join_acceptor(&self) {
        let acceptor = self
            .acceptor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(acceptor) = acceptor {
            if acceptor.join().is_err() {
                warn!("acceptor thread of {} panicked", self.address);
            }
        }
    }
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept(
    listener: TcpListener,
    handler: Arc<dyn AuthenticationHandler>,
    services: Arc<Services>,
    shutdown: Arc<AtomicBool>,
    connections: Live,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let handler = Arc::clone(&handler);
                let services = Arc::clone(&services);
                let connections = Arc::clone(&connections);
                let spawned = thread::Builder::new()
                    .name(format!("peer-{peer}"))
                    .spawn(move || {
                        if let Err(e) =
                            handle_connection(stream, peer, handler.as_ref(), &services, connections)
                        {
                            warn!("connection from {peer} failed: {e}");
                        }
                    });
                if let Err(e) = spawned {
                    warn!("could not spawn handler for {peer}: {e}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => warn!("broken connection: {e:?}"),
        }
    }
    debug!("acceptor stopped");
}

fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &dyn AuthenticationHandler,
    services: &Services,
    connections: Live,
) -> Result<(), TransportError> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(AUTHENTICATION_TIMEOUT))?;

    let mut reader = PacketTransport::new(BufReader::new(stream.try_clone()?));
    let mut writer = PacketTransport::new(stream.try_clone()?);

    let credentials = match reader.read_packet()? {
        Packet::Authenticate {
            mechanism,
            principal,
            secret,
            realm,
        } => Credentials {
            mechanism,
            principal,
            secret,
            realm,
        },
        other => {
            return Err(TransportError::protocol(format!(
                "expected authentication, got {} packet",
                other.kind()
            )));
        }
    };

    match handler.authenticate(&credentials) {
        Ok(principal) => {
            debug!("{peer} authenticated as '{principal}'");
            writer.write_packet(&Packet::Authenticated)?;
        }
        Err(reason) => {
            info!("rejected {peer}: {reason}");
            writer.write_packet(&Packet::Rejected { reason })?;
            return Ok(());
        }
    }
    stream.set_read_timeout(None)?;

    let shared = Shared::new(peer.to_string(), stream)?;
    connections
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Arc::clone(&shared));

    read_packets(&shared, reader, Some(services));

    connections
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|c| !Arc::ptr_eq(c, &shared));
    Ok(())
}
