use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use rand::Rng;

use crate::{
    directory::{Binding, Entry, Name, NameClassPair, Object},
    error::Error,
    transport::{Authenticator, Destination, OptionMap, TransportError},
};

use super::{Closeable, DirectoryStore, RemoteContext};

/// Everything needed to reach one server.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub destination: Destination,
    pub connect_options: OptionMap,
    pub authenticator: Arc<dyn Authenticator>,
    pub connect_timeout: Duration,
    pub channel_options: OptionMap,
    pub channel_timeout: Duration,
}

impl ConnectionDescriptor {
    fn identity(&self) -> (&Destination, &OptionMap, String, Duration, &OptionMap, Duration) {
        (
            &self.destination,
            &self.connect_options,
            self.authenticator.identity(),
            self.connect_timeout,
            &self.channel_options,
            self.channel_timeout,
        )
    }
}

impl PartialEq for ConnectionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ConnectionDescriptor {}

impl Hash for ConnectionDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("destination", &self.destination)
            .field("authenticator", &self.authenticator.identity())
            .field("connect_timeout", &self.connect_timeout)
            .field("channel_timeout", &self.channel_timeout)
            .finish_non_exhaustive()
    }
}

/// A live store on one server, plus whatever keeps it connected.
pub struct Session {
    pub store: Arc<dyn DirectoryStore>,
    pub connection: Option<Arc<dyn Closeable>>,
}

impl Session {
    fn close(self) {
        if let Err(e) = self.store.close() {
            debug!("failed to close naming store: {e}");
        }
        if let Some(connection) = self.connection {
            connection.close_async();
        }
    }
}

/// Opens sessions to single servers.
pub trait Connector: Send + Sync {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Session, TransportError>;

    /// Called once when the store using this connector is closed.
    fn close(&self) {}
}

/// Notified of every session the store opens.
pub trait ConnectionObserver: Send + Sync {
    fn connected(&self, descriptor: &ConnectionDescriptor, session: &Session);
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {
    fn connected(&self, _: &ConnectionDescriptor, _: &Session) {}
}

struct Current {
    session: Session,
    index: usize,
    epoch: u64,
}

struct Group {
    cursor: usize,
    epoch: u64,
    current: Option<Current>,
}

/// The store in use together with the failover generation it belongs to.
struct Active {
    store: Arc<dyn DirectoryStore>,
    epoch: u64,
    index: usize,
}

/// Store failing over between several servers.
///
/// Only one server is in use at a time. A request failing at the transport
/// level makes the store move on to the next server that accepts a
/// connection, scanning the list at most once, and retries the request
/// there once. Failover is single flight: callers that saw the same server
/// fail share the one replacement.
pub struct HaStore {
    servers: Vec<ConnectionDescriptor>,
    connector: Box<dyn Connector>,
    observer: Arc<dyn ConnectionObserver>,
    group: Mutex<Group>,
    closed: AtomicBool,
    this: Weak<HaStore>,
}

impl HaStore {
    pub fn new(
        servers: Vec<ConnectionDescriptor>,
        connector: Box<dyn Connector>,
        random_server: bool,
    ) -> Result<Arc<Self>, Error> {
        Self::with_observer(servers, connector, random_server, Arc::new(NoopObserver))
    }

    /// With `random_server` the first server tried is picked at random,
    /// otherwise servers are tried in the order given.
    pub fn with_observer(
        servers: Vec<ConnectionDescriptor>,
        connector: Box<dyn Connector>,
        random_server: bool,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>, Error> {
        if servers.is_empty() {
            return Err(Error::Config("at least one server is required".into()));
        }
        let cursor = if random_server {
            rand::rng().random_range(0..servers.len())
        } else {
            0
        };
        Ok(Arc::new_cyclic(|this| Self {
            servers,
            connector,
            observer,
            group: Mutex::new(Group {
                cursor,
                epoch: 0,
                current: None,
            }),
            closed: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    fn group(&self) -> MutexGuard<'_, Group> {
        self.group.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn servers(&self) -> &[ConnectionDescriptor] {
        &self.servers
    }

    /// Server currently in use, if connected.
    pub fn active_server(&self) -> Option<&Destination> {
        let index = self.group().current.as_ref()?.index;
        Some(&self.servers[index].destination)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn current_or_connect(&self) -> Result<Active, Error> {
        self.ensure_open()?;
        let mut group = self.group();
        if let Some(current) = &group.current {
            return Ok(Active {
                store: Arc::clone(&current.session.store),
                epoch: current.epoch,
                index: current.index,
            });
        }
        self.failover(&mut group, None)
    }

    /// Replaces the store of generation `failed`, unless another caller
    /// already did.
    fn failover(&self, group: &mut Group, failed: Option<u64>) -> Result<Active, Error> {
        self.ensure_open()?;
        if let Some(current) = &group.current {
            if Some(current.epoch) != failed {
                return Ok(Active {
                    store: Arc::clone(&current.session.store),
                    epoch: current.epoch,
                    index: current.index,
                });
            }
        }
        if let Some(stale) = group.current.take() {
            stale.session.close();
        }

        let count = self.servers.len();
        let mut attempts = Vec::new();
        let mut cause: Option<TransportError> = None;
        for _ in 0..count {
            let index = group.cursor;
            group.cursor = (index + 1) % count;
            let descriptor = &self.servers[index];

            match self.connector.connect(descriptor) {
                Ok(session) => {
                    group.epoch += 1;
                    info!("using naming server {}", descriptor.destination);
                    self.observer.connected(descriptor, &session);
                    let store = Arc::clone(&session.store);
                    group.current = Some(Current {
                        session,
                        index,
                        epoch: group.epoch,
                    });
                    return Ok(Active {
                        store,
                        epoch: group.epoch,
                        index,
                    });
                }
                Err(e) => {
                    debug!("failed to connect to {}: {e}", descriptor.destination);
                    attempts.push(format!("{} ({e})", descriptor.destination));
                    // an authentication failure explains the outcome better
                    // than any connectivity problem
                    if e.is_authentication() || (cause.is_none() && e.is_connectivity()) {
                        cause = Some(e);
                    }
                }
            }
        }

        warn!("failed to connect to any naming server: {}", attempts.join(", "));
        match cause {
            Some(e) if e.is_authentication() => Err(Error::Authentication {
                attempts,
                cause: Some(e),
            }),
            cause => Err(Error::Communication { attempts, cause }),
        }
    }

    /// Runs `op` on the current store, failing over and retrying once if it
    /// fails at the transport level.
    ///
    /// A store closed underneath the request by a concurrent failover counts
    /// as a transport failure; closing this store does not.
    fn run<T>(&self, op: impl Fn(&dyn DirectoryStore) -> Result<T, Error>) -> Result<T, Error> {
        let active = self.current_or_connect()?;
        match op(active.store.as_ref()) {
            Err(e) if e.is_transport() || (matches!(e, Error::Closed) && !self.is_closed()) => {
                debug!(
                    "naming request to {} failed: {e}",
                    self.servers[active.index].destination
                );
                let retry = self.failover(&mut self.group(), Some(active.epoch))?;
                op(retry.store.as_ref()).map_err(|e| match e {
                    Error::Transport(cause) => Error::Communication {
                        attempts: vec![format!(
                            "{} ({cause})",
                            self.servers[retry.index].destination
                        )],
                        cause: Some(cause),
                    },
                    other => other,
                })
            }
            result => result,
        }
    }

    /// Points a context from an underlying store back at this one.
    fn adopt(&self, context: RemoteContext) -> Result<RemoteContext, Error> {
        let this: Arc<dyn DirectoryStore> = self.this.upgrade().ok_or(Error::Closed)?;
        Ok(context.with_store(this))
    }

    fn adopt_entry(&self, entry: Entry<RemoteContext>) -> Result<Entry<RemoteContext>, Error> {
        match entry {
            Entry::Object(object) => Ok(Entry::Object(object)),
            Entry::Context(context) => Ok(Entry::Context(self.adopt(context)?)),
        }
    }
}

impl Closeable for HaStore {
    fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("closing naming store");
        if let Some(current) = self.group().current.take() {
            current.session.close();
        }
        self.connector.close();
        Ok(())
    }

    fn close_async(&self) {
        match self.this.upgrade() {
            Some(store) => {
                thread::spawn(move || store.close());
            }
            None => {
                let _ = self.close();
            }
        }
    }
}

impl DirectoryStore for HaStore {
    fn lookup(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
        let entry = self.run(|store| store.lookup(name))?;
        self.adopt_entry(entry)
    }

    fn bind(&self, name: &Name, object: &Object) -> Result<(), Error> {
        self.run(|store| store.bind(name, object))
    }

    fn rebind(&self, name: &Name, object: &Object) -> Result<(), Error> {
        self.run(|store| store.rebind(name, object))
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, Error> {
        self.run(|store| store.list(name))
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding<Entry<RemoteContext>>>, Error> {
        self.run(|store| store.list_bindings(name))?
            .into_iter()
            .map(|binding| {
                Ok(Binding {
                    name: binding.name,
                    class_name: binding.class_name,
                    value: self.adopt_entry(binding.value)?,
                })
            })
            .collect()
    }

    fn unbind(&self, name: &Name) -> Result<(), Error> {
        self.run(|store| store.unbind(name))
    }

    fn rename(&self, name: &Name, new_name: &Name) -> Result<(), Error> {
        self.run(|store| store.rename(name, new_name))
    }

    fn create_subcontext(&self, name: &Name) -> Result<RemoteContext, Error> {
        let context = self.run(|store| store.create_subcontext(name))?;
        self.adopt(context)
    }

    fn destroy_subcontext(&self, name: &Name) -> Result<(), Error> {
        self.run(|store| store.destroy_subcontext(name))
    }

    fn lookup_link(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
        let entry = self.run(|store| store.lookup_link(name))?;
        self.adopt_entry(entry)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        io,
        sync::{
            Barrier,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::{directory::NamingError, transport::Anonymous};

    /// Stands in for a server: answers lookups with its own index until it
    /// goes down.
    struct FakeServer {
        index: usize,
        down: Arc<AtomicBool>,
        closed: AtomicBool,
    }

    impl Closeable for FakeServer {
        fn close(&self) -> Result<(), Error> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    impl FakeServer {
        fn check(&self) -> Result<(), Error> {
            if self.closed.load(Ordering::SeqCst) {
                Err(Error::Closed)
            } else if self.down.load(Ordering::SeqCst) {
                Err(TransportError::ConnectionClosed.into())
            } else {
                Ok(())
            }
        }
    }

    impl DirectoryStore for FakeServer {
        fn lookup(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
            self.check()?;
            match name.last() {
                Some("missing") => Err(NamingError::not_found(name).into()),
                Some("ctx") => Ok(Entry::Context(RemoteContext::new(
                    name.clone(),
                    Arc::new(FakeServer {
                        index: self.index,
                        down: Arc::clone(&self.down),
                        closed: AtomicBool::new(false),
                    }),
                ))),
                _ => Ok(Entry::Object(Object::Integer(self.index as i64))),
            }
        }
        fn bind(&self, _: &Name, _: &Object) -> Result<(), Error> {
            self.check()
        }
        fn rebind(&self, _: &Name, _: &Object) -> Result<(), Error> {
            self.check()
        }
        fn list(&self, _: &Name) -> Result<Vec<NameClassPair>, Error> {
            self.check().map(|_| Vec::new())
        }
        fn list_bindings(&self, _: &Name) -> Result<Vec<Binding<Entry<RemoteContext>>>, Error> {
            self.check().map(|_| Vec::new())
        }
        fn unbind(&self, _: &Name) -> Result<(), Error> {
            self.check()
        }
        fn rename(&self, _: &Name, _: &Name) -> Result<(), Error> {
            self.check()
        }
        fn create_subcontext(&self, name: &Name) -> Result<RemoteContext, Error> {
            self.check()?;
            Err(NamingError::not_found(name).into())
        }
        fn destroy_subcontext(&self, _: &Name) -> Result<(), Error> {
            self.check()
        }
        fn lookup_link(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
            self.lookup(name)
        }
    }

    #[derive(Clone, Copy)]
    enum Refusal {
        Connect,
        Auth,
    }

    /// Connects by destination port; a port listed in `refuse` fails.
    #[derive(Default)]
    struct FakeConnector {
        down: HashMap<u16, Arc<AtomicBool>>,
        refuse: Mutex<HashMap<u16, Refusal>>,
        connects: AtomicUsize,
        tried: Mutex<Vec<u16>>,
    }

    impl FakeConnector {
        fn new(ports: &[u16]) -> Arc<Self> {
            Arc::new(Self {
                down: ports
                    .iter()
                    .map(|p| (*p, Arc::new(AtomicBool::new(false))))
                    .collect(),
                ..Default::default()
            })
        }

        fn refuse(&self, port: u16, refusal: Refusal) {
            self.refuse.lock().unwrap().insert(port, refusal);
        }

        fn take_down(&self, port: u16) {
            self.down[&port].store(true, Ordering::SeqCst);
            self.refuse(port, Refusal::Connect);
        }
    }

    impl Connector for Arc<FakeConnector> {
        fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Session, TransportError> {
            let port = descriptor.destination.port;
            self.tried.lock().unwrap().push(port);
            match self.refuse.lock().unwrap().get(&port) {
                Some(Refusal::Connect) => {
                    return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
                }
                Some(Refusal::Auth) => {
                    return Err(TransportError::Authentication {
                        mechanism: "PLAIN".into(),
                        reason: "bad password".into(),
                    });
                }
                None => {}
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Session {
                store: Arc::new(FakeServer {
                    index: usize::from(port),
                    down: Arc::clone(&self.down[&port]),
                    closed: AtomicBool::new(false),
                }),
                connection: None,
            })
        }
    }

    fn descriptor(port: u16) -> ConnectionDescriptor {
        ConnectionDescriptor {
            destination: Destination::new("localhost", port),
            connect_options: OptionMap::new(),
            authenticator: Arc::new(Anonymous),
            connect_timeout: Duration::from_secs(1),
            channel_options: OptionMap::new(),
            channel_timeout: Duration::from_secs(1),
        }
    }

    fn store(ports: &[u16], connector: &Arc<FakeConnector>) -> Arc<HaStore> {
        HaStore::new(
            ports.iter().copied().map(descriptor).collect(),
            Box::new(Arc::clone(connector)),
            false,
        )
        .unwrap()
    }

    fn served_by(store: &HaStore) -> i64 {
        match store.lookup(&"name".into()).unwrap() {
            Entry::Object(Object::Integer(index)) => index,
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn uses_first_server_until_it_fails() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        let ha = store(&[1, 2, 3], &connector);
        assert_eq!(served_by(&ha), 1);
        assert_eq!(served_by(&ha), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        connector.take_down(1);
        assert_eq!(served_by(&ha), 2);
        assert_eq!(ha.active_server(), Some(&Destination::new("localhost", 2)));
    }

    #[test]
    fn failover_moves_forward_and_wraps() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        let ha = store(&[1, 2, 3], &connector);
        assert_eq!(served_by(&ha), 1);

        connector.take_down(1);
        connector.take_down(2);
        assert_eq!(served_by(&ha), 3);

        // 1 is back, 3 fails: the scan wraps around to 1
        connector.down[&1].store(false, Ordering::SeqCst);
        connector.refuse.lock().unwrap().remove(&1);
        connector.take_down(3);
        assert_eq!(served_by(&ha), 1);
        assert_eq!(*connector.tried.lock().unwrap(), vec![1, 2, 3, 1]);
    }

    #[test]
    fn every_server_is_tried_once() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        for port in [1, 2, 3] {
            connector.refuse(port, Refusal::Connect);
        }
        let ha = store(&[1, 2, 3], &connector);
        let err = ha.lookup(&"name".into()).unwrap_err();
        let Error::Communication { attempts, cause } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(attempts.len(), 3);
        assert!(attempts[0].starts_with("remote://localhost:1 ("));
        assert!(cause.is_some_and(|c| c.is_connectivity()));
        assert_eq!(*connector.tried.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn authentication_failure_takes_priority() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        connector.refuse(1, Refusal::Connect);
        connector.refuse(2, Refusal::Auth);
        connector.refuse(3, Refusal::Connect);
        let ha = store(&[1, 2, 3], &connector);
        let err = ha.lookup(&"name".into()).unwrap_err();
        assert!(
            matches!(err, Error::Authentication { ref cause, .. } if cause.as_ref().is_some_and(TransportError::is_authentication)),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn domain_errors_do_not_fail_over() {
        let connector = FakeConnector::new(&[1, 2]);
        let ha = store(&[1, 2], &connector);
        let err = ha.lookup(&"missing".into()).unwrap_err();
        assert!(err.naming().is_some());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(served_by(&ha), 1);
    }

    #[test]
    fn concurrent_failures_share_one_failover() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        let ha = store(&[1, 2, 3], &connector);
        assert_eq!(served_by(&ha), 1);
        connector.take_down(1);

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ha = Arc::clone(&ha);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    served_by(&ha)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
        // the initial connection plus one replacement
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn contexts_are_bound_to_the_ha_store() {
        let connector = FakeConnector::new(&[1, 2]);
        let ha = store(&[1, 2], &connector);
        let Entry::Context(context) = ha.lookup(&"ctx".into()).unwrap() else {
            panic!("expected a context");
        };
        connector.take_down(1);
        // resolving through the context fails over like the store does
        assert_eq!(
            context.lookup_object("name").unwrap(),
            Object::Integer(2)
        );
    }

    #[test]
    fn closed_store_refuses_requests() {
        let connector = FakeConnector::new(&[1]);
        let ha = store(&[1], &connector);
        assert_eq!(served_by(&ha), 1);
        ha.close().unwrap();
        ha.close().unwrap();
        let err = ha.lookup(&"name".into()).unwrap_err();
        assert_eq!(err.to_string(), "NamingStore has been closed");
    }

    #[test]
    fn store_closed_by_a_concurrent_failover_is_retried() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        let ha = store(&[1, 2, 3], &connector);
        assert_eq!(served_by(&ha), 1);

        let raced = AtomicBool::new(false);
        let entry = ha
            .run(|inner| {
                if !raced.swap(true, Ordering::SeqCst) {
                    // another caller replaces the store this request is about to use
                    let mut group = ha.group();
                    let epoch = group.current.as_ref().map(|c| c.epoch);
                    ha.failover(&mut group, epoch).unwrap();
                }
                inner.lookup(&"name".into())
            })
            .unwrap();

        assert_eq!(entry, Entry::Object(Object::Integer(2)));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(served_by(&ha), 2);
    }

    #[test]
    fn closing_mid_request_is_not_retried() {
        let connector = FakeConnector::new(&[1, 2]);
        let ha = store(&[1, 2], &connector);
        let err = ha
            .run(|inner| {
                ha.close()?;
                inner.lookup(&"name".into())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Closed), "{err:?}");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<u16>>,
    }

    impl ConnectionObserver for RecordingObserver {
        fn connected(&self, descriptor: &ConnectionDescriptor, _: &Session) {
            self.seen.lock().unwrap().push(descriptor.destination.port);
        }
    }

    #[test]
    fn observer_sees_each_new_session() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        let observer = Arc::new(RecordingObserver::default());
        let ha = HaStore::with_observer(
            [1, 2, 3].into_iter().map(descriptor).collect(),
            Box::new(Arc::clone(&connector)),
            false,
            Arc::clone(&observer) as Arc<dyn ConnectionObserver>,
        )
        .unwrap();
        assert!(observer.seen.lock().unwrap().is_empty());

        assert_eq!(served_by(&ha), 1);
        assert_eq!(served_by(&ha), 1);
        assert_eq!(*observer.seen.lock().unwrap(), vec![1]);

        // refused connections are not reported
        connector.refuse(2, Refusal::Connect);
        connector.take_down(1);
        assert_eq!(served_by(&ha), 3);
        assert_eq!(*observer.seen.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let connector = FakeConnector::new(&[]);
        assert!(matches!(
            HaStore::new(Vec::new(), Box::new(connector), true),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn random_start_stays_in_range() {
        let connector = FakeConnector::new(&[1, 2, 3]);
        for _ in 0..20 {
            let ha = HaStore::new(
                [1, 2, 3].into_iter().map(descriptor).collect(),
                Box::new(Arc::clone(&connector)),
                true,
            )
            .unwrap();
            assert!((1..=3).contains(&served_by(&ha)));
        }
    }
}
