use std::{
    collections::{HashMap, hash_map},
    fmt,
    hash::Hash,
    ops::Deref,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    directory::{Binding, Entry, Name, NameClassPair, Object},
    error::Error,
    transport::{Connection, Destination, Endpoint, OptionMap},
};

use super::{
    Closeable, ConnectionDescriptor, ConnectionObserver, DirectoryStore, HaStore, NoopObserver,
    RemoteContext, TransportConnector, config::ClientConfig,
};

impl Closeable for Endpoint {
    fn close(&self) -> Result<(), Error> {
        Endpoint::close(self);
        Ok(())
    }
}

impl Closeable for Connection {
    fn close(&self) -> Result<(), Error> {
        Connection::close(self);
        Ok(())
    }

    fn close_async(&self) {
        Connection::close_async(self);
    }
}

struct Slot<R> {
    resource: Arc<R>,
    references: usize,
    generation: u64,
}

struct Shared<K, R> {
    kind: &'static str,
    slots: Mutex<HashMap<K, Slot<R>>>,
    generation: AtomicU64,
}

/// Reference counted resources shared under equal keys.
///
/// Every [`get`](Self::get) takes a reference; the resource is closed when
/// the last [`Cached`] handle for it is released.
pub struct ResourceCache<K, R> {
    shared: Arc<Shared<K, R>>,
}

impl<K, R> Clone for ResourceCache<K, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, R> ResourceCache<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    R: Closeable + 'static,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<R>>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the resource cached under `key`, building it first if absent.
    pub fn get<E>(
        &self,
        key: K,
        build: impl FnOnce() -> Result<Arc<R>, E>,
    ) -> Result<Cached<K, R>, E> {
        self.get_valid(key, |_| true, build)
    }

    /// Like [`get`](Self::get), but an entry failing `valid` is evicted and
    /// rebuilt. Handles to the evicted resource stay usable and releasing
    /// them no longer affects the cache.
    pub fn get_valid<E>(
        &self,
        key: K,
        valid: impl Fn(&R) -> bool,
        build: impl FnOnce() -> Result<Arc<R>, E>,
    ) -> Result<Cached<K, R>, E> {
        let mut slots = self.slots();
        let slot = match slots.entry(key.clone()) {
            hash_map::Entry::Occupied(occupied) if valid(&occupied.get().resource) => {
                occupied.into_mut()
            }
            hash_map::Entry::Occupied(mut occupied) => {
                debug!("evicting stale {} {key:?}", self.shared.kind);
                occupied.insert(self.build_slot(build)?);
                occupied.into_mut()
            }
            hash_map::Entry::Vacant(vacant) => vacant.insert(self.build_slot(build)?),
        };
        slot.references += 1;

        Ok(Cached {
            cache: self.clone(),
            key,
            generation: slot.generation,
            resource: Arc::clone(&slot.resource),
            released: AtomicBool::new(false),
        })
    }

    fn build_slot<E>(&self, build: impl FnOnce() -> Result<Arc<R>, E>) -> Result<Slot<R>, E> {
        let resource = build()?;
        debug!("created {}", self.shared.kind);
        Ok(Slot {
            resource,
            references: 0,
            generation: self.shared.generation.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Drops one reference to the entry under `key`, closing the resource
    /// when none remain. Releasing an absent key does nothing.
    pub fn release(&self, key: &K, async_close: bool) -> Result<(), Error> {
        self.release_if(key, None, async_close)
    }

    fn release_if(&self, key: &K, generation: Option<u64>, async_close: bool) -> Result<(), Error> {
        let resource = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(key) else {
                return Ok(());
            };
            if generation.is_some_and(|g| g != slot.generation) {
                return Ok(());
            }
            slot.references = slot.references.saturating_sub(1);
            if slot.references > 0 {
                return Ok(());
            }
            slots.remove(key).map(|slot| slot.resource)
        };

        let Some(resource) = resource else {
            return Ok(());
        };
        debug!("closing {} {key:?}", self.shared.kind);
        if async_close {
            thread::spawn(move || {
                if let Err(e) = resource.close() {
                    warn!("failed to close resource: {e}");
                }
            });
            Ok(())
        } else {
            resource.close()
        }
    }

    /// Number of live references to `key`.
    pub fn references(&self, key: &K) -> usize {
        self.slots().get(key).map_or(0, |slot| slot.references)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and forgets every resource regardless of outstanding handles.
    pub fn shutdown(&self) {
        let slots: Vec<_> = self.slots().drain().collect();
        if !slots.is_empty() {
            info!("closing {} cached {}(s)", slots.len(), self.shared.kind);
        }
        for (key, slot) in slots {
            if let Err(e) = slot.resource.close() {
                warn!("failed to close {} {key:?}: {e}", self.shared.kind);
            }
        }
    }
}

/// One reference to a cached resource, released on close or drop.
pub struct Cached<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    R: Closeable + 'static,
{
    cache: ResourceCache<K, R>,
    key: K,
    generation: u64,
    resource: Arc<R>,
    released: AtomicBool,
}

impl<K, R> Cached<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    R: Closeable + 'static,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    fn release(&self, async_close: bool) -> Result<(), Error> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cache
            .release_if(&self.key, Some(self.generation), async_close)
    }
}

impl<K, R> Deref for Cached<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    R: Closeable + 'static,
{
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<K, R> Closeable for Cached<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    R: Closeable + 'static,
{
    fn close(&self) -> Result<(), Error> {
        self.release(false)
    }

    fn close_async(&self) {
        if let Err(e) = self.release(true) {
            debug!("release failed: {e}");
        }
    }
}

impl<K, R> Drop for Cached<K, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    R: Closeable + 'static,
{
    fn drop(&mut self) {
        if let Err(e) = self.release(false) {
            debug!("release on drop failed: {e}");
        }
    }
}

impl<K> DirectoryStore for Cached<K, HaStore>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn lookup(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
        self.resource.lookup(name)
    }

    fn bind(&self, name: &Name, object: &Object) -> Result<(), Error> {
        self.resource.bind(name, object)
    }

    fn rebind(&self, name: &Name, object: &Object) -> Result<(), Error> {
        self.resource.rebind(name, object)
    }

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, Error> {
        self.resource.list(name)
    }

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding<Entry<RemoteContext>>>, Error> {
        self.resource.list_bindings(name)
    }

    fn unbind(&self, name: &Name) -> Result<(), Error> {
        self.resource.unbind(name)
    }

    fn rename(&self, name: &Name, new_name: &Name) -> Result<(), Error> {
        self.resource.rename(name, new_name)
    }

    fn create_subcontext(&self, name: &Name) -> Result<RemoteContext, Error> {
        self.resource.create_subcontext(name)
    }

    fn destroy_subcontext(&self, name: &Name) -> Result<(), Error> {
        self.resource.destroy_subcontext(name)
    }

    fn lookup_link(&self, name: &Name) -> Result<Entry<RemoteContext>, Error> {
        self.resource.lookup_link(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub name: String,
    pub options: OptionMap,
    pub provider_options: OptionMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub endpoint: EndpointKey,
    pub destination: Destination,
    pub options: OptionMap,
    pub authenticator: String,
}

impl ConnectionKey {
    pub fn new(endpoint: EndpointKey, descriptor: &ConnectionDescriptor) -> Self {
        Self {
            endpoint,
            destination: descriptor.destination.clone(),
            options: descriptor.connect_options.clone(),
            authenticator: descriptor.authenticator.identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub endpoint: EndpointKey,
    pub servers: Vec<ConnectionDescriptor>,
    pub random_server: bool,
    pub request_timeout: Duration,
}

/// Process-wide caches of endpoints, connections and stores.
#[derive(Clone)]
pub struct CacheRegistry {
    endpoints: ResourceCache<EndpointKey, Endpoint>,
    connections: ResourceCache<ConnectionKey, Connection>,
    stores: ResourceCache<StoreKey, HaStore>,
    observer: Arc<dyn ConnectionObserver>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::with_observer(Arc::new(NoopObserver))
    }

    pub fn with_observer(observer: Arc<dyn ConnectionObserver>) -> Self {
        Self {
            endpoints: ResourceCache::new("endpoint"),
            connections: ResourceCache::new("connection"),
            stores: ResourceCache::new("naming store"),
            observer,
        }
    }

    pub fn endpoints(&self) -> &ResourceCache<EndpointKey, Endpoint> {
        &self.endpoints
    }

    pub fn connections(&self) -> &ResourceCache<ConnectionKey, Connection> {
        &self.connections
    }

    pub fn stores(&self) -> &ResourceCache<StoreKey, HaStore> {
        &self.stores
    }

    /// Root context for `config`. Contexts built from equal configuration
    /// share one store; closing the context releases its reference.
    pub fn context(&self, config: &ClientConfig) -> Result<RemoteContext, Error> {
        let endpoint_key = EndpointKey {
            name: config.endpoint_name.clone(),
            options: config.endpoint_options.clone(),
            provider_options: config.provider_options.clone(),
        };
        let servers = config.descriptors()?;
        let key = StoreKey {
            endpoint: endpoint_key.clone(),
            servers: servers.clone(),
            random_server: config.random_server,
            request_timeout: config.request_timeout,
        };

        let store = self.stores.get(key, || {
            let endpoint = self.endpoints.get(endpoint_key.clone(), || {
                Ok::<_, Error>(Arc::new(Endpoint::new(
                    endpoint_key.name.clone(),
                    endpoint_key.options.merged(&endpoint_key.provider_options),
                )))
            })?;
            let connector = TransportConnector::new(
                endpoint,
                self.connections.clone(),
                config.request_timeout,
            );
            HaStore::with_observer(
                servers,
                Box::new(connector),
                config.random_server,
                Arc::clone(&self.observer),
            )
        })?;
        Ok(RemoteContext::owning(Arc::new(store)))
    }

    /// Closes every cached resource, stores first.
    pub fn shutdown(&self) {
        self.stores.shutdown();
        self.connections.shutdown();
        self.endpoints.shutdown();
    }

    /// Runs [`shutdown`](Self::shutdown) and exits when the process is
    /// interrupted. Can be installed once per process.
    pub fn install_signal_handler(&self) -> Result<(), Error> {
        let registry = self.clone();
        ctrlc::set_handler(move || {
            info!("interrupted, releasing naming resources");
            registry.shutdown();
            std::process::exit(130);
        })
        .map_err(|e| Error::Config(format!("failed to install signal handler: {e}")))
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}
