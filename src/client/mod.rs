//! Client side of the naming service.
//!
//! A [`CacheRegistry`] turns a [`ClientConfig`] into a root [`RemoteContext`].
//! Behind it sits an [`HaStore`] failing over between the configured servers,
//! each reached through a transport connection and a protocol
//! [`RemoteStore`](crate::protocol::RemoteStore). Endpoints, connections and
//! stores are shared between contexts built from equal configuration and
//! reference counted, so the last one closed releases the resource.
mod cache;
pub mod config;
mod connector;
mod context;
mod ha;

use log::debug;

use crate::{
    directory::{Binding, Entry, Name, NameClassPair, Object},
    error::Error,
};

pub use cache::{CacheRegistry, Cached, ConnectionKey, EndpointKey, ResourceCache, StoreKey};
pub use config::{ClientConfig, Properties};
pub use connector::TransportConnector;
pub use context::RemoteContext;
pub use ha::{
    ConnectionDescriptor, ConnectionObserver, Connector, HaStore, NoopObserver, Session,
};

/// Resource that can be released explicitly.
pub trait Closeable: Send + Sync {
    fn close(&self) -> Result<(), Error>;

    /// Releases without waiting for the outcome.
    fn close_async(&self) {
        if let Err(e) = self.close() {
            debug!("close failed: {e}");
        }
    }
}

/// Directory operations addressed by absolute name.
pub trait DirectoryStore: Closeable {
    fn lookup(&self, name: &Name) -> Result<Entry<RemoteContext>, Error>;

    fn bind(&self, name: &Name, object: &Object) -> Result<(), Error>;

    fn rebind(&self, name: &Name, object: &Object) -> Result<(), Error>;

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, Error>;

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding<Entry<RemoteContext>>>, Error>;

    fn unbind(&self, name: &Name) -> Result<(), Error>;

    fn rename(&self, name: &Name, new_name: &Name) -> Result<(), Error>;

    fn create_subcontext(&self, name: &Name) -> Result<RemoteContext, Error>;

    fn destroy_subcontext(&self, name: &Name) -> Result<(), Error>;

    /// Like [`lookup`](Self::lookup) but returns a final link unresolved.
    fn lookup_link(&self, name: &Name) -> Result<Entry<RemoteContext>, Error>;
}
