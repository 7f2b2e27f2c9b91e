use std::{fmt, sync::Arc};

use crate::{
    directory::{Binding, Entry, Name, NameClassPair, Object},
    error::Error,
};

use super::DirectoryStore;

/// A context on a remote directory, rooted at an absolute name.
///
/// Names given to its operations are relative to that root. Only the
/// context handed out for a configuration owns its store; closing any other
/// context is a no-op.
#[derive(Clone)]
pub struct RemoteContext {
    prefix: Name,
    store: Arc<dyn DirectoryStore>,
    owner: bool,
}

impl RemoteContext {
    pub fn new(prefix: Name, store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            prefix,
            store,
            owner: false,
        }
    }

    /// Root context that releases `store` when closed.
    pub fn owning(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            prefix: Name::root(),
            store,
            owner: true,
        }
    }

    /// Absolute name of this context.
    pub fn name(&self) -> &Name {
        &self.prefix
    }

    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    /// The same context reached through `store`.
    pub fn with_store(&self, store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            prefix: self.prefix.clone(),
            store,
            owner: false,
        }
    }

    fn absolute(&self, name: impl Into<Name>) -> Name {
        self.prefix.join(&name.into())
    }

    pub fn lookup(&self, name: impl Into<Name>) -> Result<Entry<RemoteContext>, Error> {
        self.store.lookup(&self.absolute(name))
    }

    /// Looks `name` up, expecting a plain object.
    pub fn lookup_object(&self, name: impl Into<Name>) -> Result<Object, Error> {
        let name = self.absolute(name);
        match self.store.lookup(&name)? {
            Entry::Object(object) => Ok(object),
            Entry::Context(_) => Err(Error::argument(
                "lookup",
                format!("'{name}' is a context"),
            )),
        }
    }

    pub fn lookup_link(&self, name: impl Into<Name>) -> Result<Entry<RemoteContext>, Error> {
        self.store.lookup_link(&self.absolute(name))
    }

    pub fn bind(&self, name: impl Into<Name>, object: impl Into<Object>) -> Result<(), Error> {
        self.store.bind(&self.absolute(name), &object.into())
    }

    pub fn rebind(&self, name: impl Into<Name>, object: impl Into<Object>) -> Result<(), Error> {
        self.store.rebind(&self.absolute(name), &object.into())
    }

    pub fn unbind(&self, name: impl Into<Name>) -> Result<(), Error> {
        self.store.unbind(&self.absolute(name))
    }

    pub fn rename(&self, name: impl Into<Name>, new_name: impl Into<Name>) -> Result<(), Error> {
        self.store
            .rename(&self.absolute(name), &self.absolute(new_name))
    }

    pub fn list(&self, name: impl Into<Name>) -> Result<Vec<NameClassPair>, Error> {
        self.store.list(&self.absolute(name))
    }

    pub fn list_bindings(
        &self,
        name: impl Into<Name>,
    ) -> Result<Vec<Binding<Entry<RemoteContext>>>, Error> {
        self.store.list_bindings(&self.absolute(name))
    }

    pub fn create_subcontext(&self, name: impl Into<Name>) -> Result<RemoteContext, Error> {
        self.store.create_subcontext(&self.absolute(name))
    }

    pub fn destroy_subcontext(&self, name: impl Into<Name>) -> Result<(), Error> {
        self.store.destroy_subcontext(&self.absolute(name))
    }

    /// Releases the store if this context owns it.
    pub fn close(&self) -> Result<(), Error> {
        if self.owner {
            self.store.close()
        } else {
            Ok(())
        }
    }
}

impl PartialEq for RemoteContext {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix
            && std::ptr::addr_eq(Arc::as_ptr(&self.store), Arc::as_ptr(&other.store))
    }
}

impl fmt::Debug for RemoteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteContext")
            .field("name", &self.prefix)
            .field("owner", &self.owner)
            .finish()
    }
}

impl fmt::Display for RemoteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context '{}'", self.prefix)
    }
}
