//! Directory data model.
//!
//! This module defines the values that flow through the naming protocol: composite
//! [`Name`]s, bindable [`Object`]s, lookup results ([`Entry`]) and listing results
//! ([`NameClassPair`], [`Binding`]). It also defines the [`Directory`] trait a server
//! exposes to remote peers, along with [`InMemoryDirectory`], the tree-backed
//! implementation used by the server binary.
//!
//! # Contexts
//!
//! A context is a directory node that holds further bindings. Contexts are never
//! serialized: a server reports one by name only and the client reconstructs a
//! local handle for it. On the server side the context type of an [`Entry`] is
//! therefore simply its absolute [`Name`].
//!
//! # See Also
//!
//! - [`protocol`](crate::protocol): Carries directory operations over the wire.
//! - [`client`](crate::client): Client-side view of a remote directory.
mod error;
mod memory;
mod name;
mod object;

pub use error::NamingError;
pub use memory::InMemoryDirectory;
pub use name::Name;
pub use object::{Binding, CONTEXT_CLASS, Entry, MAX_NESTING, NameClassPair, Object};

/// A directory served to remote peers.
///
/// Every operation reports domain failures as [`NamingError`], which the
/// server marshals back to the caller unchanged.
pub trait Directory: Send + Sync {
    fn lookup(&self, name: &Name) -> Result<Entry<Name>, NamingError>;

    fn bind(&self, name: &Name, object: Object) -> Result<(), NamingError>;

    fn rebind(&self, name: &Name, object: Object) -> Result<(), NamingError>;

    fn list(&self, name: &Name) -> Result<Vec<NameClassPair>, NamingError>;

    fn list_bindings(&self, name: &Name) -> Result<Vec<Binding<Entry<Name>>>, NamingError>;

    fn unbind(&self, name: &Name) -> Result<(), NamingError>;

    fn rename(&self, name: &Name, new_name: &Name) -> Result<(), NamingError>;

    fn create_subcontext(&self, name: &Name) -> Result<Name, NamingError>;

    fn destroy_subcontext(&self, name: &Name) -> Result<(), NamingError>;

    /// Like [`Directory::lookup`], but a final link is returned instead of followed.
    fn lookup_link(&self, name: &Name) -> Result<Entry<Name>, NamingError>;
}
