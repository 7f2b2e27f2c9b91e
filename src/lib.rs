//! Remote naming: a directory service reached over a multiplexed binary
//! protocol, with client side failover between servers.
//!
//! # Example
//! ```no_run
//! use remote_naming::{CacheRegistry, ClientConfig};
//!
//! let registry = CacheRegistry::new();
//! let config = ClientConfig::new("remote://localhost:7999,localhost:8999")?;
//! let context = registry.context(&config)?;
//! context.bind("greeting", "hello")?;
//! println!("{:?}", context.lookup_object("greeting")?);
//! context.close()?;
//! registry.shutdown();
//! # Ok::<(), remote_naming::Error>(())
//! ```
pub mod cli;
pub mod client;
pub mod directory;
mod error;
pub mod protocol;
pub mod transport;

pub use client::{CacheRegistry, ClientConfig, RemoteContext};
pub use directory::{Binding, Entry, Name, NameClassPair, NamingError, Object};
pub use error::Error;
