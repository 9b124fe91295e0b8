//! Collection Store Module
//!
//! Named, case-insensitive, multi-valued key/value stores with lazy expiry,
//! shared by every transaction of the process:
//! - `Collection` trait for pluggable backends
//! - `InMemoryCollection` guarded by a reader/writer lock
//! - Compartment views (`compartment::key`) over one physical store
//! - A registry of the named shared collections

mod backend;
mod config;
mod entry;
mod key;
mod memory;
mod registry;

pub use backend::{Collection, CompartmentView};
pub use config::CollectionConfig;
pub use entry::CollectionEntry;
pub use key::{nkey, CollectionKey, COMPARTMENT_SEPARATOR};
pub use memory::{InMemoryCollection, DEFAULT_CAPACITY};
pub use registry::CollectionRegistry;
