//! Infrastructure Adapters
//!
//! Reference implementations of the domain ports, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │   StateManager │ ExecutionContext │ ContainerWrapper       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │   ManagedObject │ Session │ InMemoryDatastore              │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use nucleus_cache::adapters::{InMemoryDatastore, ManagedObject, Session};
//! use nucleus_cache::cache::create_level2_cache;
//!
//! let level2 = create_level2_cache(&config)?;
//! let session = Session::new(config.clone(), level2, Arc::new(InMemoryDatastore::new()));
//!
//! session.persist(person)?;
//! session.commit()?;
//! ```

mod datastore;
mod managed;
mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use datastore::{unique_key_of_row, Datastore, InMemoryDatastore};
pub use managed::{ManagedObject, ManagedObjectBuilder};
pub use session::Session;
