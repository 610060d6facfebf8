//! Nucleus Cache - Level-2 Object Cache for a Persistence Engine
//!
//! A shared, best-effort object cache sitting between the sessions of a
//! persistence unit and its datastore. Objects are cached as
//! identity-decoupled snapshots ([`cache::CachedPC`]) that hold relations
//! as identities, so the cache never keeps a live object graph alive.
//!
//! # Architecture
//!
//! ```text
//! Session (Level-1) ──populate──▶ Level-2 cache ◀──retrieve── Session (Level-1)
//!        │                                                          │
//!        └──────────────────────▶ Datastore ◀───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Managed objects, sessions and an in-memory datastore
//! - [`cache`] - Level-1/Level-2 caches and the snapshot field managers
//! - [`config`] - Cache configuration
//! - [`domain`] - Identities, metadata, values and ports
//! - [`error`] - Error types

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use cache::{create_level2_cache, CacheUniqueKey, CachedPC, Level1Cache, Level2Cache};
pub use config::{CacheConfig, Level1CacheType, Level2CacheType};
pub use error::{Error, Result};
