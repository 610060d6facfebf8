//! Object Cache
//!
//! Two-level object cache for the persistence engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Session A            Session B            Session C                 │
//! │  ┌──────────────┐     ┌──────────────┐     ┌──────────────┐          │
//! │  │ Level-1      │     │ Level-1      │     │ Level-1      │          │
//! │  │ live objects │     │ live objects │     │ live objects │          │
//! │  └──────┬───────┘     └──────┬───────┘     └──────┬───────┘          │
//! │         │ populate ▲ retrieve│                    │                  │
//! │         ▼          │         ▼                    ▼                  │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │ Level-2 cache (shared): CachedPC snapshots by identity         │  │
//! │  │   pinned map (strong) │ unpinned map (policy) │ unique keys    │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Implementations
//!
//! - [`SoftLevel2Cache`], [`WeakLevel2Cache`], [`StrongLevel2Cache`]:
//!   in-process maps with pinning
//! - [`ProviderLevel2Cache`]: storage delegated to a [`CacheProvider`]
//! - [`NullLevel2Cache`]: caching disabled

mod cached_pc;
mod level1;
mod level2;
mod metrics;
mod null;
mod populate;
mod proptest;
mod provider;
mod reference;
mod referenced;
mod retrieve;
mod unique_key;

use std::sync::Arc;

pub use cached_pc::{CachedPC, CachedValue};
pub use level1::{
    create_level1_cache, Level1Cache, ReferencedLevel1Cache, SoftRefCache, StrongRefCache,
    WeakRefCache,
};
pub use level2::Level2Cache;
pub use metrics::{CacheMetrics, MetricsSnapshot, PrometheusExporter};
pub use null::NullLevel2Cache;
pub use populate::{
    build_cached_pc, build_cached_pc_with, get_cacheable_id_for_id, refresh_cached_pc,
    refresh_cached_pc_with, Capture, PopulateFieldManager,
};
pub use provider::{CacheProvider, InMemoryCacheProvider, ProviderLevel2Cache};
pub use reference::{MemoryPressure, RefMap, ReferencePolicy, Soft, Strong, Weak};
pub use referenced::{ReferencedLevel2Cache, SoftLevel2Cache, StrongLevel2Cache, WeakLevel2Cache};
pub use retrieve::{get_object_from_cached_id, replay, replay_fields, RetrieveFieldManager};
pub use unique_key::CacheUniqueKey;

use crate::config::{CacheConfig, Level2CacheType};
use crate::error::Result;

/// Level-2 cache of the configured type. Provider-backed caches use an
/// in-process provider; use [`create_level2_cache_with_provider`] to plug
/// in another one.
pub fn create_level2_cache(config: &CacheConfig) -> Result<Arc<dyn Level2Cache>> {
    create_level2_cache_with_provider(config, Arc::new(InMemoryCacheProvider::new()))
}

pub fn create_level2_cache_with_provider(
    config: &CacheConfig,
    provider: Arc<dyn CacheProvider>,
) -> Result<Arc<dyn Level2Cache>> {
    config.validate()?;
    let cache: Arc<dyn Level2Cache> = match config.level2_type {
        Level2CacheType::None => Arc::new(NullLevel2Cache::new()),
        Level2CacheType::Soft => Arc::new(SoftLevel2Cache::new(config)),
        Level2CacheType::Weak => Arc::new(WeakLevel2Cache::new(config)),
        Level2CacheType::Strong => Arc::new(StrongLevel2Cache::new(config)),
        Level2CacheType::Provider => Arc::new(ProviderLevel2Cache::new(config, provider)?),
    };
    Ok(cache)
}

// =============================================================================
// Tests
// =============================================================================
