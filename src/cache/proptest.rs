//! Property-Based Tests for the Object Cache
//!
//! # Test Properties
//!
//! 1. **Roundtrip**: replay(populate(object)) restores every cached scalar
//! 2. **Exclusion**: transactional and non-cacheable fields never load
//! 3. **Capacity**: a bounded cache never grows past its limit
//! 4. **Pinning**: pinned entries survive any reclaim cycle
//! 5. **Unique keys**: equality follows the (class, names, values) tuple

#![cfg(test)]

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use super::populate::build_cached_pc;
use super::reference::MemoryPressure;
use super::referenced::SoftLevel2Cache;
use super::retrieve::replay;
use super::unique_key::CacheUniqueKey;
use super::{CachedPC, Level2Cache};
use crate::adapters::test_support::{ecosystem, TestContext};
use crate::adapters::ManagedObject;
use crate::config::CacheConfig;
use crate::domain::{Identity, Scalar};

// =============================================================================
// Property Strategies
// =============================================================================

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z ]{0,24}"
}

/// Distinct keys to insert into a cache
fn keys_strategy() -> impl Strategy<Value = HashSet<i64>> {
    prop::collection::hash_set(0i64..10_000, 0..64)
}

// =============================================================================
// Snapshot Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: cached scalars come back unchanged in a fresh object.
    #[test]
    fn prop_scalar_roundtrip(name in name_strategy(), age in any::<i32>(), key in any::<i64>()) {
        let eco = ecosystem();
        let ctx = TestContext::new(true);
        let id = Identity::datastore("Person", key);
        let source = ManagedObject::builder(&eco.person)
            .id(id.clone())
            .set("name", name.clone())
            .set("age", age)
            .build();

        let cached = build_cached_pc(&*source, &ctx);
        let target = ManagedObject::hollow(Arc::clone(&eco.person), id);
        prop_assert!(replay(&cached, &*target, &ctx).is_empty());

        prop_assert_eq!(
            target.field_by_name("name").and_then(|v| v.as_scalar().cloned()),
            Some(Scalar::String(name))
        );
        prop_assert_eq!(
            target.field_by_name("age").and_then(|v| v.as_scalar().cloned()),
            Some(Scalar::Int(age))
        );
    }

    /// Property: excluded fields stay unloaded whatever they hold.
    #[test]
    fn prop_excluded_fields_never_cached(token in name_strategy(), notes in name_strategy()) {
        let eco = ecosystem();
        let source = ManagedObject::builder(&eco.person)
            .id(Identity::datastore("Person", 1))
            .set("session_token", token)
            .set("notes", notes)
            .build();

        let cached = build_cached_pc(&*source, &TestContext::new(true));
        for name in ["session_token", "notes"] {
            let field = eco.person.field_by_name(name).unwrap().number;
            prop_assert!(!cached.is_field_loaded(field));
        }
    }
}

// =============================================================================
// Cache Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: size never exceeds max_size, and puts beyond it are dropped.
    #[test]
    fn prop_capacity_cap(max in 1usize..32, keys in keys_strategy()) {
        let config = CacheConfig { max_size: Some(max), ..Default::default() };
        let cache = SoftLevel2Cache::new(&config);
        let class = ecosystem().pet;

        for key in &keys {
            let id = Identity::datastore("Pet", *key);
            cache.put(id, CachedPC::empty(Arc::clone(&class)));
            prop_assert!(cache.size() <= max);
        }
        prop_assert_eq!(cache.size(), keys.len().min(max));
    }

    /// Property: a High-pressure reclaim leaves exactly the pinned entries.
    #[test]
    fn prop_pinned_survive_reclaim(keys in keys_strategy(), pin_every in 1usize..5) {
        let cache = SoftLevel2Cache::new(&CacheConfig::default());
        let class = ecosystem().pet;

        let mut pinned = HashSet::new();
        for (i, key) in keys.iter().enumerate() {
            let id = Identity::datastore("Pet", *key);
            cache.put(id.clone(), CachedPC::empty(Arc::clone(&class)));
            if i % pin_every == 0 {
                cache.pin(&id);
                pinned.insert(id);
            }
        }

        cache.reclaim(MemoryPressure::High);
        prop_assert_eq!(cache.size(), pinned.len());
        for id in &pinned {
            prop_assert!(cache.contains_key(id));
        }
    }

    /// Property: keys are equal exactly when their tuples are equal.
    #[test]
    fn prop_unique_key_equality(a in name_strategy(), b in name_strategy()) {
        let ka = CacheUniqueKey::new("Person", [("name", a.clone())]);
        let kb = CacheUniqueKey::new("Person", [("name", b.clone())]);
        let ka2 = CacheUniqueKey::new("Person", [("name".to_string(), Scalar::String(a.clone()))]);

        prop_assert_eq!(&ka, &ka2);
        prop_assert_eq!(ka.hash_code(), ka2.hash_code());
        prop_assert_eq!(ka == kb, a == b);
    }
}
