//! Key to location resolution.
//!
//! A locator answers one question: which locations does a key stand for? The
//! runtime consults its locators in registration order, so several catalogs
//! can be live at once and independently resolve overlapping key sets. How
//! results from different keys are combined is controlled by [`MergeMode`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{CatalogEntry, ResourceKey};
use crate::location::{LocationInfo, ResourceLocation};

/// Resolves keys into resource locations.
pub trait Locator {
    /// Returns the locations the key stands for, or `None` when this locator
    /// does not know the key at all.
    fn locate(&self, key: &ResourceKey) -> Option<&[Arc<dyn ResourceLocation>]>;
}

/// Controls how the location sets of several keys are merged into one result
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeMode {
    /// Takes the locations of the first key that resolves and ignores the
    /// rest.
    UseFirst,
    /// Takes the union of all locations, with duplicates removed.
    Union,
    /// Takes only locations that every key resolves to. A single key that
    /// resolves to nothing makes the whole result empty, so evaluation stops
    /// at the first miss.
    Intersection,
}

/// A locator backed by a plain multimap. Useful for hand built location sets
/// and as the in-memory form of decoded catalog entries.
#[derive(Default)]
pub struct LocationMap {
    map: HashMap<ResourceKey, Vec<Arc<dyn ResourceLocation>>>,
}

impl LocationMap {
    /// Creates an empty `LocationMap`.
    pub fn new() -> Self {
        LocationMap {
            map: HashMap::new(),
        }
    }

    /// Builds a map from catalog entries, wiring up the dependencies between
    /// them. Entries are admitted in dependency order; entries whose
    /// dependencies can never be satisfied (broken references or cycles) are
    /// skipped with a warning.
    pub fn from_entries(entries: &[CatalogEntry]) -> Self {
        let mut locator = LocationMap::new();
        let mut pending: Vec<&CatalogEntry> = entries.iter().collect();

        loop {
            let before = pending.len();
            let map = &mut locator;

            pending.retain(|e| {
                if e.keys.is_empty() {
                    warn!("Catalog entry '{}' has no keys. Skipping.", e.internal_id);
                    return false;
                }

                if !e.dependencies.iter().all(|k| map.map.contains_key(k)) {
                    return true;
                }

                let mut deps = Vec::new();
                for k in &e.dependencies {
                    if let Some(locations) = map.map.get(k) {
                        deps.extend(locations.iter().cloned());
                    }
                }

                match LocationInfo::new(
                    e.keys[0].to_string(),
                    e.internal_id.as_str(),
                    e.provider_id.as_str(),
                    deps,
                ) {
                    Ok(mut info) => {
                        if let Some(data) = &e.data {
                            info = info.with_data(data.clone());
                        }

                        let location: Arc<dyn ResourceLocation> = Arc::new(info);
                        for k in &e.keys {
                            map.add(k.clone(), location.clone());
                        }
                    }
                    Err(err) => {
                        warn!("Catalog entry '{}' is invalid: {}. Skipping.", e.internal_id, err);
                    }
                }

                false
            });

            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        for e in pending {
            warn!(
                "Catalog entry '{}' has unresolvable dependencies. Skipping.",
                e.internal_id
            );
        }

        locator
    }

    /// Registers a location under a key. A key may accumulate any number of
    /// locations.
    pub fn add(&mut self, key: ResourceKey, location: Arc<dyn ResourceLocation>) {
        self.map.entry(key).or_insert_with(Vec::new).push(location);
    }

    /// Registers several locations under one key.
    pub fn add_locations<I>(&mut self, key: ResourceKey, locations: I)
    where
        I: IntoIterator<Item = Arc<dyn ResourceLocation>>,
    {
        self.map
            .entry(key)
            .or_insert_with(Vec::new)
            .extend(locations);
    }

    /// An iterator over all keys this map can resolve.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.map.keys()
    }

    /// The number of distinct keys in this map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Checks if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Locator for LocationMap {
    fn locate(&self, key: &ResourceKey) -> Option<&[Arc<dyn ResourceLocation>]> {
        self.map.get(key).map(|v| v.as_slice())
    }
}
