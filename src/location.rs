//! Addresses of loadable resources.
//!
//! A location tells the runtime everything it needs to deliver one resource:
//! the internal id a provider consumes (usually a path or URL), the id of the
//! provider that understands it, and the locations it depends on. Locations
//! are handed around behind `Arc<dyn ResourceLocation>` so that catalogs,
//! locators and in-flight operations can share them freely.

use std::fmt;
use std::sync::Arc;

use crate::catalog::ResourceKey;
use crate::errors::*;
use crate::utils::hash::{fold_i32, stable_hash64};

/// The address of a loadable resource.
pub trait ResourceLocation: Send + Sync {
    /// The identifier consumed by the provider, usually a path or URL.
    fn internal_id(&self) -> &str;

    /// The identifier of the provider that understands this location.
    fn provider_id(&self) -> &str;

    /// The locations that must be delivered before this one. Implementations
    /// are free to construct the list on every call.
    fn dependencies(&self) -> Vec<Arc<dyn ResourceLocation>>;

    /// Checks if this location depends on others.
    fn has_dependencies(&self) -> bool {
        !self.dependencies().is_empty()
    }

    /// A hash over the dependency set, used to fold identical dependency
    /// groups of different locations into one in-flight operation. Locations
    /// with the same dependencies in any order report the same value.
    fn dependency_hash(&self) -> i32;

    /// Optional auxiliary data attached by the catalog author.
    fn data(&self) -> Option<&ResourceKey> {
        None
    }

    /// A stable hash of this location, folded from the internal and provider
    /// ids. Two locations with equal ids compare equal for caching purposes
    /// even when they are distinct instances.
    fn hash_code(&self) -> u64;
}

/// A straightforward `ResourceLocation` backed by owned strings. This is the
/// type to reach for when constructing locations in code instead of decoding
/// them from a catalog.
pub struct LocationInfo {
    name: String,
    internal_id: String,
    provider_id: String,
    dependencies: Vec<Arc<dyn ResourceLocation>>,
    data: Option<ResourceKey>,
    dependency_hash: i32,
    hash: u64,
}

impl LocationInfo {
    /// Creates a location from its parts. The internal id and the provider id
    /// must not be empty.
    pub fn new<N, I, P>(
        name: N,
        internal_id: I,
        provider_id: P,
        dependencies: Vec<Arc<dyn ResourceLocation>>,
    ) -> Result<Self>
    where
        N: Into<String>,
        I: Into<String>,
        P: Into<String>,
    {
        let name = name.into();
        let internal_id = internal_id.into();
        let provider_id = provider_id.into();

        if internal_id.is_empty() {
            bail!("The internal id of location '{}' must not be empty.", name);
        }

        if provider_id.is_empty() {
            bail!("The provider id of location '{}' must not be empty.", name);
        }

        let dependency_hash = hash_dependencies(&dependencies);
        let hash = stable_hash64(internal_id.as_bytes())
            .wrapping_mul(31)
            .wrapping_add(stable_hash64(provider_id.as_bytes()));

        Ok(LocationInfo {
            name,
            internal_id,
            provider_id,
            dependencies,
            data: None,
            dependency_hash,
            hash,
        })
    }

    /// Attaches auxiliary data to this location.
    pub fn with_data(mut self, data: ResourceKey) -> Self {
        self.data = Some(data);
        self
    }

    /// The primary, human readable name of this location.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ResourceLocation for LocationInfo {
    fn internal_id(&self) -> &str {
        &self.internal_id
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn dependencies(&self) -> Vec<Arc<dyn ResourceLocation>> {
        self.dependencies.clone()
    }

    fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    fn dependency_hash(&self) -> i32 {
        self.dependency_hash
    }

    fn data(&self) -> Option<&ResourceKey> {
        self.data.as_ref()
    }

    fn hash_code(&self) -> u64 {
        self.hash
    }
}

impl fmt::Debug for LocationInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LocationInfo")
            .field("name", &self.name)
            .field("internal_id", &self.internal_id)
            .field("provider_id", &self.provider_id)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

impl fmt::Display for LocationInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Folds the hash codes of a dependency list into the order independent form
/// stored on locations.
pub(crate) fn hash_dependencies(dependencies: &[Arc<dyn ResourceLocation>]) -> i32 {
    let mut hash = 0i32;
    for v in dependencies {
        hash = hash.wrapping_add(fold_i32(v.hash_code()));
    }
    hash
}
