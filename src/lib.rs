//! Quarry is a small, portable runtime that loads `resources` asynchronously through
//! pluggable `providers`, and keeps every piece of loaded content behind a unique,
//! reference-counted `OperationHandle`.
//!
//! To understand how to properly manage content with _quarry_, its important to understand
//! how _quarry_ identifies and resolves data.
//!
//! # Key
//!
//! User facing code refers to content with opaque `ResourceKey`s. A key could be a readable
//! address, a label shared by a whole group of content, a numeric identifier or a UUID. Keys
//! are resolved into one or more locations by the registered locators, so the same key can
//! be remapped between builds without touching call sites.
//!
//! # Location
//!
//! A `ResourceLocation` is the immutable description of one loadable thing: an internal
//! identifier (usually a path or URL template), the identifier of the provider that knows
//! how to load it, and the list of locations it depends on. Locations are produced by
//! locators, either from a mutable in-memory `LocationMap` or from a compact binary
//! catalog that has been deserialized from disk.
//!
//! # Operation
//!
//! Every load request is tracked by a pooled, reference-counted operation. Operations form
//! a dependency graph, are deduplicated against an operation cache, and complete
//! cooperatively during `ResourceSystem::update`. The operation behind a handle is recycled
//! when its last reference is released, so stale handles are always detectable.
//!
//! # Provider
//!
//! The actual loading work is done by implementations of `ResourceProvider`. A provider is
//! picked per location by matching its identifier and the requested type, receives the
//! results of the location's dependencies, and completes the operation either synchronously
//! or on a later update tick.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod errors;
#[macro_use]
pub mod utils;
pub mod catalog;
pub mod location;
pub mod locator;
pub mod ops;
pub mod provider;
pub mod settings;

pub mod prelude;

pub use self::errors::{Error, Result};
pub use self::ops::ResourceSystem;
