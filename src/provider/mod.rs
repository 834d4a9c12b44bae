//! Providers translate locations into live resources.
//!
//! A provider owns the last mile of loading: given a location it understands,
//! it produces the actual value (bytes, a parsed asset, a connection) and
//! later tears that value down again. Providers never see handles being
//! juggled or dependencies being scheduled; by the time [`provide`] runs,
//! every dependency has already been delivered.
//!
//! Delivery is completion based. A synchronous provider finishes inside
//! `provide` by calling [`ProvideContext::complete`]; an asynchronous one
//! grabs a [`ProvideToken`] and completes it whenever its work is done, for
//! example from an `update` tick.
//!
//! [`provide`]: ResourceProvider::provide

pub mod file;

pub use self::file::{FileDataProvider, JsonDataProvider, TextDataProvider};

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::*;
use crate::location::ResourceLocation;
use crate::ops::{OperationHandle, ResourceSystem};

/// Static behaviour switches of a provider, sampled at registration and at
/// dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFlags {
    /// Run `provide` even when the dependency batch failed. Providers that
    /// can degrade gracefully (placeholder content, partial bundles) opt in;
    /// everyone else gets failed up front without being invoked.
    pub provide_with_failed_dependencies: bool,
    /// Receive [`ResourceProvider::update`] once per engine tick. Meant for
    /// providers that poll outstanding asynchronous work.
    pub wants_update: bool,
}

/// The last mile of loading: turns locations into live values and back.
pub trait ResourceProvider {
    /// The identifier locations use to pick this provider.
    fn provider_id(&self) -> &str;

    /// The type this provider delivers for `location` when the caller does
    /// not ask for anything specific.
    fn default_type(&self, location: &Arc<dyn ResourceLocation>) -> TypeId;

    /// Checks if this provider can deliver `ty` for `location`.
    fn can_provide(&self, ty: TypeId, location: &Arc<dyn ResourceLocation>) -> bool {
        ty == self.default_type(location)
    }

    /// Delivers the resource described by the context, either by completing
    /// inline or by stashing a token for later. Returning an error before
    /// completion fails the operation with that error.
    fn provide(&self, ctx: ProvideContext) -> Result<()>;

    /// Tears down a value this provider delivered earlier. The default does
    /// nothing, which suits resources that are plain data.
    fn release(&self, _location: &Arc<dyn ResourceLocation>, _resource: Arc<dyn Any + Send + Sync>) {
    }

    fn flags(&self) -> ProviderFlags {
        ProviderFlags::default()
    }

    /// Applies initialization data carried by a catalog. The default accepts
    /// anything and ignores it.
    fn initialize(&self, _id: &str, _data: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Called once per engine tick when [`ProviderFlags::wants_update`] is
    /// set.
    fn update(&self, _system: &mut ResourceSystem, _dt: Duration) {}
}

/// Completes one provide operation from anywhere, later. Copyable, so it can
/// be stashed in queues or moved into worker callbacks.
///
/// A token is only good for its own operation: once that operation completes
/// or is torn down, completing the token reports an error instead of
/// touching whatever reused the slot.
#[derive(Debug, Clone, Copy)]
pub struct ProvideToken {
    pub(crate) handle: OperationHandle,
}

impl ProvideToken {
    /// The operation this token completes.
    pub fn handle(&self) -> OperationHandle {
        self.handle
    }
}

/// Everything a provider gets to work with while delivering one location.
pub struct ProvideContext<'a> {
    system: &'a mut ResourceSystem,
    handle: OperationHandle,
    location: Arc<dyn ResourceLocation>,
    desired: TypeId,
    dependency: Option<OperationHandle>,
}

impl<'a> ProvideContext<'a> {
    pub(crate) fn new(
        system: &'a mut ResourceSystem,
        handle: OperationHandle,
        location: Arc<dyn ResourceLocation>,
        desired: TypeId,
        dependency: Option<OperationHandle>,
    ) -> Self {
        ProvideContext {
            system,
            handle,
            location,
            desired,
            dependency,
        }
    }

    /// The location being delivered.
    pub fn location(&self) -> &Arc<dyn ResourceLocation> {
        &self.location
    }

    /// The location's internal id with the runtime transform applied. This
    /// is the string to actually open.
    pub fn internal_id(&self) -> String {
        self.system.resolve_internal_id(self.location.internal_id())
    }

    /// The type the caller asked for.
    pub fn desired_type(&self) -> TypeId {
        self.desired
    }

    /// The number of dependency results delivered ahead of this provide.
    pub fn dependency_count(&self) -> usize {
        self.system.group_len(self.dependency)
    }

    /// The result of the `index`th dependency, if it succeeded.
    pub fn dependency(&self, index: usize) -> Option<Arc<dyn Any + Send + Sync>> {
        self.system.group_result(self.dependency, index)
    }

    /// Installs a progress callback polled while the operation is in flight.
    pub fn set_progress<F>(&mut self, f: F)
    where
        F: Fn() -> f32 + 'static,
    {
        self.system.set_progress_callback(self.handle, Box::new(f));
    }

    /// A token for completing this operation after `provide` has returned.
    pub fn token(&self) -> ProvideToken {
        ProvideToken {
            handle: self.handle,
        }
    }

    /// The engine itself, for providers that load through other operations.
    pub fn system(&mut self) -> &mut ResourceSystem {
        self.system
    }

    /// Completes the operation inline with a value or an error.
    pub fn complete<T: Any + Send + Sync>(self, result: Result<T>) -> Result<()> {
        let token = ProvideToken {
            handle: self.handle,
        };
        self.system.complete_token(token, result)
    }
}
