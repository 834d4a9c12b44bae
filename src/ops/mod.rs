//! The operation engine behind every load.
//!
//! All asynchronous work in quarry is tracked by pooled, reference counted
//! operations living in a slot arena owned by [`ResourceSystem`]. Callers
//! only ever hold [`OperationHandle`]s (or their typed wrappers), so a
//! recycled operation is always detectable as such instead of being read
//! through a dangling pointer.
//!
//! Operations form a dependency graph. A provider operation waits for the
//! group operation that gathers its location's dependencies, a group waits
//! for its members, and a chain waits for the operation it continues from.
//! Completion walks this graph without recursion: finished operations are
//! queued and drained cooperatively, either inside the load call that
//! created them or during [`ResourceSystem::update`].
//!
//! Equivalent requests are deduplicated. Each cacheable operation carries a
//! key derived from its location and the requested type, and a second load
//! of the same pair returns the same handle with one more reference on it.
//! Releasing the last reference tears the operation down, hands the result
//! back to its provider and recycles the shell through the configured
//! [`AllocationStrategy`].

pub mod operation;
pub mod strategy;

pub use self::operation::{
    Operation, OperationHandle, OperationStatus, OperationType, TypedHandle,
};
pub use self::strategy::{AllocationStrategy, HeapAllocationStrategy, LruAllocationStrategy};

use std::any::{self, Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smallvec::SmallVec;

use self::operation::{Continuation, Listener, OperationKind};
use crate::catalog::{CatalogData, CatalogLocator, ResourceKey};
use crate::errors::*;
use crate::location::ResourceLocation;
use crate::locator::{Locator, MergeMode};
use crate::provider::{ProvideContext, ProvideToken, ResourceProvider};
use crate::settings::RuntimeSettings;
use crate::utils::hash::hash64;
use crate::utils::ObjectPool;

/// Lifecycle notifications for profiling and debugging overlays.
///
/// The subscribed handler receives the event, the affected handle and an
/// event specific value: the reference count for [`Created`] and
/// [`ReferenceCountChanged`], zero otherwise.
///
/// [`Created`]: DiagnosticEvent::Created
/// [`ReferenceCountChanged`]: DiagnosticEvent::ReferenceCountChanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticEvent {
    Created,
    Completed,
    Failed,
    ReferenceCountChanged,
    Destroyed,
}

type DiagnosticsHandler = Box<dyn Fn(DiagnosticEvent, OperationHandle, u32)>;
type ErrorHandler = Box<dyn Fn(OperationHandle, &failure::Error)>;
type InternalIdTransform = Box<dyn Fn(&str) -> String>;

/// The single threaded engine that owns every operation, locator and
/// provider.
///
/// The system never spawns threads on its own. Synchronous providers finish
/// within the call that started the load; asynchronous providers park a
/// [`ProvideToken`] and complete it from a later [`update`] tick. Everything
/// else (dependency waits, callbacks, teardown) happens inside the caller's
/// stack frame under cooperative scheduling.
///
/// [`update`]: ResourceSystem::update
pub struct ResourceSystem {
    ops: ObjectPool<OperationHandle, Operation>,
    cache: HashMap<u64, OperationHandle>,
    strategy: Box<dyn AllocationStrategy>,
    providers: Vec<Arc<dyn ResourceProvider>>,
    provider_cache: HashMap<u64, usize>,
    update_receivers: Vec<Arc<dyn ResourceProvider>>,
    locators: Vec<Arc<dyn Locator>>,
    exec: VecDeque<OperationHandle>,
    deferred: Vec<(OperationHandle, Listener)>,
    transform: Option<InternalIdTransform>,
    error_handler: Option<ErrorHandler>,
    diagnostics: Option<DiagnosticsHandler>,
    log_errors: bool,
}

impl Default for ResourceSystem {
    fn default() -> Self {
        ResourceSystem::new()
    }
}

impl ResourceSystem {
    /// A system recycling operation shells through the default
    /// [`LruAllocationStrategy`]. No locators and no providers are
    /// registered yet.
    pub fn new() -> Self {
        ResourceSystem::with_strategy(Box::new(LruAllocationStrategy::default()))
    }

    /// A system with a custom allocation strategy.
    pub fn with_strategy(strategy: Box<dyn AllocationStrategy>) -> Self {
        ResourceSystem {
            ops: ObjectPool::new(),
            cache: HashMap::new(),
            strategy,
            providers: Vec::new(),
            provider_cache: HashMap::new(),
            update_receivers: Vec::new(),
            locators: Vec::new(),
            exec: VecDeque::new(),
            deferred: Vec::new(),
            transform: None,
            error_handler: None,
            diagnostics: None,
            log_errors: true,
        }
    }

    /// Registers a provider. Lookups prefer providers in registration
    /// order, so more specific providers should be added first.
    pub fn add_provider(&mut self, provider: Arc<dyn ResourceProvider>) {
        if provider.flags().wants_update {
            self.update_receivers.push(Arc::clone(&provider));
        }
        self.provider_cache.clear();
        self.providers.push(provider);
    }

    /// Registers a locator. Keys are resolved against every registered
    /// locator, in registration order.
    pub fn add_locator(&mut self, locator: Arc<dyn Locator>) {
        self.locators.push(locator);
    }

    /// Removes a previously registered locator. Returns false when the
    /// instance was never registered.
    pub fn remove_locator(&mut self, locator: &Arc<dyn Locator>) -> bool {
        let target = &**locator as *const dyn Locator as *const u8 as usize;
        let before = self.locators.len();
        self.locators
            .retain(|l| &**l as *const dyn Locator as *const u8 as usize != target);
        self.locators.len() != before
    }

    /// Removes every registered locator.
    pub fn clear_locators(&mut self) {
        self.locators.clear();
    }

    /// Installs a transform applied to every internal id before it reaches a
    /// provider, for example to prepend a content server URL.
    pub fn set_internal_id_transform<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String + 'static,
    {
        self.transform = Some(Box::new(f));
    }

    /// Routes operation failures to `f` instead of the log.
    pub fn set_error_handler<F>(&mut self, f: F)
    where
        F: Fn(OperationHandle, &failure::Error) + 'static,
    {
        self.error_handler = Some(Box::new(f));
    }

    /// Subscribes to [`DiagnosticEvent`]s.
    pub fn set_diagnostics_handler<F>(&mut self, f: F)
    where
        F: Fn(DiagnosticEvent, OperationHandle, u32) + 'static,
    {
        self.diagnostics = Some(Box::new(f));
    }

    /// Controls whether unhandled operation failures are written to the log.
    /// Enabled by default.
    pub fn set_log_errors(&mut self, enabled: bool) {
        self.log_errors = enabled;
    }

    /// The internal id a provider would actually open for `internal_id`,
    /// with the registered transform applied.
    pub fn resolve_internal_id(&self, internal_id: &str) -> String {
        match self.transform {
            Some(ref f) => f(internal_id),
            None => internal_id.to_string(),
        }
    }

    /// The number of live operations, including the ones only kept alive by
    /// internal references.
    pub fn operation_count(&self) -> usize {
        self.ops.len()
    }

    /// Checks if `handle` still refers to a live operation.
    pub fn contains<H>(&self, handle: H) -> bool
    where
        H: Into<OperationHandle>,
    {
        self.ops.is_alive(handle.into())
    }

    /// Resolves `key` against every registered locator. Locations reported
    /// by more than one locator appear once.
    pub fn locate(&self, key: &ResourceKey) -> Vec<Arc<dyn ResourceLocation>> {
        let mut found: Vec<Arc<dyn ResourceLocation>> = Vec::new();
        for locator in &self.locators {
            if let Some(locations) = locator.locate(key) {
                for location in locations {
                    if !found.iter().any(|l| identity(l) == identity(location)) {
                        found.push(Arc::clone(location));
                    }
                }
            }
        }
        found
    }

    /// Resolves a batch of keys into one location set according to `mode`.
    ///
    /// `Intersection` gives up as soon as one key resolves to nothing, or as
    /// soon as the running intersection becomes empty; the remaining keys
    /// are never looked up.
    pub fn locate_many(&self, keys: &[ResourceKey], mode: MergeMode) -> Vec<Arc<dyn ResourceLocation>> {
        match mode {
            MergeMode::UseFirst => {
                for key in keys {
                    let found = self.locate(key);
                    if !found.is_empty() {
                        return found;
                    }
                }
                Vec::new()
            }
            MergeMode::Union => {
                let mut merged: Vec<Arc<dyn ResourceLocation>> = Vec::new();
                for key in keys {
                    for location in self.locate(key) {
                        if !merged.iter().any(|l| identity(l) == identity(&location)) {
                            merged.push(location);
                        }
                    }
                }
                merged
            }
            MergeMode::Intersection => {
                let mut merged: Vec<Arc<dyn ResourceLocation>> = Vec::new();
                for (i, key) in keys.iter().enumerate() {
                    let found = self.locate(key);
                    if found.is_empty() {
                        return Vec::new();
                    }
                    if i == 0 {
                        merged = found;
                    } else {
                        merged.retain(|l| found.iter().any(|f| identity(f) == identity(l)));
                        if merged.is_empty() {
                            return Vec::new();
                        }
                    }
                }
                merged
            }
        }
    }

    /// Loads the first location `key` resolves to, as a `T`.
    ///
    /// The returned handle owns one reference and is never invalid: a key no
    /// locator understands comes back as an already failed operation rather
    /// than an error.
    pub fn load<T>(&mut self, key: &ResourceKey) -> TypedHandle<T>
    where
        T: Any + Send + Sync,
    {
        let locations = self.locate(key);
        let handle = match locations.first() {
            Some(location) => self.provide_inner(location, Some(TypeId::of::<T>())),
            None => self.create_failed_inner(Error::InvalidKey(key.to_string()).into()),
        };
        self.pump();
        TypedHandle::new(handle)
    }

    /// Loads one location, bypassing key resolution.
    pub fn load_location<T>(&mut self, location: &Arc<dyn ResourceLocation>) -> TypedHandle<T>
    where
        T: Any + Send + Sync,
    {
        let handle = self.provide_inner(location, Some(TypeId::of::<T>()));
        self.pump();
        TypedHandle::new(handle)
    }

    /// Loads every location the keys resolve to under `mode` and gathers the
    /// results into a `Vec<Arc<T>>`, in location order.
    ///
    /// `each` runs once per member as it arrives, before the batch as a
    /// whole completes. When an equivalent batch is already cached the
    /// cached handle is returned as is and `each` is not invoked again.
    pub fn load_all<T, F>(&mut self, keys: &[ResourceKey], mode: MergeMode, each: F) -> TypedHandle<Vec<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) + 'static,
    {
        let locations = self.locate_many(keys, mode);
        if locations.is_empty() {
            let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            let handle = self.create_failed_inner(Error::InvalidKey(keys.join(", ")).into());
            self.pump();
            return TypedHandle::new(handle);
        }
        self.load_list_inner(&locations, Some(Rc::new(each)))
    }

    /// Loads a batch of locations and gathers the results into a
    /// `Vec<Arc<T>>`, in the given order.
    pub fn load_list<T>(&mut self, locations: &[Arc<dyn ResourceLocation>]) -> TypedHandle<Vec<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        self.load_list_inner(locations, None)
    }

    /// Creates an operation that is already succeeded with `value`.
    pub fn create_completed_operation<T>(&mut self, value: T) -> TypedHandle<T>
    where
        T: Any + Send + Sync,
    {
        let handle = self.create_completed_inner(Some(Arc::new(value)), None);
        self.pump();
        TypedHandle::new(handle)
    }

    /// Creates an operation that is already failed with `error`.
    pub fn create_failed_operation(&mut self, error: failure::Error) -> OperationHandle {
        let handle = self.create_failed_inner(error);
        self.pump();
        handle
    }

    /// Creates an operation that completes once every member of `children`
    /// has completed. Its result is the member handles in the given order;
    /// it fails with the error of the first failed member, but always waits
    /// for all of them.
    ///
    /// The group takes its own references on the members; the caller keeps
    /// the references it already holds.
    pub fn create_group_operation(&mut self, children: &[OperationHandle]) -> Result<OperationHandle> {
        for &child in children {
            if !self.ops.is_alive(child) {
                return Err(Error::OperationHandleInvalid(child).into());
            }
        }
        for &child in children {
            self.acquire_internal(child)?;
        }
        let handle = self.create_group_inner(children.to_vec(), 0);
        self.pump();
        Ok(handle)
    }

    /// Creates an operation that waits for `dependency`, then asks
    /// `continuation` for a follow up operation and assumes its outcome.
    ///
    /// The chain takes its own reference on `dependency` and owns the
    /// operation the continuation returns, releasing both on teardown.
    /// Returning `Err` from the continuation fails the chain with that
    /// error.
    pub fn create_chain_operation<F>(&mut self, dependency: OperationHandle, continuation: F) -> Result<OperationHandle>
    where
        F: FnOnce(&mut ResourceSystem, OperationHandle) -> Result<OperationHandle> + 'static,
    {
        if !self.ops.is_alive(dependency) {
            return Err(Error::OperationHandleInvalid(dependency).into());
        }
        self.acquire_internal(dependency)?;
        let handle = self.create_chain_inner(dependency, Box::new(continuation));
        self.pump();
        Ok(handle)
    }

    /// Adds one reference to an operation.
    pub fn acquire<H>(&mut self, handle: H) -> Result<()>
    where
        H: Into<OperationHandle>,
    {
        self.acquire_internal(handle.into())
    }

    /// Removes one reference from an operation, tearing it down when the
    /// last one goes away.
    ///
    /// Releasing a handle the system does not know (stale, already torn
    /// down, or from another system) is logged and otherwise ignored.
    pub fn release<H>(&mut self, handle: H)
    where
        H: Into<OperationHandle>,
    {
        let handle = handle.into();
        if !self.ops.is_alive(handle) {
            warn!("{} is not tracked by this system. Ignoring the release.", handle);
            return;
        }
        self.release_internal(handle);
    }

    /// The status of an operation.
    pub fn status<H>(&self, handle: H) -> Result<OperationStatus>
    where
        H: Into<OperationHandle>,
    {
        let handle = handle.into();
        self.ops
            .get(handle)
            .map(|op| op.status)
            .ok_or_else(|| Error::OperationHandleInvalid(handle).into())
    }

    /// The result of an operation, downcast to `T`.
    ///
    /// `Ok(None)` means the operation has not delivered anything (yet);
    /// a delivered result of a different type is an error.
    pub fn result<T>(&self, handle: OperationHandle) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        let op = self
            .ops
            .get(handle)
            .ok_or_else(|| -> failure::Error { Error::OperationHandleInvalid(handle).into() })?;
        match op.result {
            Some(ref result) => match Arc::clone(result).downcast::<T>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => Err(Error::ResultTypeMismatch(any::type_name::<T>()).into()),
            },
            None => Ok(None),
        }
    }

    /// The result of a typed operation.
    pub fn result_of<T>(&self, handle: TypedHandle<T>) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        self.result(handle.raw())
    }

    /// The error of a failed operation, `Ok(None)` while it has not failed.
    pub fn error<H>(&self, handle: H) -> Result<Option<Arc<failure::Error>>>
    where
        H: Into<OperationHandle>,
    {
        let handle = handle.into();
        self.ops
            .get(handle)
            .map(|op| op.error.clone())
            .ok_or_else(|| Error::OperationHandleInvalid(handle).into())
    }

    /// A best effort progress estimate in `0.0..=1.0`. Terminal operations
    /// report `1.0`; providers without a progress callback report `0.5`
    /// while in flight; groups average their members.
    pub fn progress<H>(&self, handle: H) -> Result<f32>
    where
        H: Into<OperationHandle>,
    {
        let handle = handle.into();
        match self.ops.get(handle) {
            Some(op) => Ok(self.progress_of(op)),
            None => Err(Error::OperationHandleInvalid(handle).into()),
        }
    }

    /// The number of references currently held on an operation.
    pub fn reference_count<H>(&self, handle: H) -> Result<u32>
    where
        H: Into<OperationHandle>,
    {
        let handle = handle.into();
        self.ops
            .get(handle)
            .map(|op| op.rc)
            .ok_or_else(|| Error::OperationHandleInvalid(handle).into())
    }

    /// Runs `f` when the operation completes.
    ///
    /// A subscription made while the operation is still in flight runs
    /// inline at completion. Subscribing to an operation that has already
    /// completed never runs `f` in the caller's stack frame; it is deferred
    /// to the next [`update`] tick instead.
    ///
    /// [`update`]: ResourceSystem::update
    pub fn on_complete<H, F>(&mut self, handle: H, f: F) -> Result<()>
    where
        H: Into<OperationHandle>,
        F: FnOnce(&mut ResourceSystem, OperationHandle) + 'static,
    {
        let handle = handle.into();
        if !self.ops.is_alive(handle) {
            return Err(Error::OperationHandleInvalid(handle).into());
        }
        self.push_listener(handle, Box::new(f));
        Ok(())
    }

    /// Drives the engine for one tick: updates the providers that asked for
    /// it, executes everything that became ready and flushes callbacks
    /// deferred from the previous tick.
    pub fn update(&mut self, dt: Duration) {
        let receivers = self.update_receivers.clone();
        for provider in receivers {
            provider.update(self, dt);
        }
        self.pump();

        let deferred = mem::replace(&mut self.deferred, Vec::new());
        for (handle, listener) in deferred {
            listener(self, handle);
            self.release_internal(handle);
        }
        self.pump();
    }

    /// Spins [`update`] until the operation completes. Only useful when the
    /// remaining work is driven by updates; an operation waiting on an
    /// outside event that never arrives spins forever.
    ///
    /// [`update`]: ResourceSystem::update
    pub fn wait_for<H>(&mut self, handle: H) -> Result<()>
    where
        H: Into<OperationHandle>,
    {
        let handle = handle.into();
        loop {
            if self.status(handle)?.is_done() {
                return Ok(());
            }
            self.update(Duration::from_secs(0));
            thread::yield_now();
        }
    }

    /// Installs a decoded catalog: applies its provider initialization data
    /// to the registered providers and registers the resulting locator.
    ///
    /// Initialization data addressed at a provider that is not registered is
    /// logged and skipped.
    pub fn load_catalog(&mut self, data: &CatalogData, provider_suffix: Option<&str>) -> Result<Arc<CatalogLocator>> {
        let locator = Arc::new(data.create_locator(provider_suffix)?);
        for pd in &data.provider_data {
            let provider = self.providers.iter().find(|p| p.provider_id() == pd.id).cloned();
            match provider {
                Some(provider) => provider.initialize(&pd.id, &pd.data)?,
                None => warn!("No provider registered for initialization data '{}'. Ignoring.", pd.id),
            }
        }
        info!(
            "Installed catalog '{}' with {} keys.",
            locator.locator_id(),
            locator.len()
        );
        self.locators.push(Arc::clone(&locator) as Arc<dyn Locator>);
        Ok(locator)
    }

    /// Applies runtime settings: the error logging switch, then every
    /// catalog the settings reference, in order.
    pub fn apply_settings(&mut self, settings: &RuntimeSettings) -> Result<()> {
        self.log_errors = settings.log_errors;
        for source in &settings.catalogs {
            let data = CatalogData::load(&source.path)?;
            self.load_catalog(&data, None)?;
            debug!("Applied catalog source '{}' from '{}'.", source.id, source.path);
        }
        Ok(())
    }

    /// Completes the operation behind an outstanding [`ProvideToken`].
    ///
    /// Fails with `TokenExpired` when the operation has been torn down, and
    /// with `AlreadyCompleted` when it reached a terminal status before this
    /// call. An `Ok` value of the wrong type fails the operation and the
    /// call.
    pub fn complete_token<T>(&mut self, token: ProvideToken, result: Result<T>) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        let handle = token.handle;
        let status = match self.ops.get(handle) {
            Some(op) => op.status,
            None => return Err(Error::TokenExpired(handle).into()),
        };
        if status.is_done() {
            return Err(Error::AlreadyCompleted(handle).into());
        }

        match result {
            Ok(value) => {
                let desired = match self.ops.get(handle) {
                    Some(op) => match op.kind {
                        OperationKind::Provider { desired, .. } => Some(desired),
                        _ => None,
                    },
                    None => None,
                };
                if let Some(desired) = desired {
                    if desired != TypeId::of::<T>() {
                        let name = any::type_name::<T>();
                        self.complete_operation(
                            handle,
                            None,
                            Some(Arc::new(Error::ResultTypeMismatch(name).into())),
                        );
                        return Err(Error::ResultTypeMismatch(name).into());
                    }
                }
                self.complete_operation(handle, Some(Arc::new(value)), None);
                Ok(())
            }
            Err(err) => {
                self.complete_operation(handle, None, Some(Arc::new(err)));
                Ok(())
            }
        }
    }

    pub(crate) fn group_len(&self, group: Option<OperationHandle>) -> usize {
        group
            .and_then(|g| self.ops.get(g))
            .map(|op| op.deps.len())
            .unwrap_or(0)
    }

    pub(crate) fn group_result(&self, group: Option<OperationHandle>, index: usize) -> Option<Arc<dyn Any + Send + Sync>> {
        let group = self.ops.get(group?)?;
        let child = group.deps.get(index).cloned()?;
        self.ops.get(child).and_then(|op| op.result.clone())
    }

    pub(crate) fn set_progress_callback(&mut self, handle: OperationHandle, f: Box<dyn Fn() -> f32>) {
        if let Some(op) = self.ops.get_mut(handle) {
            if let OperationKind::Provider { ref mut progress, .. } = op.kind {
                *progress = Some(f);
            }
        }
    }

    fn emit(&self, event: DiagnosticEvent, handle: OperationHandle, value: u32) {
        if let Some(ref f) = self.diagnostics {
            f(event, handle, value);
        }
    }

    fn progress_of(&self, op: &Operation) -> f32 {
        if op.status.is_done() {
            return 1.0;
        }
        if op.status == OperationStatus::NotStarted {
            return 0.0;
        }
        match op.kind {
            OperationKind::Provider { ref progress, .. } => progress
                .as_ref()
                .map(|f| f())
                .unwrap_or(0.5)
                .min(1.0)
                .max(0.0),
            OperationKind::Group => {
                if op.deps.is_empty() {
                    1.0
                } else {
                    let sum: f32 = op
                        .deps
                        .iter()
                        .map(|&d| self.ops.get(d).map(|c| self.progress_of(c)).unwrap_or(1.0))
                        .sum();
                    sum / op.deps.len() as f32
                }
            }
            OperationKind::Chain { wrapped, .. } => wrapped
                .and_then(|w| self.ops.get(w))
                .map(|c| self.progress_of(c))
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn acquire_internal(&mut self, handle: OperationHandle) -> Result<()> {
        let rc = {
            let op = self
                .ops
                .get_mut(handle)
                .ok_or_else(|| -> failure::Error { Error::OperationHandleInvalid(handle).into() })?;
            op.rc += 1;
            op.rc
        };
        self.emit(DiagnosticEvent::ReferenceCountChanged, handle, rc);
        Ok(())
    }

    fn release_internal(&mut self, handle: OperationHandle) {
        let rc = match self.ops.get_mut(handle) {
            Some(op) => {
                op.rc -= 1;
                op.rc
            }
            None => return,
        };
        self.emit(DiagnosticEvent::ReferenceCountChanged, handle, rc);
        if rc == 0 {
            self.destroy_operation(handle);
        }
    }

    fn create_operation(&mut self, ty: OperationType, kind: OperationKind, cache_key: u64) -> OperationHandle {
        let mut op = self.strategy.allocate(ty);
        op.kind = kind;
        op.rc = 1;
        op.cache_key = cache_key;
        let handle = self.ops.create(op);
        if cache_key != 0 {
            self.cache.insert(cache_key, handle);
        }
        self.emit(DiagnosticEvent::Created, handle, 1);
        handle
    }

    /// Moves a freshly created operation into flight: takes the engine's own
    /// reference (held until completion), registers on the dependencies that
    /// are still running and queues the operation if there are none.
    fn start_operation(&mut self, handle: OperationHandle) {
        let (rc, deps) = {
            let op = match self.ops.get_mut(handle) {
                Some(op) => op,
                None => return,
            };
            op.rc += 1;
            op.status = OperationStatus::InProgress;
            (op.rc, op.deps.clone())
        };
        self.emit(DiagnosticEvent::ReferenceCountChanged, handle, rc);

        let mut pending = 0;
        for &dep in deps.iter() {
            let waiting = match self.ops.get_mut(dep) {
                Some(op) if !op.status.is_done() => {
                    op.waiters.push(handle);
                    true
                }
                _ => false,
            };
            if waiting {
                pending += 1;
            }
        }

        let ready = match self.ops.get_mut(handle) {
            Some(op) => {
                op.pending = pending;
                pending == 0
            }
            None => false,
        };
        if ready {
            self.exec.push_back(handle);
        }
    }

    fn complete_operation(
        &mut self,
        handle: OperationHandle,
        result: Option<Arc<dyn Any + Send + Sync>>,
        error: Option<Arc<failure::Error>>,
    ) {
        let (waiters, listeners, err) = {
            let op = match self.ops.get_mut(handle) {
                Some(op) => op,
                None => return,
            };
            if op.status.is_done() {
                warn!("{} was completed twice. Ignoring.", handle);
                return;
            }
            op.status = if error.is_some() {
                OperationStatus::Failed
            } else {
                OperationStatus::Succeeded
            };
            op.result = result;
            op.error = error;
            (
                mem::replace(&mut op.waiters, SmallVec::new()),
                mem::replace(&mut op.listeners, Vec::new()),
                op.error.clone(),
            )
        };

        match err {
            Some(ref err) => {
                self.emit(DiagnosticEvent::Failed, handle, 0);
                if let Some(ref f) = self.error_handler {
                    f(handle, err);
                } else if self.log_errors {
                    error!("{} failed: {}", handle, err);
                }
            }
            None => self.emit(DiagnosticEvent::Completed, handle, 0),
        }

        for waiter in waiters {
            let ready = match self.ops.get_mut(waiter) {
                Some(op) => {
                    op.pending = op.pending.saturating_sub(1);
                    op.pending == 0
                }
                None => false,
            };
            if ready {
                self.exec.push_back(waiter);
            }
        }

        for listener in listeners {
            listener(self, handle);
        }

        // the engine's own reference, taken in start_operation
        self.release_internal(handle);
    }

    fn destroy_operation(&mut self, handle: OperationHandle) {
        let mut op = match self.ops.free(handle) {
            Some(op) => op,
            None => return,
        };
        if op.cache_key != 0 {
            if let Some(&cached) = self.cache.get(&op.cache_key) {
                if cached == handle {
                    self.cache.remove(&op.cache_key);
                }
            }
        }
        self.emit(DiagnosticEvent::Destroyed, handle, 0);

        if let OperationKind::Provider {
            ref provider,
            ref location,
            ..
        } = op.kind
        {
            if op.status == OperationStatus::Succeeded {
                if let Some(ref result) = op.result {
                    provider.release(location, Arc::clone(result));
                }
            }
        }

        for dep in op.deps.drain() {
            self.release_internal(dep);
        }

        let ty = op.ty;
        op.reset();
        self.strategy.release(ty, op);
    }

    fn push_listener(&mut self, handle: OperationHandle, listener: Listener) {
        let done = match self.ops.get(handle) {
            Some(op) => op.status.is_done(),
            None => return,
        };
        if done {
            // the deferred slot owns a reference until the callback has run
            if self.acquire_internal(handle).is_ok() {
                self.deferred.push((handle, listener));
            }
        } else if let Some(op) = self.ops.get_mut(handle) {
            op.listeners.push(listener);
        }
    }

    fn pump(&mut self) {
        while let Some(handle) = self.exec.pop_front() {
            self.execute_operation(handle);
        }
    }

    fn execute_operation(&mut self, handle: OperationHandle) {
        let ty = match self.ops.get(handle) {
            Some(op) if !op.status.is_done() => op.ty,
            _ => return,
        };
        match ty {
            OperationType::Provider => self.execute_provider(handle),
            OperationType::Group => self.execute_group(handle),
            OperationType::Chain => self.execute_chain(handle),
            OperationType::Completed => self.execute_completed(handle),
        }
    }

    fn execute_provider(&mut self, handle: OperationHandle) {
        let fetched = {
            let op = match self.ops.get(handle) {
                Some(op) => op,
                None => return,
            };
            match op.kind {
                OperationKind::Provider {
                    ref provider,
                    ref location,
                    desired,
                    ..
                } => Some((
                    Arc::clone(provider),
                    Arc::clone(location),
                    desired,
                    op.deps.first().cloned(),
                )),
                _ => None,
            }
        };
        let (provider, location, desired, dependency) = match fetched {
            Some(v) => v,
            None => return,
        };

        if let Some(dep) = dependency {
            let dep_failed = self
                .ops
                .get(dep)
                .map(|op| op.status == OperationStatus::Failed)
                .unwrap_or(false);
            if dep_failed && !provider.flags().provide_with_failed_dependencies {
                let message = self
                    .ops
                    .get(dep)
                    .and_then(|op| op.error.clone())
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                self.complete_operation(
                    handle,
                    None,
                    Some(Arc::new(
                        Error::DependencyFailed(location.internal_id().to_string(), message).into(),
                    )),
                );
                return;
            }
        }

        let ctx = ProvideContext::new(self, handle, Arc::clone(&location), desired, dependency);
        if let Err(err) = provider.provide(ctx) {
            let done = self
                .ops
                .get(handle)
                .map(|op| op.status.is_done())
                .unwrap_or(true);
            if !done {
                self.complete_operation(handle, None, Some(Arc::new(err)));
            } else {
                warn!("A provider reported an error after completing {}: {}", handle, err);
            }
        }
    }

    fn execute_group(&mut self, handle: OperationHandle) {
        let children: Vec<OperationHandle> = match self.ops.get(handle) {
            Some(op) => op.deps.iter().cloned().collect(),
            None => return,
        };
        let mut error = None;
        for &child in &children {
            let failed = self
                .ops
                .get(child)
                .map(|op| op.status == OperationStatus::Failed)
                .unwrap_or(false);
            if failed {
                error = Some(
                    self.ops
                        .get(child)
                        .and_then(|op| op.error.clone())
                        .unwrap_or_else(|| Arc::new(format_err!("{} failed.", child))),
                );
                break;
            }
        }
        let result: Arc<dyn Any + Send + Sync> = Arc::new(children);
        self.complete_operation(handle, Some(result), error);
    }

    fn execute_chain(&mut self, handle: OperationHandle) {
        let (continuation, wrapped) = {
            let op = match self.ops.get_mut(handle) {
                Some(op) => op,
                None => return,
            };
            match op.kind {
                OperationKind::Chain {
                    ref mut continuation,
                    wrapped,
                } => (continuation.take(), wrapped),
                _ => return,
            }
        };

        match continuation {
            Some(continuation) => {
                let dep = self.ops.get(handle).and_then(|op| op.deps.first().cloned());
                let dep = match dep {
                    Some(dep) => dep,
                    None => {
                        self.complete_operation(
                            handle,
                            None,
                            Some(Arc::new(format_err!(
                                "{} has no operation to continue from.",
                                handle
                            ))),
                        );
                        return;
                    }
                };
                match continuation(self, dep) {
                    Ok(inner) => {
                        let done = self
                            .ops
                            .get(inner)
                            .map(|op| op.status.is_done())
                            .unwrap_or(true);
                        {
                            let op = match self.ops.get_mut(handle) {
                                Some(op) => op,
                                None => return,
                            };
                            if let OperationKind::Chain { ref mut wrapped, .. } = op.kind {
                                *wrapped = Some(inner);
                            }
                            op.deps.push(inner);
                        }
                        if done {
                            self.finish_chain(handle, inner);
                        } else {
                            if let Some(op) = self.ops.get_mut(inner) {
                                op.waiters.push(handle);
                            }
                            if let Some(op) = self.ops.get_mut(handle) {
                                op.pending = 1;
                            }
                        }
                    }
                    Err(err) => {
                        self.complete_operation(handle, None, Some(Arc::new(err)));
                    }
                }
            }
            None => match wrapped {
                Some(wrapped) => self.finish_chain(handle, wrapped),
                None => self.complete_operation(
                    handle,
                    None,
                    Some(Arc::new(format_err!(
                        "{} resumed without a wrapped operation.",
                        handle
                    ))),
                ),
            },
        }
    }

    fn finish_chain(&mut self, handle: OperationHandle, wrapped: OperationHandle) {
        let (result, error) = match self.ops.get(wrapped) {
            Some(op) => (op.result.clone(), op.error.clone()),
            None => (
                None,
                Some(Arc::new(format_err!(
                    "The wrapped operation of {} disappeared.",
                    handle
                ))),
            ),
        };
        self.complete_operation(handle, result, error);
    }

    fn execute_completed(&mut self, handle: OperationHandle) {
        let (result, error) = {
            let op = match self.ops.get_mut(handle) {
                Some(op) => op,
                None => return,
            };
            match op.kind {
                OperationKind::Completed {
                    ref mut result,
                    ref mut error,
                } => (result.take(), error.take()),
                _ => return,
            }
        };
        self.complete_operation(handle, result, error);
    }

    /// Looks up a cached operation and takes a reference on it for the
    /// caller. Entries whose operation has been torn down are dropped.
    fn cache_lookup(&mut self, cache_key: u64) -> Option<OperationHandle> {
        let handle = self.cache.get(&cache_key).cloned()?;
        if self.ops.is_alive(handle) && self.acquire_internal(handle).is_ok() {
            return Some(handle);
        }
        self.cache.remove(&cache_key);
        None
    }

    fn resource_provider(
        &mut self,
        desired: Option<TypeId>,
        location: &Arc<dyn ResourceLocation>,
    ) -> Option<Arc<dyn ResourceProvider>> {
        let key = hash64(&(location.provider_id(), desired));
        if let Some(&index) = self.provider_cache.get(&key) {
            return self.providers.get(index).cloned();
        }
        let provider_id = location.provider_id();
        for (index, provider) in self.providers.iter().enumerate() {
            if provider.provider_id() != provider_id {
                continue;
            }
            let usable = match desired {
                Some(ty) => provider.can_provide(ty, location),
                None => true,
            };
            if usable {
                self.provider_cache.insert(key, index);
                return Some(Arc::clone(provider));
            }
        }
        None
    }

    fn provide_inner(&mut self, location: &Arc<dyn ResourceLocation>, desired: Option<TypeId>) -> OperationHandle {
        let cache_key = location_cache_key(location, desired);
        if cache_key != 0 {
            if let Some(handle) = self.cache_lookup(cache_key) {
                return handle;
            }
        }
        match self.resource_provider(desired, location) {
            Some(provider) => {
                let desired = desired.unwrap_or_else(|| provider.default_type(location));
                self.provide_with(provider, location, desired, cache_key)
            }
            None => self.create_failed_inner(Error::UnknownProvider(location.provider_id().to_string()).into()),
        }
    }

    fn provide_with(
        &mut self,
        provider: Arc<dyn ResourceProvider>,
        location: &Arc<dyn ResourceLocation>,
        desired: TypeId,
        cache_key: u64,
    ) -> OperationHandle {
        let dependency = self.provide_dependencies(location);
        let kind = OperationKind::Provider {
            provider,
            location: Arc::clone(location),
            desired,
            progress: None,
        };
        let handle = self.create_operation(OperationType::Provider, kind, cache_key);
        if let Some(dep) = dependency {
            if let Some(op) = self.ops.get_mut(handle) {
                // absorbs the creation reference of the dependency group
                op.deps.push(dep);
            }
        }
        self.start_operation(handle);
        handle
    }

    /// Gathers the dependencies of `location` into one group operation.
    /// Groups are shared between locations with the same dependency hash, so
    /// a bundle needed by many assets is loaded once.
    fn provide_dependencies(&mut self, location: &Arc<dyn ResourceLocation>) -> Option<OperationHandle> {
        if !location.has_dependencies() {
            return None;
        }
        let deps = location.dependencies();
        if deps.is_empty() {
            return None;
        }

        let dep_hash = location.dependency_hash();
        let cache_key = if dep_hash == 0 {
            0
        } else {
            (dep_hash as u32 as u64) | (1 << 63)
        };
        if cache_key != 0 {
            if let Some(handle) = self.cache_lookup(cache_key) {
                return Some(handle);
            }
        }

        let children: Vec<OperationHandle> = deps.iter().map(|d| self.provide_inner(d, None)).collect();
        Some(self.create_group_inner(children, cache_key))
    }

    fn create_group_inner(&mut self, children: Vec<OperationHandle>, cache_key: u64) -> OperationHandle {
        let handle = self.create_operation(OperationType::Group, OperationKind::Group, cache_key);
        if let Some(op) = self.ops.get_mut(handle) {
            // absorbs the creation references of the members
            op.deps.extend(children);
        }
        self.start_operation(handle);
        handle
    }

    fn create_chain_inner(&mut self, dependency: OperationHandle, continuation: Continuation) -> OperationHandle {
        let kind = OperationKind::Chain {
            continuation: Some(continuation),
            wrapped: None,
        };
        let handle = self.create_operation(OperationType::Chain, kind, 0);
        if let Some(op) = self.ops.get_mut(handle) {
            op.deps.push(dependency);
        }
        self.start_operation(handle);
        handle
    }

    fn create_completed_inner(
        &mut self,
        result: Option<Arc<dyn Any + Send + Sync>>,
        error: Option<Arc<failure::Error>>,
    ) -> OperationHandle {
        let kind = OperationKind::Completed { result, error };
        let handle = self.create_operation(OperationType::Completed, kind, 0);
        self.start_operation(handle);
        handle
    }

    fn create_failed_inner(&mut self, error: failure::Error) -> OperationHandle {
        self.create_completed_inner(None, Some(Arc::new(error)))
    }

    fn load_list_inner<T>(
        &mut self,
        locations: &[Arc<dyn ResourceLocation>],
        each: Option<Rc<dyn Fn(Arc<T>)>>,
    ) -> TypedHandle<Vec<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        let desired = Some(TypeId::of::<T>());

        let mut group_key = 17u64;
        for location in locations {
            group_key = group_key
                .wrapping_mul(31)
                .wrapping_add(location_cache_key(location, desired));
        }

        let cached = if group_key != 0 {
            self.cache_lookup(group_key)
        } else {
            None
        };
        let group = match cached {
            Some(handle) => handle,
            None => {
                let mut children = Vec::with_capacity(locations.len());
                for location in locations {
                    let child = self.provide_inner(location, desired);
                    if let Some(ref each) = each {
                        let each = Rc::clone(each);
                        self.push_listener(
                            child,
                            Box::new(move |system, handle| {
                                if let Ok(Some(value)) = system.result::<T>(handle) {
                                    each(value);
                                }
                            }),
                        );
                    }
                    children.push(child);
                }
                self.create_group_inner(children, group_key)
            }
        };

        // the chain owns the group and republishes its members as one
        // Vec<Arc<T>> in request order
        let chain = self.create_chain_inner(
            group,
            Box::new(move |system: &mut ResourceSystem, group: OperationHandle| {
                if system.status(group)? == OperationStatus::Failed {
                    let error = system
                        .error(group)?
                        .map(|e| format_err!("{}", e))
                        .unwrap_or_else(|| format_err!("The grouped load failed."));
                    return Err(error);
                }
                let children = system
                    .result::<Vec<OperationHandle>>(group)?
                    .ok_or_else(|| -> failure::Error {
                        format_err!("The grouped load delivered no members.")
                    })?;
                let mut values = Vec::with_capacity(children.len());
                for &child in children.iter() {
                    match system.result::<T>(child)? {
                        Some(value) => values.push(value),
                        None => return Err(Error::ResultTypeMismatch(any::type_name::<T>()).into()),
                    }
                }
                Ok(system.create_completed_inner(Some(Arc::new(values)), None))
            }),
        );
        self.pump();
        TypedHandle::new(chain)
    }
}

fn location_cache_key(location: &Arc<dyn ResourceLocation>, desired: Option<TypeId>) -> u64 {
    let ty = desired.map(|t| hash64(&t)).unwrap_or(0);
    location.hash_code().wrapping_mul(31).wrapping_add(ty)
}

fn identity(location: &Arc<dyn ResourceLocation>) -> usize {
    &**location as *const dyn ResourceLocation as *const u8 as usize
}
