use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

use super::ResourceSystem;
use crate::errors::Result;
use crate::location::ResourceLocation;
use crate::provider::ResourceProvider;

impl_handle!(OperationHandle);

/// Where an operation stands in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

impl OperationStatus {
    /// Checks if the operation has reached a terminal status. Terminal
    /// operations never change status again.
    pub fn is_done(self) -> bool {
        match self {
            OperationStatus::Succeeded | OperationStatus::Failed => true,
            _ => false,
        }
    }
}

/// The shape of an operation, used to pool recycled shells of the same kind
/// together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Asks a provider to deliver one location.
    Provider,
    /// Waits for a batch of child operations.
    Group,
    /// Continues into a second operation once a dependency finishes.
    Chain,
    /// Born with its outcome already known.
    Completed,
}

pub(crate) type Listener = Box<dyn FnOnce(&mut ResourceSystem, OperationHandle)>;
pub(crate) type Continuation =
    Box<dyn FnOnce(&mut ResourceSystem, OperationHandle) -> Result<OperationHandle>>;

pub(crate) enum OperationKind {
    /// A blank shell sitting in an allocation pool is `Idle` until the
    /// system assigns it real work.
    Idle,
    Provider {
        provider: Arc<dyn ResourceProvider>,
        location: Arc<dyn ResourceLocation>,
        desired: TypeId,
        progress: Option<Box<dyn Fn() -> f32>>,
    },
    Group,
    Chain {
        continuation: Option<Continuation>,
        wrapped: Option<OperationHandle>,
    },
    Completed {
        result: Option<Arc<dyn Any + Send + Sync>>,
        error: Option<Arc<failure::Error>>,
    },
}

/// One tracked unit of asynchronous work. The engine owns every `Operation`
/// in a slot arena; the outside world only ever sees [`OperationHandle`]s.
pub struct Operation {
    pub(crate) status: OperationStatus,
    pub(crate) rc: u32,
    pub(crate) ty: OperationType,
    pub(crate) kind: OperationKind,
    pub(crate) cache_key: u64,
    pub(crate) result: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) error: Option<Arc<failure::Error>>,
    pub(crate) deps: SmallVec<[OperationHandle; 4]>,
    pub(crate) waiters: SmallVec<[OperationHandle; 4]>,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) pending: u32,
}

impl Operation {
    /// A freshly allocated shell with no work assigned yet. Allocation
    /// strategies hand these out when their pools run dry.
    pub fn blank(ty: OperationType) -> Self {
        Operation {
            status: OperationStatus::NotStarted,
            rc: 0,
            ty,
            kind: OperationKind::Idle,
            cache_key: 0,
            result: None,
            error: None,
            deps: SmallVec::new(),
            waiters: SmallVec::new(),
            listeners: Vec::new(),
            pending: 0,
        }
    }

    /// The pooling shape of this operation.
    pub fn ty(&self) -> OperationType {
        self.ty
    }

    /// Clears everything except the pooling shape, readying the shell for
    /// reuse.
    pub(crate) fn reset(&mut self) {
        self.status = OperationStatus::NotStarted;
        self.rc = 0;
        self.kind = OperationKind::Idle;
        self.cache_key = 0;
        self.result = None;
        self.error = None;
        self.deps.clear();
        self.waiters.clear();
        self.listeners.clear();
        self.pending = 0;
    }
}

/// An [`OperationHandle`] that remembers which result type it was created
/// for, so results come back as `Arc<T>` without a turbofish at every call
/// site.
pub struct TypedHandle<T> {
    raw: OperationHandle,
    _marker: PhantomData<T>,
}

impl<T> TypedHandle<T> {
    pub(crate) fn new(raw: OperationHandle) -> Self {
        TypedHandle {
            raw,
            _marker: PhantomData,
        }
    }

    /// The untyped handle backing this one.
    pub fn raw(&self) -> OperationHandle {
        self.raw
    }
}

impl<T> Clone for TypedHandle<T> {
    fn clone(&self) -> Self {
        TypedHandle::new(self.raw)
    }
}

impl<T> Copy for TypedHandle<T> {}

impl<T> PartialEq for TypedHandle<T> {
    fn eq(&self, rhs: &Self) -> bool {
        self.raw == rhs.raw
    }
}

impl<T> Eq for TypedHandle<T> {}

impl<T> Hash for TypedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> From<TypedHandle<T>> for OperationHandle {
    fn from(v: TypedHandle<T>) -> Self {
        v.raw
    }
}

impl<T> fmt::Debug for TypedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TypedHandle({:?})", self.raw)
    }
}

impl<T> fmt::Display for TypedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
