pub use crate::catalog::{CatalogData, CatalogEntry, CatalogLocator, ProviderData, ResourceKey};

pub use crate::errors::{Error, Result};

pub use crate::location::{LocationInfo, ResourceLocation};

pub use crate::locator::{LocationMap, Locator, MergeMode};

pub use crate::ops::{
    DiagnosticEvent, OperationHandle, OperationStatus, ResourceSystem, TypedHandle,
};
pub use crate::ops::{AllocationStrategy, HeapAllocationStrategy, LruAllocationStrategy};

pub use crate::provider::{
    FileDataProvider, JsonDataProvider, ProvideContext, ProvideToken, ProviderFlags,
    ResourceProvider, TextDataProvider,
};

pub use crate::settings::{CatalogSource, RuntimeSettings};
