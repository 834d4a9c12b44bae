//! Bundled providers for plain files on the local file system.
//!
//! These cover the common trailing edge of a catalog: raw bytes, text and
//! JSON documents. They complete synchronously inside `provide`, so a load
//! that only touches them finishes within the tick that started it.

use std::any::TypeId;
use std::fs;
use std::sync::Arc;

use super::{ProvideContext, ResourceProvider};
use crate::errors::*;
use crate::location::ResourceLocation;

/// Delivers the raw bytes of a file as `Vec<u8>`.
#[derive(Debug, Default)]
pub struct FileDataProvider;

impl FileDataProvider {
    pub const ID: &'static str = "file-data";
}

impl ResourceProvider for FileDataProvider {
    fn provider_id(&self) -> &str {
        Self::ID
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<Vec<u8>>()
    }

    fn provide(&self, ctx: ProvideContext) -> Result<()> {
        let path = ctx.internal_id();
        let bytes =
            fs::read(&path).map_err(|err| format_err!("Could not read '{}': {}", path, err))?;
        ctx.complete(Ok(bytes))
    }
}

/// Delivers a UTF-8 file as `String`.
#[derive(Debug, Default)]
pub struct TextDataProvider;

impl TextDataProvider {
    pub const ID: &'static str = "text-data";
}

impl ResourceProvider for TextDataProvider {
    fn provider_id(&self) -> &str {
        Self::ID
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<String>()
    }

    fn provide(&self, ctx: ProvideContext) -> Result<()> {
        let path = ctx.internal_id();
        let text = fs::read_to_string(&path)
            .map_err(|err| format_err!("Could not read '{}': {}", path, err))?;
        ctx.complete(Ok(text))
    }
}

/// Parses a JSON file into a `serde_json::Value`.
#[derive(Debug, Default)]
pub struct JsonDataProvider;

impl JsonDataProvider {
    pub const ID: &'static str = "json-data";
}

impl ResourceProvider for JsonDataProvider {
    fn provider_id(&self) -> &str {
        Self::ID
    }

    fn default_type(&self, _location: &Arc<dyn ResourceLocation>) -> TypeId {
        TypeId::of::<serde_json::Value>()
    }

    fn provide(&self, ctx: ProvideContext) -> Result<()> {
        let path = ctx.internal_id();
        let text = fs::read_to_string(&path)
            .map_err(|err| format_err!("Could not read '{}': {}", path, err))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| format_err!("'{}' is not valid JSON: {}", path, err))?;
        ctx.complete(Ok(value))
    }
}
