//! The queryable form of a decoded catalog.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::prelude::*;

use super::{read_i32_at, CatalogData, ResourceKey};
use crate::errors::*;
use crate::location::ResourceLocation;
use crate::locator::Locator;
use crate::utils::hash::stable_hash64;

/// The decoded core of one catalog. Locations point back into this table
/// instead of owning their strings, so a thousand entries cost little more
/// than the table itself.
struct CatalogIndex {
    internal_ids: Vec<String>,
    provider_ids: Vec<String>,
    entries: Vec<CompactEntry>,
    buckets: Vec<Vec<u32>>,
}

struct CompactEntry {
    internal_id: u32,
    provider: u32,
    dep_key: i32,
    dep_hash: i32,
    data: Option<ResourceKey>,
    hash: u64,
}

/// A location living inside a decoded catalog.
///
/// Dependencies are materialized on every call by walking the bucket the
/// entry's dependency key points at. Nothing here refers back to the owning
/// locator, so dropping the locator and the outstanding locations is enough
/// to free the whole catalog.
pub struct CompactLocation {
    index: Arc<CatalogIndex>,
    entry: usize,
}

impl ResourceLocation for CompactLocation {
    fn internal_id(&self) -> &str {
        let e = &self.index.entries[self.entry];
        &self.index.internal_ids[e.internal_id as usize]
    }

    fn provider_id(&self) -> &str {
        let e = &self.index.entries[self.entry];
        &self.index.provider_ids[e.provider as usize]
    }

    fn dependencies(&self) -> Vec<Arc<dyn ResourceLocation>> {
        let e = &self.index.entries[self.entry];
        if e.dep_key < 0 {
            return Vec::new();
        }

        self.index.buckets[e.dep_key as usize]
            .iter()
            .map(|&v| {
                Arc::new(CompactLocation {
                    index: self.index.clone(),
                    entry: v as usize,
                }) as Arc<dyn ResourceLocation>
            })
            .collect()
    }

    fn has_dependencies(&self) -> bool {
        self.index.entries[self.entry].dep_key >= 0
    }

    fn dependency_hash(&self) -> i32 {
        self.index.entries[self.entry].dep_hash
    }

    fn data(&self) -> Option<&ResourceKey> {
        self.index.entries[self.entry].data.as_ref()
    }

    fn hash_code(&self) -> u64 {
        self.index.entries[self.entry].hash
    }
}

impl fmt::Debug for CompactLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompactLocation")
            .field("internal_id", &self.internal_id())
            .field("provider_id", &self.provider_id())
            .finish()
    }
}

/// A locator decoded from [`CatalogData`], resolving every key the catalog
/// was packed with.
pub struct CatalogLocator {
    locator_id: String,
    map: HashMap<ResourceKey, Vec<Arc<dyn ResourceLocation>>>,
}

impl CatalogLocator {
    /// Decodes a packed catalog. Every offset, length and index in the blobs
    /// is validated; damaged input comes back as `Error::Malformed` instead
    /// of tearing down the caller.
    pub fn from_data(data: &CatalogData, provider_suffix: Option<&str>) -> Result<Self> {
        let key_blob = decode_blob(&data.key_data, "key")?;
        let bucket_blob = decode_blob(&data.bucket_data, "bucket")?;
        let entry_blob = decode_blob(&data.entry_data, "entry")?;
        let extra_blob = decode_blob(&data.extra_data, "extra data")?;

        // Buckets first. Their records carry the byte offset of each key in
        // the key blob, so keys decode by direct addressing afterwards.
        let bucket_count = read_i32_at(&bucket_blob, 0)?;
        if bucket_count < 0 {
            return Err(Error::Malformed("negative bucket count".into()).into());
        }

        let mut buckets = Vec::with_capacity(bucket_count as usize);
        let mut key_offsets = Vec::with_capacity(bucket_count as usize);
        let mut offset = 4usize;
        for _ in 0..bucket_count {
            let data_offset = read_i32_at(&bucket_blob, offset)?;
            let entry_count = read_i32_at(&bucket_blob, offset + 4)?;
            offset += 8;

            if data_offset < 0
                || entry_count < 0
                || entry_count as usize > bucket_blob.len().saturating_sub(offset) / 4
            {
                return Err(Error::Malformed("bucket table is damaged".into()).into());
            }

            let mut entries = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let e = read_i32_at(&bucket_blob, offset)?;
                offset += 4;
                if e < 0 {
                    return Err(Error::Malformed("negative entry index in bucket".into()).into());
                }
                entries.push(e as u32);
            }

            key_offsets.push(data_offset as usize);
            buckets.push(entries);
        }

        let key_count = read_i32_at(&key_blob, 0)?;
        if key_count != bucket_count {
            return Err(Error::Malformed(format!(
                "key blob declares {} keys but the bucket table has {}",
                key_count, bucket_count
            ))
            .into());
        }

        let mut keys = Vec::with_capacity(bucket_count as usize);
        for &at in &key_offsets {
            keys.push(ResourceKey::decode(&key_blob, at)?);
        }

        let provider_ids: Vec<String> = data
            .provider_ids
            .iter()
            .map(|id| match provider_suffix {
                Some(suffix) if !suffix.is_empty() && !id.ends_with(suffix) => {
                    format!("{}{}", id, suffix)
                }
                _ => id.clone(),
            })
            .collect();

        let entry_count = read_i32_at(&entry_blob, 0)?;
        if entry_count < 0 || entry_count as usize > entry_blob.len().saturating_sub(4) / 20 {
            return Err(Error::Malformed("entry table is damaged".into()).into());
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for i in 0..entry_count as usize {
            let at = 4 + i * 20;
            let internal_id = read_i32_at(&entry_blob, at)?;
            let provider = read_i32_at(&entry_blob, at + 4)?;
            let dep_key = read_i32_at(&entry_blob, at + 8)?;
            let dep_hash = read_i32_at(&entry_blob, at + 12)?;
            let data_offset = read_i32_at(&entry_blob, at + 16)?;

            if internal_id < 0 || internal_id as usize >= data.internal_ids.len() {
                return Err(Error::Malformed(format!(
                    "entry {} references internal id {}",
                    i, internal_id
                ))
                .into());
            }

            if provider < 0 || provider as usize >= provider_ids.len() {
                return Err(
                    Error::Malformed(format!("entry {} references provider {}", i, provider))
                        .into(),
                );
            }

            if dep_key >= bucket_count {
                return Err(Error::Malformed(format!(
                    "entry {} references dependency key {}",
                    i, dep_key
                ))
                .into());
            }

            let extra = if data_offset < 0 {
                None
            } else {
                Some(ResourceKey::decode(&extra_blob, data_offset as usize)?)
            };

            let hash = stable_hash64(data.internal_ids[internal_id as usize].as_bytes())
                .wrapping_mul(31)
                .wrapping_add(stable_hash64(provider_ids[provider as usize].as_bytes()));

            entries.push(CompactEntry {
                internal_id: internal_id as u32,
                provider: provider as u32,
                dep_key,
                dep_hash,
                data: extra,
                hash,
            });
        }

        let index = Arc::new(CatalogIndex {
            internal_ids: data.internal_ids.clone(),
            provider_ids,
            entries,
            buckets,
        });

        // One shared location per entry; every bucket that mentions the
        // entry hands out the same instance.
        let locations: Vec<Arc<dyn ResourceLocation>> = (0..index.entries.len())
            .map(|entry| {
                Arc::new(CompactLocation {
                    index: index.clone(),
                    entry,
                }) as Arc<dyn ResourceLocation>
            })
            .collect();

        let mut map = HashMap::with_capacity(keys.len());
        for (i, key) in keys.into_iter().enumerate() {
            let mut list = Vec::with_capacity(index.buckets[i].len());
            for &e in &index.buckets[i] {
                let location = locations.get(e as usize).cloned().ok_or_else(|| {
                    Error::Malformed(format!(
                        "bucket references entry {} of {}",
                        e,
                        locations.len()
                    ))
                })?;
                list.push(location);
            }
            map.insert(key, list);
        }

        Ok(CatalogLocator {
            locator_id: data.locator_id.clone(),
            map,
        })
    }

    /// The identifier the catalog was published under.
    pub fn locator_id(&self) -> &str {
        &self.locator_id
    }

    /// An iterator over all keys this catalog can resolve.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.map.keys()
    }

    /// The number of distinct keys in this catalog.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Checks if the catalog resolves no keys at all.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Locator for CatalogLocator {
    fn locate(&self, key: &ResourceKey) -> Option<&[Arc<dyn ResourceLocation>]> {
        self.map.get(key).map(|v| v.as_slice())
    }
}

fn decode_blob(encoded: &str, which: &str) -> Result<Vec<u8>> {
    match BASE64_STANDARD.decode(encoded) {
        Ok(v) => Ok(v),
        Err(err) => {
            Err(Error::Malformed(format!("bad base64 in the {} blob ({})", which, err)).into())
        }
    }
}
