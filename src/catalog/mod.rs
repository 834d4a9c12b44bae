//! The compact, serializable catalog format.
//!
//! A catalog is the publishable form of a location set. Authors describe
//! their content as plain [`CatalogEntry`] records; [`CatalogData`] packs
//! those records into four base64 blobs that decode quickly and stay small
//! on disk:
//!
//! - the key blob holds every key once, behind a count prefix;
//! - the bucket blob pairs each key with the entries that declare it, and
//!   remembers where the key starts in the key blob;
//! - the entry blob is a fixed stride table, five little endian `i32`s per
//!   entry (internal id, provider, dependency key, dependency hash, extra
//!   data offset);
//! - the extra data blob holds optional per entry payloads, addressed by
//!   offset.
//!
//! Entries that share two or more dependencies are folded behind a synthetic
//! integer key at pack time, so a decoded catalog resolves the whole group
//! through one bucket and loads it once. Decoding never trusts the input:
//! every offset and length is checked, and a damaged catalog surfaces as
//! [`Error::Malformed`](crate::errors::Error).

pub mod key;
pub mod locator;

pub use self::key::ResourceKey;
pub use self::locator::{CatalogLocator, CompactLocation};

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::Path;

use base64::prelude::*;
use byteorder::{ByteOrder, LittleEndian};

use crate::errors::*;

/// One loadable thing, as described by a catalog author.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// The identifier handed to the provider, usually a path or URL.
    pub internal_id: String,
    /// The provider that understands this entry.
    pub provider_id: String,
    /// The keys under which this entry can be located.
    pub keys: Vec<ResourceKey>,
    /// Keys of the entries that must be delivered first.
    pub dependencies: Vec<ResourceKey>,
    /// Optional payload handed to the provider along with the location.
    pub data: Option<ResourceKey>,
}

/// Initialization payload for one provider, applied when the catalog is
/// installed at runtime.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProviderData {
    pub id: String,
    /// Name of the provider type this record configures, carried for
    /// diagnostics and external tooling.
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// The packed form of a catalog, ready for serde.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CatalogData {
    #[serde(default)]
    pub locator_id: String,
    pub provider_ids: Vec<String>,
    pub internal_ids: Vec<String>,
    #[serde(default)]
    pub provider_data: Vec<ProviderData>,
    pub key_data: String,
    pub bucket_data: String,
    pub entry_data: String,
    pub extra_data: String,
}

impl CatalogData {
    /// Packs entries into their binary form.
    ///
    /// Fails when a dependency group references a key that no entry
    /// declares, since such a group could never be resolved after decoding.
    pub fn from_entries(locator_id: &str, entries: &[CatalogEntry]) -> Result<CatalogData> {
        // Dependency lists get rewritten below; the caller's data stays
        // intact.
        let mut deps: Vec<Vec<ResourceKey>> =
            entries.iter().map(|e| e.dependencies.clone()).collect();

        let mut providers = Interner::new();
        let mut internal_ids = Interner::new();
        let mut entry_meta = Vec::with_capacity(entries.len());
        for e in entries {
            let ii = internal_ids.intern(&e.internal_id);
            let pi = providers.intern(&e.provider_id);
            entry_meta.push((ii, pi));
        }

        let mut keys: Interner<ResourceKey> = Interner::new();
        for e in entries {
            for k in &e.keys {
                keys.intern(k);
            }
        }
        for e in entries {
            for k in &e.dependencies {
                keys.intern(k);
            }
        }

        // One bucket per key, in key order, listing the entries that declare
        // the key. Keys that only ever appear as dependencies keep an empty
        // bucket.
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); keys.len()];
        let mut extra = Vec::new();
        let mut extra_offsets = Vec::with_capacity(entries.len());

        for (i, e) in entries.iter().enumerate() {
            let offset = match e.data {
                Some(ref data) => {
                    let at = extra.len() as i32;
                    data.encode(&mut extra);
                    at
                }
                None => -1,
            };
            extra_offsets.push(offset);

            for k in &e.keys {
                if let Some(ki) = keys.index_of(k) {
                    buckets[ki].push(i);
                }
            }
        }

        // Entries sharing two or more dependencies get them folded behind a
        // synthetic integer key, so the decoded catalog resolves the whole
        // group through a single bucket. The synthetic bucket points at the
        // first entry declaring each dependency key.
        for (i, e) in entries.iter().enumerate() {
            if deps[i].len() < 2 {
                continue;
            }

            let mut hash: i32 = 1009;
            for k in &deps[i] {
                hash = hash.wrapping_mul(9176).wrapping_add(k.stable_hash());
            }

            let synthetic = ResourceKey::I32(hash);
            if keys.index_of(&synthetic).is_none() {
                let mut bucket = Vec::with_capacity(deps[i].len());
                for k in &deps[i] {
                    match keys.index_of(k).and_then(|ki| buckets[ki].first().cloned()) {
                        Some(v) => bucket.push(v),
                        None => bail!(
                            "Dependency '{}' of '{}' is not declared by any catalog entry.",
                            k,
                            e.internal_id
                        ),
                    }
                }

                keys.intern(&synthetic);
                buckets.push(bucket);
            }

            deps[i] = vec![synthetic];
        }

        // keys[i] pairs with buckets[i]. Bucket records point at the byte
        // where their key starts, count prefix included.
        let mut key_blob = Vec::new();
        put_i32(&mut key_blob, keys.len() as i32);
        let mut bucket_blob = Vec::new();
        put_i32(&mut bucket_blob, keys.len() as i32);

        for (i, k) in keys.values.iter().enumerate() {
            put_i32(&mut bucket_blob, key_blob.len() as i32);
            put_i32(&mut bucket_blob, buckets[i].len() as i32);
            for &entry in &buckets[i] {
                put_i32(&mut bucket_blob, entry as i32);
            }
            k.encode(&mut key_blob);
        }

        let mut entry_blob = Vec::new();
        put_i32(&mut entry_blob, entries.len() as i32);
        for (i, _) in entries.iter().enumerate() {
            let dep_key = match deps[i].first() {
                Some(k) => keys.index_of(k).map(|v| v as i32).unwrap_or(-1),
                None => -1,
            };

            let mut dep_hash: i32 = 0;
            for k in &deps[i] {
                dep_hash = dep_hash.wrapping_mul(31).wrapping_add(k.stable_hash());
            }

            let (ii, pi) = entry_meta[i];
            put_i32(&mut entry_blob, ii as i32);
            put_i32(&mut entry_blob, pi as i32);
            put_i32(&mut entry_blob, dep_key);
            put_i32(&mut entry_blob, dep_hash);
            put_i32(&mut entry_blob, extra_offsets[i]);
        }

        Ok(CatalogData {
            locator_id: locator_id.to_string(),
            provider_ids: providers.values,
            internal_ids: internal_ids.values,
            provider_data: Vec::new(),
            key_data: BASE64_STANDARD.encode(&key_blob),
            bucket_data: BASE64_STANDARD.encode(&bucket_blob),
            entry_data: BASE64_STANDARD.encode(&entry_blob),
            extra_data: BASE64_STANDARD.encode(&extra),
        })
    }

    /// Decodes the blobs into a queryable locator. `provider_suffix` is
    /// appended to every provider id that does not carry it yet, which lets
    /// one catalog serve several provider flavours.
    pub fn create_locator(&self, provider_suffix: Option<&str>) -> Result<CatalogLocator> {
        CatalogLocator::from_data(self, provider_suffix)
    }

    /// Reads packed catalog data from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CatalogData> {
        let bytes = fs::read(path.as_ref()).map_err(|err| {
            format_err!(
                "Could not read the catalog at '{}': {}",
                path.as_ref().display(),
                err
            )
        })?;
        let data = serde_json::from_slice(&bytes)?;
        Ok(data)
    }

    /// Writes packed catalog data as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path.as_ref(), json).map_err(|err| {
            format_err!(
                "Could not write the catalog at '{}': {}",
                path.as_ref().display(),
                err
            )
        })?;
        Ok(())
    }
}

/// Interns values, handing out indices in first appearance order.
struct Interner<T: Clone + Eq + Hash> {
    values: Vec<T>,
    indices: HashMap<T, usize>,
}

impl<T: Clone + Eq + Hash> Interner<T> {
    fn new() -> Self {
        Interner {
            values: Vec::new(),
            indices: HashMap::new(),
        }
    }

    fn intern(&mut self, v: &T) -> usize {
        if let Some(&i) = self.indices.get(v) {
            return i;
        }

        let i = self.values.len();
        self.values.push(v.clone());
        self.indices.insert(v.clone(), i);
        i
    }

    fn index_of(&self, v: &T) -> Option<usize> {
        self.indices.get(v).cloned()
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, v: u16) {
    let mut b = [0; 2];
    LittleEndian::write_u16(&mut b, v);
    buf.extend_from_slice(&b);
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    let mut b = [0; 4];
    LittleEndian::write_u32(&mut b, v);
    buf.extend_from_slice(&b);
}

pub(crate) fn put_i32(buf: &mut Vec<u8>, v: i32) {
    let mut b = [0; 4];
    LittleEndian::write_i32(&mut b, v);
    buf.extend_from_slice(&b);
}

pub(crate) fn read_bytes_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    if buf.len() < len || offset > buf.len() - len {
        return Err(Error::Malformed(format!(
            "read of {} bytes at {} overruns a {} byte blob",
            len,
            offset,
            buf.len()
        ))
        .into());
    }

    Ok(&buf[offset..offset + len])
}

pub(crate) fn read_u8_at(buf: &[u8], offset: usize) -> Result<u8> {
    read_bytes_at(buf, offset, 1).map(|v| v[0])
}

pub(crate) fn read_u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    read_bytes_at(buf, offset, 2).map(LittleEndian::read_u16)
}

pub(crate) fn read_u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    read_bytes_at(buf, offset, 4).map(LittleEndian::read_u32)
}

pub(crate) fn read_i32_at(buf: &[u8], offset: usize) -> Result<i32> {
    read_bytes_at(buf, offset, 4).map(LittleEndian::read_i32)
}
