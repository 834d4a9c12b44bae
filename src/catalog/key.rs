use std::fmt;

use inlinable_string::InlinableString;
use uuid::Uuid;

use super::{read_bytes_at, read_i32_at, read_u16_at, read_u32_at, read_u8_at};
use crate::errors::*;
use crate::utils::hash::{fold_i32, stable_hash64};

const TAG_ASCII: u8 = 0;
const TAG_UTF16: u8 = 1;
const TAG_U16: u8 = 2;
const TAG_U32: u8 = 3;
const TAG_I32: u8 = 4;
const TAG_UUID: u8 = 5;
const TAG_JSON: u8 = 6;

/// A key under which locations are published in a catalog. Keys are small
/// tagged values so that addresses, numeric ids and arbitrary typed payloads
/// can all live in one key space and survive the binary key blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// A textual address like `"textures/hero"`.
    Text(InlinableString),
    U16(u16),
    U32(u32),
    I32(i32),
    Uuid(Uuid),
    /// An opaque payload kept as JSON text, tagged with the name of the type
    /// it deserializes into. Two `Json` keys compare equal only when both the
    /// type name and the raw text match.
    Json {
        type_name: InlinableString,
        json: String,
    },
}

impl ResourceKey {
    /// Appends the binary form of this key to `buf`.
    ///
    /// Text is written as ASCII when possible and as UTF-16LE otherwise, so
    /// the common case costs one byte per character. The type name of a
    /// `Json` key must fit in 255 bytes.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match *self {
            ResourceKey::Text(ref v) => {
                if v.is_ascii() {
                    buf.push(TAG_ASCII);
                    super::put_i32(buf, v.len() as i32);
                    buf.extend_from_slice(v.as_bytes());
                } else {
                    let units: Vec<u16> = v.encode_utf16().collect();
                    buf.push(TAG_UTF16);
                    super::put_i32(buf, (units.len() * 2) as i32);
                    for unit in units {
                        super::put_u16(buf, unit);
                    }
                }
            }
            ResourceKey::U16(v) => {
                buf.push(TAG_U16);
                super::put_u16(buf, v);
            }
            ResourceKey::U32(v) => {
                buf.push(TAG_U32);
                super::put_u32(buf, v);
            }
            ResourceKey::I32(v) => {
                buf.push(TAG_I32);
                super::put_i32(buf, v);
            }
            ResourceKey::Uuid(ref v) => {
                buf.push(TAG_UUID);
                buf.extend_from_slice(v.as_bytes());
            }
            ResourceKey::Json {
                ref type_name,
                ref json,
            } => {
                debug_assert!(type_name.len() <= 255);
                buf.push(TAG_JSON);
                buf.push(type_name.len() as u8);
                buf.extend_from_slice(type_name.as_bytes());
                super::put_i32(buf, json.len() as i32);
                buf.extend_from_slice(json.as_bytes());
            }
        }
    }

    /// Reads one key out of `buf` at `offset`. Keys are addressed by offset
    /// instead of read sequentially because bucket records point directly
    /// into the key blob.
    pub fn decode(buf: &[u8], offset: usize) -> Result<ResourceKey> {
        let tag = read_u8_at(buf, offset)?;
        let offset = offset + 1;

        match tag {
            TAG_ASCII => {
                let len = read_i32_at(buf, offset)?;
                if len < 0 {
                    return Err(Error::Malformed(format!("negative text length {}", len)).into());
                }

                let bytes = read_bytes_at(buf, offset + 4, len as usize)?;
                match ::std::str::from_utf8(bytes) {
                    Ok(v) => Ok(ResourceKey::Text(v.into())),
                    Err(_) => Err(Error::Malformed("text key is not valid UTF-8".into()).into()),
                }
            }
            TAG_UTF16 => {
                let len = read_i32_at(buf, offset)?;
                if len < 0 || len % 2 != 0 {
                    return Err(Error::Malformed(format!("bad UTF-16 length {}", len)).into());
                }

                let bytes = read_bytes_at(buf, offset + 4, len as usize)?;
                let units: Vec<u16> = bytes
                    .chunks(2)
                    .map(|v| u16::from(v[0]) | (u16::from(v[1]) << 8))
                    .collect();
                match String::from_utf16(&units) {
                    Ok(v) => Ok(ResourceKey::Text(v.into())),
                    Err(_) => Err(Error::Malformed("text key is not valid UTF-16".into()).into()),
                }
            }
            TAG_U16 => Ok(ResourceKey::U16(read_u16_at(buf, offset)?)),
            TAG_U32 => Ok(ResourceKey::U32(read_u32_at(buf, offset)?)),
            TAG_I32 => Ok(ResourceKey::I32(read_i32_at(buf, offset)?)),
            TAG_UUID => {
                let bytes = read_bytes_at(buf, offset, 16)?;
                match Uuid::from_slice(bytes) {
                    Ok(v) => Ok(ResourceKey::Uuid(v)),
                    Err(_) => Err(Error::Malformed("bad uuid key".into()).into()),
                }
            }
            TAG_JSON => {
                let name_len = read_u8_at(buf, offset)? as usize;
                let name = read_bytes_at(buf, offset + 1, name_len)?;
                let type_name = match ::std::str::from_utf8(name) {
                    Ok(v) => InlinableString::from(v),
                    Err(_) => {
                        return Err(Error::Malformed("json type name is not UTF-8".into()).into());
                    }
                };

                let json_len = read_i32_at(buf, offset + 1 + name_len)?;
                if json_len < 0 {
                    return Err(
                        Error::Malformed(format!("negative json length {}", json_len)).into(),
                    );
                }

                let json = read_bytes_at(buf, offset + 1 + name_len + 4, json_len as usize)?;
                match ::std::str::from_utf8(json) {
                    Ok(v) => Ok(ResourceKey::Json {
                        type_name,
                        json: v.to_string(),
                    }),
                    Err(_) => Err(Error::Malformed("json key is not valid UTF-8".into()).into()),
                }
            }
            _ => Err(Error::Malformed(format!("unknown key tag {}", tag)).into()),
        }
    }

    /// A stable 32 bit hash of this key.
    ///
    /// Integer keys hash to their own value, which keeps synthetic dependency
    /// keys (integers derived from a hash) consistent with the dependency
    /// hashes recorded next to them. Everything else is hashed over its
    /// content with a seed free algorithm, so the result can be persisted.
    pub fn stable_hash(&self) -> i32 {
        match *self {
            ResourceKey::Text(ref v) => fold_i32(stable_hash64(v.as_bytes())),
            ResourceKey::U16(v) => i32::from(v),
            ResourceKey::U32(v) => v as i32,
            ResourceKey::I32(v) => v,
            ResourceKey::Uuid(ref v) => fold_i32(stable_hash64(v.as_bytes())),
            ResourceKey::Json {
                ref type_name,
                ref json,
            } => fold_i32(
                stable_hash64(type_name.as_bytes())
                    .wrapping_mul(31)
                    .wrapping_add(stable_hash64(json.as_bytes())),
            ),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ResourceKey::Text(ref v) => write!(f, "{}", v),
            ResourceKey::U16(v) => write!(f, "{}", v),
            ResourceKey::U32(v) => write!(f, "{}", v),
            ResourceKey::I32(v) => write!(f, "{}", v),
            ResourceKey::Uuid(ref v) => write!(f, "{}", v),
            ResourceKey::Json {
                ref type_name,
                ref json,
            } => write!(f, "{}({})", type_name, json),
        }
    }
}

impl From<&str> for ResourceKey {
    fn from(v: &str) -> Self {
        ResourceKey::Text(v.into())
    }
}

impl From<String> for ResourceKey {
    fn from(v: String) -> Self {
        ResourceKey::Text(v.into())
    }
}

impl From<u16> for ResourceKey {
    fn from(v: u16) -> Self {
        ResourceKey::U16(v)
    }
}

impl From<u32> for ResourceKey {
    fn from(v: u32) -> Self {
        ResourceKey::U32(v)
    }
}

impl From<i32> for ResourceKey {
    fn from(v: i32) -> Self {
        ResourceKey::I32(v)
    }
}

impl From<Uuid> for ResourceKey {
    fn from(v: Uuid) -> Self {
        ResourceKey::Uuid(v)
    }
}
