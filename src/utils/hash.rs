use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hashes a value with the process-local `DefaultHasher`. The result is only
/// meaningful within the current process; never persist it.
pub fn hash64<T: Hash + ?Sized>(t: &T) -> u64 {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}

/// Hashes a byte slice with a stable, seed-free algorithm. Safe to embed in
/// serialized catalogs and to compare across builds and platforms.
#[inline]
pub fn stable_hash64(bytes: &[u8]) -> u64 {
    ::seahash::hash(bytes)
}

/// Folds a stable 64-bit hash down to the 32-bit signed form stored in
/// catalog entries.
#[inline]
pub fn fold_i32(v: u64) -> i32 {
    (v ^ (v >> 32)) as u32 as i32
}
