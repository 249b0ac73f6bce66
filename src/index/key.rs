use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::Rid;

/// A fixed-width key or value that can live in an index page slot.
///
/// Index pages are flat arrays of `(key, value)` slots, so every type stored
/// in one must encode to a known number of bytes. Ordering of the decoded
/// values must agree with `Ord` on the type itself.
pub trait Storable: Clone + PartialEq + Send + Sync + 'static {
    /// Encoded width in bytes
    fn encoded_size() -> usize;

    /// Write the value into `buf[..Self::encoded_size()]`
    fn encode(&self, buf: &mut [u8]);

    /// Read a value back from `buf[..Self::encoded_size()]`
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_storable_int {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Storable for $ty {
            fn encoded_size() -> usize {
                std::mem::size_of::<$ty>()
            }

            fn encode(&self, buf: &mut [u8]) {
                LittleEndian::$write(buf, *self);
            }

            fn decode(buf: &[u8]) -> Self {
                LittleEndian::$read(buf)
            }
        }
    };
}

impl_storable_int!(u32, write_u32, read_u32);
impl_storable_int!(i32, write_i32, read_i32);
impl_storable_int!(u64, write_u64, read_u64);
impl_storable_int!(i64, write_i64, read_i64);

impl Storable for Rid {
    fn encoded_size() -> usize {
        8
    }

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot_num);
    }

    fn decode(buf: &[u8]) -> Self {
        Rid {
            page_id: LittleEndian::read_u32(&buf[0..4]),
            slot_num: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

/// Downcast of the 64-bit hash of a key's encoding to 32 bits, used by the
/// extendible hash directory to pick bucket bits.
pub fn hash_key<K: Storable>(key: &K) -> u32 {
    let mut buf = vec![0u8; K::encoded_size()];
    key.encode(&mut buf);
    let mut hasher = DefaultHasher::new();
    hasher.write(&buf);
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_round_trip() {
        let mut buf = [0u8; 8];
        42i64.encode(&mut buf);
        assert_eq!(i64::decode(&buf), 42);

        let mut buf = [0u8; 4];
        (-7i32).encode(&mut buf);
        assert_eq!(i32::decode(&buf), -7);
    }

    #[test]
    fn test_rid_round_trip() {
        let rid = Rid::new(12, 34);
        let mut buf = [0u8; 8];
        rid.encode(&mut buf);
        assert_eq!(Rid::decode(&buf), rid);
    }

    #[test]
    fn test_hash_is_stable_per_key() {
        assert_eq!(hash_key(&5u32), hash_key(&5u32));
        // Not a collision test, just a sanity check that keys spread
        assert_ne!(hash_key(&5u32), hash_key(&6u32));
    }
}
