//! Index key abstraction.
//!
//! Trees are generic over the key type of the indexed field. Keys are
//! fixed-width so leaf headers can cache min/max bounds and internal
//! nodes can lay keys out as a flat array.

use lasdb_common::types::Field;

/// A comparable, fixed-width key extracted from a tuple field.
pub trait IndexKey:
    Copy + Ord + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static
{
    /// Smallest representable key (stand-in for negative infinity).
    const MIN: Self;
    /// Largest representable key (stand-in for positive infinity).
    const MAX: Self;

    /// Encoded width in bytes.
    fn encoded_len() -> usize;

    /// Writes the key into the first `encoded_len()` bytes of `buf`.
    fn write_to(self, buf: &mut [u8]);

    /// Reads a key from the first `encoded_len()` bytes of `buf`.
    fn read_from(buf: &[u8]) -> Self;

    /// Extracts a key from a field value, if the types line up.
    fn from_field(field: &Field) -> Option<Self>;

    /// Converts the key back into a field value.
    fn into_field(self) -> Field;
}

impl IndexKey for i32 {
    const MIN: Self = i32::MIN;
    const MAX: Self = i32::MAX;

    fn encoded_len() -> usize {
        4
    }

    fn write_to(self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    fn from_field(field: &Field) -> Option<Self> {
        field.as_int()
    }

    fn into_field(self) -> Field {
        Field::Int(self)
    }
}

impl IndexKey for i64 {
    const MIN: Self = i64::MIN;
    const MAX: Self = i64::MAX;

    fn encoded_len() -> usize {
        8
    }

    fn write_to(self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        i64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }

    fn from_field(field: &Field) -> Option<Self> {
        // 64-bit keys are carried in Int fields widened by the caller;
        // no Field variant stores i64 natively.
        field.as_int().map(|v| v as i64)
    }

    fn into_field(self) -> Field {
        Field::Int(self as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_roundtrip() {
        let mut buf = [0u8; 4];
        for v in [0i32, 1, -1, i32::MIN, i32::MAX, 123_456] {
            v.write_to(&mut buf);
            assert_eq!(i32::read_from(&buf), v);
        }
    }

    #[test]
    fn test_i64_roundtrip() {
        let mut buf = [0u8; 8];
        for v in [0i64, 1, -1, i64::MIN, i64::MAX] {
            v.write_to(&mut buf);
            assert_eq!(i64::read_from(&buf), v);
        }
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(<i32 as IndexKey>::encoded_len(), 4);
        assert_eq!(<i64 as IndexKey>::encoded_len(), 8);
    }

    #[test]
    fn test_from_field() {
        assert_eq!(i32::from_field(&Field::Int(9)), Some(9));
        assert_eq!(i32::from_field(&Field::Char("9".to_string())), None);
    }

    #[test]
    fn test_into_field() {
        assert_eq!(7i32.into_field(), Field::Int(7));
    }

    #[test]
    fn test_sentinels() {
        assert!(<i32 as IndexKey>::MIN < 0);
        assert!(<i32 as IndexKey>::MAX > 0);
    }
}
