//!
//! Untagged Datum Representation
//!
//! A `Datum` is one machine word. By-value types (integers, floats, bool,
//! oid, timestamps) live in the word itself; by-reference types (text,
//! bytea, rows) store a handle that the host resolves to varlena storage.
//!
//! Word conventions follow the host:
//! - signed types are sign-extended to 64 bits
//! - unsigned types are zero-extended
//! - `f32` stores its IEEE bits in the low 32 bits, `f64` uses the whole word
//! - `bool` is 0 or 1
//!
//! Accessors only look at the bits the type occupies, so reading a `Datum`
//! with the wrong accessor yields garbage but never touches memory.
//!

use std::fmt;

/// Julian day of 2000-01-01, the host's timestamp epoch.
pub const POSTGRES_EPOCH_JDATE: i64 = 2_451_545;
/// Julian day of 1970-01-01.
pub const UNIX_EPOCH_JDATE: i64 = 2_440_588;
pub const SECS_PER_DAY: i64 = 86_400;

/// Milliseconds between the Unix epoch and the host's timestamp epoch.
pub const EPOCH_DIFF_MS: i64 = (POSTGRES_EPOCH_JDATE - UNIX_EPOCH_JDATE) * SECS_PER_DAY * 1000;

/// A single untagged machine word crossing the host boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Datum(u64);

impl Datum {
    /// The all-zero word, used as the placeholder for NULL entries.
    pub const NULL: Datum = Datum(0);

    pub const fn from_raw(word: u64) -> Self {
        Datum(word)
    }

    /// The raw word, exactly as the host sees it.
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn from_i64(v: i64) -> Self {
        Datum(v as u64)
    }

    pub const fn from_u64(v: u64) -> Self {
        Datum(v)
    }

    pub const fn from_i32(v: i32) -> Self {
        Datum(v as i64 as u64)
    }

    pub const fn from_u32(v: u32) -> Self {
        Datum(v as u64)
    }

    pub const fn from_i16(v: i16) -> Self {
        Datum(v as i64 as u64)
    }

    pub const fn from_u16(v: u16) -> Self {
        Datum(v as u64)
    }

    /// Equivalent of the host's `"char"` conversion.
    pub const fn from_i8(v: i8) -> Self {
        Datum(v as i64 as u64)
    }

    pub const fn from_u8(v: u8) -> Self {
        Datum(v as u64)
    }

    pub fn from_f64(v: f64) -> Self {
        Datum(v.to_bits())
    }

    pub fn from_f32(v: f32) -> Self {
        Datum(v.to_bits() as u64)
    }

    pub const fn from_bool(v: bool) -> Self {
        Datum(v as u64)
    }

    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    pub const fn as_i16(self) -> i16 {
        self.0 as i16
    }

    pub const fn as_u16(self) -> u16 {
        self.0 as u16
    }

    pub const fn as_i8(self) -> i8 {
        self.0 as i8
    }

    pub const fn as_u8(self) -> u8 {
        self.0 as u8
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    /// Any non-zero low byte is true, matching the host's bool conversion.
    pub const fn as_bool(self) -> bool {
        (self.0 as u8) != 0
    }

    /// Converts a host timestamp (microseconds since 2000-01-01) into
    /// milliseconds since the Unix epoch.
    ///
    /// Sub-millisecond precision is floored, so the mapping is monotonic
    /// and strictly increasing across whole milliseconds.
    pub const fn to_unix_timestamp_ms(self) -> i64 {
        self.as_i64().div_euclid(1000) + EPOCH_DIFF_MS
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datum({:#018x})", self.0)
    }
}

macro_rules! datum_from {
    ($($ty:ty => $ctor:ident),* $(,)?) => {
        $(
            impl From<$ty> for Datum {
                fn from(v: $ty) -> Self {
                    Datum::$ctor(v)
                }
            }
        )*
    };
}

datum_from! {
    i64 => from_i64,
    u64 => from_u64,
    i32 => from_i32,
    u32 => from_u32,
    i16 => from_i16,
    u16 => from_u16,
    i8 => from_i8,
    u8 => from_u8,
    f64 => from_f64,
    f32 => from_f32,
    bool => from_bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        for v in [0i64, 1, -1, i64::MIN, i64::MAX] {
            assert_eq!(Datum::from_i64(v).as_i64(), v);
        }
        for v in [0u64, 1, u64::MAX] {
            assert_eq!(Datum::from_u64(v).as_u64(), v);
        }
        for v in [0i32, -7, i32::MIN, i32::MAX] {
            assert_eq!(Datum::from_i32(v).as_i32(), v);
        }
        for v in [0u32, 7, u32::MAX] {
            assert_eq!(Datum::from_u32(v).as_u32(), v);
        }
        for v in [0i16, -300, i16::MIN, i16::MAX] {
            assert_eq!(Datum::from_i16(v).as_i16(), v);
        }
        for v in [0u16, 300, u16::MAX] {
            assert_eq!(Datum::from_u16(v).as_u16(), v);
        }
        for v in [0i8, -1, i8::MIN, i8::MAX] {
            assert_eq!(Datum::from_i8(v).as_i8(), v);
        }
        for v in [0u8, 1, u8::MAX] {
            assert_eq!(Datum::from_u8(v).as_u8(), v);
        }
    }

    #[test]
    fn test_float_roundtrip() {
        for v in [0.0f64, -0.0, 1.5, f64::MIN, f64::MAX, f64::INFINITY] {
            assert_eq!(Datum::from_f64(v).as_f64().to_bits(), v.to_bits());
        }
        for v in [0.0f32, -2.25, f32::MIN_POSITIVE, f32::NEG_INFINITY] {
            assert_eq!(Datum::from_f32(v).as_f32().to_bits(), v.to_bits());
        }
        assert!(Datum::from_f64(f64::NAN).as_f64().is_nan());
    }

    #[test]
    fn test_bool_roundtrip() {
        assert!(Datum::from_bool(true).as_bool());
        assert!(!Datum::from_bool(false).as_bool());
        assert_eq!(Datum::from_bool(true).raw(), 1);
    }

    #[test]
    fn test_word_conventions() {
        assert_eq!(Datum::from_i32(-1).raw(), u64::MAX);
        assert_eq!(Datum::from_u32(u32::MAX).raw(), 0xFFFF_FFFF);
        assert_eq!(Datum::from_i8(-1).raw(), u64::MAX);
        assert_eq!(Datum::from_f32(1.0).raw(), 0x3F80_0000);
    }

    #[test]
    fn test_wrong_accessor_is_garbage_not_a_fault() {
        let d = Datum::from_i64(-2);
        // Truncated and reinterpreted, but well defined.
        assert_eq!(d.as_u8(), 0xFE);
        assert_eq!(d.as_i16(), -2);
        assert_eq!(d.as_u32(), 0xFFFF_FFFE);
        assert!(d.as_f64().is_nan());

        let f = Datum::from_f64(1.0);
        assert_eq!(f.as_i64(), 0x3FF0_0000_0000_0000);
        assert!(!f.as_bool());
    }

    #[test]
    fn test_timestamp_epoch_constant() {
        assert_eq!(EPOCH_DIFF_MS, 946_684_800_000);
        assert_eq!(Datum::from_i64(0).to_unix_timestamp_ms(), EPOCH_DIFF_MS);
        assert_eq!(Datum::from_i64(1_000).to_unix_timestamp_ms(), EPOCH_DIFF_MS + 1);
        assert_eq!(Datum::from_i64(-1_000).to_unix_timestamp_ms(), EPOCH_DIFF_MS - 1);
        // 1970-01-01 in host microseconds maps to 0.
        assert_eq!(Datum::from_i64(-EPOCH_DIFF_MS * 1000).to_unix_timestamp_ms(), 0);
    }

    #[test]
    fn test_timestamp_monotonic() {
        let inputs = [-5_000_000i64, -1_001, -1_000, -1, 0, 999, 1_000, 1_001, 86_400_000_000];
        for pair in inputs.windows(2) {
            let (a, b) = (Datum::from_i64(pair[0]), Datum::from_i64(pair[1]));
            assert!(a.to_unix_timestamp_ms() <= b.to_unix_timestamp_ms());
        }
        for micros in (-10_000i64..10_000).step_by(1_000) {
            let a = Datum::from_i64(micros).to_unix_timestamp_ms();
            let b = Datum::from_i64(micros + 1_000).to_unix_timestamp_ms();
            assert!(a < b);
        }
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(Datum::from(42i32), Datum::from_i32(42));
        assert_eq!(Datum::from(true), Datum::from_bool(true));
        assert_eq!(Datum::from(2.5f64), Datum::from_f64(2.5));
    }
}
