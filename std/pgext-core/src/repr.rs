///
/// Conversion between application values and `Datum`s.
///
/// Scalars convert without touching the host. Text and bytea go through
/// `Toast`: encoding allocates a host varlena, decoding detoasts one.
/// `from_datum` returns `None` only when referenced storage cannot be
/// materialized; scalars always decode.
///

use std::ffi::CString;

use crate::datum::Datum;
use crate::host::Toast;
use crate::text::{text_datum_to_string, text_to_datum, text_view};

pub trait DatumRepr: Sized {
    fn to_datum<H: Toast + ?Sized>(&self, host: &H) -> Datum;

    fn from_datum<H: Toast + ?Sized>(host: &H, datum: Datum) -> Option<Self>;
}

impl DatumRepr for Datum {
    fn to_datum<H: Toast + ?Sized>(&self, _host: &H) -> Datum {
        *self
    }

    fn from_datum<H: Toast + ?Sized>(_host: &H, datum: Datum) -> Option<Self> {
        Some(datum)
    }
}

macro_rules! scalar_repr {
    ($($ty:ty => $from:ident, $as:ident;)*) => {
        $(
            impl DatumRepr for $ty {
                fn to_datum<H: Toast + ?Sized>(&self, _host: &H) -> Datum {
                    Datum::$from(*self)
                }

                fn from_datum<H: Toast + ?Sized>(_host: &H, datum: Datum) -> Option<Self> {
                    Some(datum.$as())
                }
            }
        )*
    };
}

scalar_repr! {
    i64 => from_i64, as_i64;
    u64 => from_u64, as_u64;
    i32 => from_i32, as_i32;
    u32 => from_u32, as_u32;
    i16 => from_i16, as_i16;
    u16 => from_u16, as_u16;
    i8 => from_i8, as_i8;
    u8 => from_u8, as_u8;
    f64 => from_f64, as_f64;
    f32 => from_f32, as_f32;
    bool => from_bool, as_bool;
}

impl DatumRepr for String {
    fn to_datum<H: Toast + ?Sized>(&self, host: &H) -> Datum {
        text_to_datum(host, self.as_str())
    }

    fn from_datum<H: Toast + ?Sized>(host: &H, datum: Datum) -> Option<Self> {
        text_datum_to_string(host, datum)
    }
}

impl DatumRepr for CString {
    fn to_datum<H: Toast + ?Sized>(&self, host: &H) -> Datum {
        text_to_datum(host, self.as_c_str())
    }

    fn from_datum<H: Toast + ?Sized>(host: &H, datum: Datum) -> Option<Self> {
        let s = text_datum_to_string(host, datum)?;
        CString::new(s).ok()
    }
}

/// Raw bytes, stored as a bytea varlena.
impl DatumRepr for Vec<u8> {
    fn to_datum<H: Toast + ?Sized>(&self, host: &H) -> Datum {
        host.cstring_to_text_with_len(self)
    }

    fn from_datum<H: Toast + ?Sized>(host: &H, datum: Datum) -> Option<Self> {
        text_view(host, datum).map(|view| view.as_bytes().to_vec())
    }
}
