///
/// Text values.
///
/// Decoding packs-detoasts the referenced varlena and copies its payload
/// into an owned `String`. The host guarantees well-formed UTF-8, so a
/// malformed payload is a contract violation and aborts the call.
///
/// Encoding allocates exactly one varlena (`len + VARHDRSZ` bytes) through
/// the host. Sources that expose contiguous UTF-8 bytes are copied directly;
/// others go through a NUL-terminated buffer.
///

use std::ffi::{CStr, CString};

use crate::datum::Datum;
use crate::error::{abort, BridgeError};
use crate::host::{Catalog, Oid, Toast};
use crate::varlena::Varlena;

/// The payload of a (possibly short-header) text value.
#[derive(Debug, Clone)]
pub struct TextView {
    blob: Varlena,
}

impl TextView {
    pub fn as_bytes(&self) -> &[u8] {
        self.blob.data_any()
    }

    pub fn len(&self) -> usize {
        self.blob.varsize_any_exhdr()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the payload into a validated `String`, aborting on bad UTF-8.
    pub fn to_string_checked(&self) -> String {
        match String::from_utf8(self.as_bytes().to_vec()) {
            Ok(s) => s,
            Err(e) => abort(BridgeError::MalformedText(e)),
        }
    }
}

/// Materializes a text datum's bytes. `None` if the host cannot detoast it.
pub fn text_view<H: Toast + ?Sized>(host: &H, datum: Datum) -> Option<TextView> {
    let blob = host.detoast_packed(datum)?;
    Some(TextView { blob })
}

/// A string that can be copied into a host text value.
pub trait TextSource {
    /// The UTF-8 bytes, when they are stored contiguously.
    fn contiguous_utf8(&self) -> Option<&[u8]>;

    /// Runs `f` with a NUL-terminated copy (truncated at the first NUL).
    fn with_c_string<R>(&self, f: impl FnOnce(&CStr) -> R) -> R;
}

impl TextSource for str {
    fn contiguous_utf8(&self) -> Option<&[u8]> {
        Some(self.as_bytes())
    }

    fn with_c_string<R>(&self, f: impl FnOnce(&CStr) -> R) -> R {
        let end = self.find('\0').unwrap_or(self.len());
        let c = CString::new(&self[..end]).unwrap_or_default();
        f(&c)
    }
}

impl TextSource for String {
    fn contiguous_utf8(&self) -> Option<&[u8]> {
        self.as_str().contiguous_utf8()
    }

    fn with_c_string<R>(&self, f: impl FnOnce(&CStr) -> R) -> R {
        self.as_str().with_c_string(f)
    }
}

impl TextSource for CStr {
    fn contiguous_utf8(&self) -> Option<&[u8]> {
        None
    }

    fn with_c_string<R>(&self, f: impl FnOnce(&CStr) -> R) -> R {
        f(self)
    }
}

impl TextSource for CString {
    fn contiguous_utf8(&self) -> Option<&[u8]> {
        None
    }

    fn with_c_string<R>(&self, f: impl FnOnce(&CStr) -> R) -> R {
        f(self.as_c_str())
    }
}

/// Copies `source` into a newly allocated host text value.
pub fn text_to_datum<H, S>(host: &H, source: &S) -> Datum
where
    H: Toast + ?Sized,
    S: TextSource + ?Sized,
{
    match source.contiguous_utf8() {
        Some(bytes) => host.cstring_to_text_with_len(bytes),
        None => source.with_c_string(|c| host.cstring_to_text(c)),
    }
}

/// Decodes a text datum into an owned string.
pub fn text_datum_to_string<H: Toast + ?Sized>(host: &H, datum: Datum) -> Option<String> {
    text_view(host, datum).map(|view| view.to_string_checked())
}

/// The label of an enum value, or `None` if the OID names no enum label.
pub fn enum_label<C: Catalog + ?Sized>(host: &C, oid: Oid) -> Option<String> {
    let label = host.get_enum_label(oid)?;
    Some(label.to_string_lossy().into_owned())
}
