///
/// Variable-length (varlena) storage layout.
///
/// Byte layouts match the host's little-endian varlena encoding:
///
/// - 4-byte header, plain:      `len << 2`               (low bits `00`)
/// - 4-byte header, compressed: `(len << 2) | 0b10`, then a 4-byte
///   `tcinfo` word (raw size | method << 30), then compressed bytes
/// - 1-byte header, short:      `(len << 1) | 1`         (len <= 127)
/// - 1-byte header, external:   `0x01`, a tag byte, then a `ToastPointer`
///
/// Lengths always include the header. A `Varlena` is an immutable,
/// cheaply cloned blob; the host hands them out from `detoast`.
///

use std::fmt;
use std::rc::Rc;

use crate::host::Oid;

pub const VARHDRSZ: usize = 4;
pub const VARHDRSZ_SHORT: usize = 1;
pub const VARHDRSZ_EXTERNAL: usize = 2;
pub const VARHDRSZ_COMPRESSED: usize = 8;
pub const VARATT_SHORT_MAX: usize = 0x7F;
pub const VARTAG_ONDISK: u8 = 18;
pub const TOAST_POINTER_SIZE: usize = 16;

/// Largest total size a 4-byte header can describe.
pub const VARLENA_MAX_SIZE: usize = 0x3FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Deflate = 0,
}

impl CompressionMethod {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(CompressionMethod::Deflate),
            _ => None,
        }
    }
}

/// Out-of-line storage pointer carried by an external varlena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastPointer {
    /// Original size including the 4-byte header.
    pub raw_size: i32,
    /// Stored size (low 30 bits) and compression method (high 2 bits).
    pub ext_info: u32,
    pub value_id: Oid,
    pub toast_rel_id: Oid,
}

impl ToastPointer {
    pub fn ext_size(&self) -> usize {
        (self.ext_info & 0x3FFF_FFFF) as usize
    }

    pub fn compression(&self) -> u32 {
        self.ext_info >> 30
    }

    /// True when the stored bytes are smaller than the raw payload.
    pub fn is_compressed(&self) -> bool {
        self.ext_size() < (self.raw_size as usize).saturating_sub(VARHDRSZ)
    }

    pub fn to_bytes(&self) -> [u8; TOAST_POINTER_SIZE] {
        let mut out = [0u8; TOAST_POINTER_SIZE];
        out[0..4].copy_from_slice(&self.raw_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.ext_info.to_le_bytes());
        out[8..12].copy_from_slice(&self.value_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.toast_rel_id.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..TOAST_POINTER_SIZE)?;
        Some(Self {
            raw_size: i32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            ext_info: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            value_id: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            toast_rel_id: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
        })
    }
}

/// An immutable varlena blob, header included.
#[derive(Clone, PartialEq, Eq)]
pub struct Varlena(Rc<[u8]>);

impl Varlena {
    /// Validates the header and trims trailing bytes beyond the declared size.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let size = declared_size(bytes)?;
        Some(Varlena(Rc::from(bytes.get(..size)?)))
    }

    /// A plain value with a 4-byte header.
    pub fn new_4b(payload: &[u8]) -> Self {
        let total = payload.len() + VARHDRSZ;
        assert!(total <= VARLENA_MAX_SIZE, "varlena too large: {} bytes", total);
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&((total as u32) << 2).to_le_bytes());
        buf.extend_from_slice(payload);
        Varlena(buf.into())
    }

    /// A plain value with a 1-byte header; `None` if the payload is too long.
    pub fn new_short(payload: &[u8]) -> Option<Self> {
        let total = payload.len() + VARHDRSZ_SHORT;
        if total > VARATT_SHORT_MAX {
            return None;
        }
        let mut buf = Vec::with_capacity(total);
        buf.push(((total as u8) << 1) | 0x01);
        buf.extend_from_slice(payload);
        Some(Varlena(buf.into()))
    }

    /// An inline compressed value.
    pub fn new_compressed(raw_size: usize, method: CompressionMethod, compressed: &[u8]) -> Self {
        let total = compressed.len() + VARHDRSZ_COMPRESSED;
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(((total as u32) << 2) | 0x02).to_le_bytes());
        let tcinfo = (raw_size as u32 & 0x3FFF_FFFF) | ((method as u32) << 30);
        buf.extend_from_slice(&tcinfo.to_le_bytes());
        buf.extend_from_slice(compressed);
        Varlena(buf.into())
    }

    /// An external pointer to out-of-line storage.
    pub fn new_external(pointer: &ToastPointer) -> Self {
        let mut buf = Vec::with_capacity(VARHDRSZ_EXTERNAL + TOAST_POINTER_SIZE);
        buf.push(0x01);
        buf.push(VARTAG_ONDISK);
        buf.extend_from_slice(&pointer.to_bytes());
        Varlena(buf.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn first(&self) -> u8 {
        self.0[0]
    }

    pub fn is_short(&self) -> bool {
        self.first() & 0x01 == 0x01 && self.first() != 0x01
    }

    pub fn is_external(&self) -> bool {
        self.first() == 0x01
    }

    pub fn is_compressed(&self) -> bool {
        self.first() & 0x03 == 0x02
    }

    /// Plain 4-byte header; the only form readable without detoasting.
    pub fn is_plain(&self) -> bool {
        self.first() & 0x03 == 0x00
    }

    pub fn header_size(&self) -> usize {
        if self.is_external() {
            VARHDRSZ_EXTERNAL
        } else if self.is_short() {
            VARHDRSZ_SHORT
        } else if self.is_compressed() {
            VARHDRSZ_COMPRESSED
        } else {
            VARHDRSZ
        }
    }

    /// Total size including the header.
    pub fn varsize_any(&self) -> usize {
        self.0.len()
    }

    /// Size of the bytes following the header.
    pub fn varsize_any_exhdr(&self) -> usize {
        self.0.len() - self.header_size()
    }

    /// The bytes following the header.
    pub fn data_any(&self) -> &[u8] {
        &self.0[self.header_size()..]
    }

    pub fn toast_pointer(&self) -> Option<ToastPointer> {
        if !self.is_external() || self.0.get(1) != Some(&VARTAG_ONDISK) {
            return None;
        }
        ToastPointer::from_bytes(&self.0[VARHDRSZ_EXTERNAL..])
    }

    /// Raw (uncompressed payload) size and method of an inline compressed value.
    pub fn compressed_info(&self) -> Option<(usize, u32)> {
        if !self.is_compressed() {
            return None;
        }
        let b = self.0.get(4..8)?;
        let tcinfo = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        Some(((tcinfo & 0x3FFF_FFFF) as usize, tcinfo >> 30))
    }

    /// Re-encodes a short value with a 4-byte header. Other forms are returned unchanged.
    pub fn expand_short(&self) -> Varlena {
        if self.is_short() {
            Varlena::new_4b(self.data_any())
        } else {
            self.clone()
        }
    }
}

impl fmt::Debug for Varlena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_external() {
            "external"
        } else if self.is_short() {
            "short"
        } else if self.is_compressed() {
            "compressed"
        } else {
            "plain"
        };
        f.debug_struct("Varlena")
            .field("kind", &kind)
            .field("size", &self.varsize_any())
            .finish()
    }
}

/// Total size declared by the header at the start of `bytes`.
pub fn declared_size(bytes: &[u8]) -> Option<usize> {
    let first = *bytes.first()?;
    if first == 0x01 {
        return match bytes.get(1) {
            Some(&VARTAG_ONDISK) => Some(VARHDRSZ_EXTERNAL + TOAST_POINTER_SIZE),
            _ => None,
        };
    }
    if first & 0x01 == 0x01 {
        return Some(((first >> 1) & 0x7F) as usize);
    }
    let b = bytes.get(..4)?;
    let size = ((u32::from_le_bytes([b[0], b[1], b[2], b[3]]) >> 2) & 0x3FFF_FFFF) as usize;
    if size < VARHDRSZ { None } else { Some(size) }
}
