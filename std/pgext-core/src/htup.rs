///
/// Heap tuple header layout.
///
/// A row datum is a varlena whose bytes start with the tuple header:
///
/// ```text
/// offset  size  field
///      0     4  datum_len      (varlena 4-byte header)
///      4     4  datum_typmod
///      8     4  datum_typeid
///     12     6  t_ctid         (zero for row datums)
///     18     2  t_infomask2    (low 11 bits: number of attributes)
///     20     2  t_infomask     (HEAP_HASNULL | HEAP_HASVARWIDTH | HEAP_HASEXTERNAL)
///     22     1  t_hoff         (offset of attribute data, MAXALIGN'd)
///     23     -  t_bits         (null bitmap when HEAP_HASNULL, bit set = not null)
/// ```
///

use crate::host::Oid;
use crate::varlena::Varlena;

pub const DATUM_LEN_OFFSET: usize = 0;
pub const TYPMOD_OFFSET: usize = 4;
pub const TYPEID_OFFSET: usize = 8;
pub const CTID_OFFSET: usize = 12;
pub const INFOMASK2_OFFSET: usize = 18;
pub const INFOMASK_OFFSET: usize = 20;
pub const HOFF_OFFSET: usize = 22;
pub const BITS_OFFSET: usize = 23;
pub const SIZEOF_HEAP_TUPLE_HEADER: usize = 23;

pub const HEAP_HASNULL: u16 = 0x0001;
pub const HEAP_HASVARWIDTH: u16 = 0x0002;
pub const HEAP_HASEXTERNAL: u16 = 0x0004;
pub const HEAP_NATTS_MASK: u16 = 0x07FF;
/// Widest row the host forms; keeps `t_hoff` within one byte.
pub const MAX_HEAP_ATTRIBUTE_NUMBER: usize = 1600;

pub const MAXIMUM_ALIGNOF: usize = 8;

pub const fn maxalign(len: usize) -> usize {
    (len + MAXIMUM_ALIGNOF - 1) & !(MAXIMUM_ALIGNOF - 1)
}

/// Rounds `offset` up to a multiple of `align` (a power of two).
pub const fn att_align(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Type identity recorded in a row datum's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatumTupleFields {
    pub datum_len: u32,
    pub datum_typmod: i32,
    pub datum_typeid: Oid,
}

/// A row: its length and its header + payload bytes.
///
/// The bytes stay alive as long as any clone of the `HeapTuple` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapTuple {
    pub t_len: u32,
    pub t_data: Varlena,
}

impl HeapTuple {
    pub fn from_varlena(data: Varlena) -> Self {
        Self {
            t_len: data.varsize_any() as u32,
            t_data: data,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.t_data.as_bytes()
    }

    /// Type id, typmod and length from the header; `None` if the blob is too
    /// short to hold one.
    pub fn datum_tuple_fields(&self) -> Option<DatumTupleFields> {
        let b = self.bytes();
        if b.len() < SIZEOF_HEAP_TUPLE_HEADER {
            return None;
        }
        Some(DatumTupleFields {
            datum_len: read_u32(b, DATUM_LEN_OFFSET) >> 2,
            datum_typmod: read_u32(b, TYPMOD_OFFSET) as i32,
            datum_typeid: read_u32(b, TYPEID_OFFSET),
        })
    }

    pub fn natts(&self) -> usize {
        (read_u16(self.bytes(), INFOMASK2_OFFSET) & HEAP_NATTS_MASK) as usize
    }

    pub fn infomask(&self) -> u16 {
        read_u16(self.bytes(), INFOMASK_OFFSET)
    }

    pub fn hoff(&self) -> usize {
        self.bytes().get(HOFF_OFFSET).copied().unwrap_or(0) as usize
    }

    pub fn has_nulls(&self) -> bool {
        self.infomask() & HEAP_HASNULL != 0
    }

    pub fn has_external(&self) -> bool {
        self.infomask() & HEAP_HASEXTERNAL != 0
    }

    /// Null flag for a zero-based attribute index, per the null bitmap.
    pub fn att_isnull(&self, index: usize) -> bool {
        if !self.has_nulls() {
            return false;
        }
        match self.bytes().get(BITS_OFFSET + index / 8) {
            Some(byte) => byte & (1 << (index % 8)) == 0,
            None => true,
        }
    }
}

fn read_u32(b: &[u8], at: usize) -> u32 {
    match b.get(at..at + 4) {
        Some(s) => u32::from_le_bytes([s[0], s[1], s[2], s[3]]),
        None => 0,
    }
}

fn read_u16(b: &[u8], at: usize) -> u16 {
    match b.get(at..at + 2) {
        Some(s) => u16::from_le_bytes([s[0], s[1]]),
        None => 0,
    }
}
