///
/// Heap tuple forming and deforming.
///
/// Rows use the header layout in `pgext_core::htup`. Attribute data starts
/// at the MAXALIGN'd `t_hoff` and follows the usual rules:
/// - fixed-length by-value attributes are stored little-endian in their
///   declared length, aligned to the type's alignment,
/// - varlena attributes whose plain payload fits a 1-byte header are
///   packed to a short header and stored unaligned,
/// - external and short varlenas are stored unaligned, everything else is
///   aligned first,
/// - NULL attributes take no space and clear their bit in the null bitmap.
///
/// Fixed-length attributes read back as the same word they were built from.
/// Deformed varlena attributes are copied into the memory context, so the
/// resulting datums stay valid after the tuple is gone. Attributes beyond
/// the tuple's own attribute count read as NULL.
///

use pgext_core::{
    att_align, declared_size, maxalign, type_oid, Attribute, Datum, HeapAccess, HeapTuple, TupleDescData,
    Varlena, BITS_OFFSET, DATUM_LEN_OFFSET, HEAP_HASEXTERNAL, HEAP_HASNULL, HEAP_HASVARWIDTH, HOFF_OFFSET,
    INFOMASK2_OFFSET, INFOMASK_OFFSET, MAX_HEAP_ATTRIBUTE_NUMBER, SIZEOF_HEAP_TUPLE_HEADER, TYPEID_OFFSET,
    TYPMOD_OFFSET, VARATT_SHORT_MAX, VARHDRSZ_SHORT,
};

use crate::error::{host_abort, HostError};
use crate::Backend;

fn bitmap_len(natts: usize) -> usize {
    natts.div_ceil(8)
}

/// Widens a fixed-length attribute into a datum word. Signed integer types
/// are sign-extended; oids, enum values and float4 bits are zero-extended,
/// the same words `Datum::from_u32` and `Datum::from_f32` produce.
fn fetch_by_val(attr: &Attribute, bytes: &[u8]) -> Datum {
    let signed = matches!(attr.type_id, type_oid::CHAR | type_oid::INT2 | type_oid::INT4);
    match bytes.len() {
        1 if signed => Datum::from_i8(bytes[0] as i8),
        1 => Datum::from_u8(bytes[0]),
        2 if signed => Datum::from_i16(i16::from_le_bytes([bytes[0], bytes[1]])),
        2 => Datum::from_u16(u16::from_le_bytes([bytes[0], bytes[1]])),
        4 if signed => Datum::from_i32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        4 => Datum::from_u32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        len => {
            let mut word = [0u8; 8];
            word[..len.min(8)].copy_from_slice(&bytes[..len.min(8)]);
            Datum::from_raw(u64::from_le_bytes(word))
        }
    }
}

impl Backend {
    /// The stored form of a varlena attribute value.
    fn attribute_varlena(&self, value: Datum) -> Varlena {
        let Some(blob) = self.memory.varlena(value) else {
            host_abort(HostError::DanglingDatum { handle: value.raw() })
        };
        if blob.is_plain() && blob.varsize_any_exhdr() + VARHDRSZ_SHORT <= VARATT_SHORT_MAX {
            if let Some(short) = Varlena::new_short(blob.data_any()) {
                return short;
            }
        }
        blob
    }

    pub(crate) fn form_tuple(&self, desc: &TupleDescData, values: &[Datum], nulls: &[bool]) -> HeapTuple {
        let natts = desc.natts();
        if natts > MAX_HEAP_ATTRIBUTE_NUMBER {
            host_abort(HostError::TooManyColumns(natts));
        }
        if values.len() < natts || nulls.len() < natts {
            host_abort(HostError::CorruptTuple(format!(
                "{} values for {} attributes",
                values.len().min(nulls.len()),
                natts
            )));
        }

        let has_null = nulls[..natts].iter().any(|n| *n);
        let hoff = maxalign(SIZEOF_HEAP_TUPLE_HEADER + if has_null { bitmap_len(natts) } else { 0 });

        let mut infomask = if has_null { HEAP_HASNULL } else { 0 };
        let mut bits = vec![0u8; bitmap_len(natts)];
        let mut data: Vec<u8> = Vec::new();

        for (i, attr) in desc.attrs().iter().enumerate() {
            if nulls[i] {
                continue;
            }
            bits[i / 8] |= 1 << (i % 8);

            if attr.is_varlena() {
                infomask |= HEAP_HASVARWIDTH;
                let blob = self.attribute_varlena(values[i]);
                if blob.is_external() {
                    infomask |= HEAP_HASEXTERNAL;
                }
                if !(blob.is_short() || blob.is_external()) {
                    data.resize(att_align(data.len(), attr.align), 0);
                }
                data.extend_from_slice(blob.as_bytes());
            } else {
                let len = attr.len.max(0) as usize;
                data.resize(att_align(data.len(), attr.align), 0);
                let word = values[i].raw().to_le_bytes();
                data.extend_from_slice(&word[..len.min(8)]);
                data.resize(data.len() + len.saturating_sub(8), 0);
            }
        }

        let total = hoff + data.len();
        let mut buf = vec![0u8; total];
        buf[DATUM_LEN_OFFSET..DATUM_LEN_OFFSET + 4].copy_from_slice(&((total as u32) << 2).to_le_bytes());
        buf[TYPMOD_OFFSET..TYPMOD_OFFSET + 4].copy_from_slice(&desc.typmod().to_le_bytes());
        buf[TYPEID_OFFSET..TYPEID_OFFSET + 4].copy_from_slice(&desc.type_id().to_le_bytes());
        buf[INFOMASK2_OFFSET..INFOMASK2_OFFSET + 2].copy_from_slice(&(natts as u16).to_le_bytes());
        buf[INFOMASK_OFFSET..INFOMASK_OFFSET + 2].copy_from_slice(&infomask.to_le_bytes());
        buf[HOFF_OFFSET] = hoff as u8;
        if has_null {
            buf[BITS_OFFSET..BITS_OFFSET + bits.len()].copy_from_slice(&bits);
        }
        buf[hoff..].copy_from_slice(&data);

        let Some(blob) = Varlena::parse(&buf) else {
            host_abort(HostError::CorruptTuple(format!("formed {} bytes", total)))
        };
        tracing::trace!(type_id = desc.type_id(), natts, len = total, "formed heap tuple");
        HeapTuple::from_varlena(blob)
    }

    /// Walks the first `upto` attributes, calling `visit` with each index
    /// and its stored bytes (`None` when NULL or missing).
    fn walk_attributes(
        &self,
        tuple: &HeapTuple,
        desc: &TupleDescData,
        upto: usize,
        mut visit: impl FnMut(usize, &Attribute, Option<&[u8]>),
    ) {
        let bytes = tuple.bytes();
        let hoff = tuple.hoff();
        if hoff < SIZEOF_HEAP_TUPLE_HEADER || hoff > bytes.len() {
            host_abort(HostError::CorruptTuple(format!("header offset {}", hoff)));
        }
        let data = &bytes[hoff..];
        let stored = tuple.natts();
        let mut off = 0usize;

        for (i, attr) in desc.attrs().iter().take(upto).enumerate() {
            if i >= stored || tuple.att_isnull(i) {
                visit(i, attr, None);
                continue;
            }
            let len = if attr.is_varlena() {
                if data.get(off) == Some(&0) {
                    off = att_align(off, attr.align);
                }
                match data.get(off..).and_then(declared_size) {
                    Some(size) => size,
                    None => host_abort(HostError::CorruptTuple(format!(
                        "bad varlena header for attribute {}",
                        i + 1
                    ))),
                }
            } else {
                off = att_align(off, attr.align);
                attr.len.max(0) as usize
            };
            let Some(field) = data.get(off..off + len) else {
                host_abort(HostError::CorruptTuple(format!(
                    "attribute {} runs past the end of the tuple",
                    i + 1
                )))
            };
            visit(i, attr, Some(field));
            off += len;
        }
    }

    fn fetch_attribute(&self, attr: &Attribute, field: &[u8], flatten: bool) -> Datum {
        if !attr.is_varlena() {
            return fetch_by_val(attr, field);
        }
        let Some(blob) = Varlena::parse(field) else {
            host_abort(HostError::CorruptTuple(format!("attribute \"{}\"", attr.name)))
        };
        let blob = if flatten && blob.is_external() {
            match self.detoast_blob(&blob) {
                Ok(plain) => plain,
                Err(e) => host_abort(e),
            }
        } else {
            blob
        };
        self.memory.alloc_varlena(blob)
    }

    fn deform(&self, tuple: &HeapTuple, desc: &TupleDescData, values: &mut [Datum], nulls: &mut [bool], flatten: bool) {
        let natts = desc.natts();
        self.walk_attributes(tuple, desc, natts, |i, attr, field| match field {
            Some(field) => {
                values[i] = self.fetch_attribute(attr, field, flatten);
                nulls[i] = false;
            }
            None => {
                values[i] = Datum::NULL;
                nulls[i] = true;
            }
        });
    }
}

impl HeapAccess for Backend {
    fn heap_form_tuple(&self, desc: &TupleDescData, values: &[Datum], nulls: &[bool]) -> HeapTuple {
        self.form_tuple(desc, values, nulls)
    }

    fn heap_deform_tuple(
        &self,
        tuple: &HeapTuple,
        desc: &TupleDescData,
        values: &mut [Datum],
        nulls: &mut [bool],
    ) {
        if values.len() < desc.natts() || nulls.len() < desc.natts() {
            host_abort(HostError::CorruptTuple(format!(
                "deform buffers hold {} of {} attributes",
                values.len().min(nulls.len()),
                desc.natts()
            )));
        }
        self.deform(tuple, desc, values, nulls, false);
    }

    fn fastgetattr(&self, tuple: &HeapTuple, attnum: i32, desc: &TupleDescData) -> (Datum, bool) {
        let natts = desc.natts();
        if attnum < 1 || attnum as usize > natts {
            host_abort(HostError::InvalidAttribute { attnum, natts });
        }
        let target = attnum as usize - 1;
        let mut result = (Datum::NULL, true);
        self.walk_attributes(tuple, desc, target + 1, |i, attr, field| {
            if i == target {
                if let Some(field) = field {
                    result = (self.fetch_attribute(attr, field, false), false);
                }
            }
        });
        result
    }

    fn heap_tuple_header_get_datum(&self, tuple: &HeapTuple) -> Datum {
        if !tuple.has_external() {
            return self.memory.alloc_varlena(tuple.t_data.clone());
        }
        let Some(fields) = tuple.datum_tuple_fields() else {
            host_abort(HostError::CorruptTuple("row datum without header".to_string()))
        };
        let Some(desc) = self.catalog.peek_rowtype(fields.datum_typeid, fields.datum_typmod) else {
            host_abort(HostError::CorruptTuple(format!(
                "no descriptor for row type {}",
                fields.datum_typeid
            )))
        };
        let natts = desc.natts();
        let mut values = vec![Datum::NULL; natts];
        let mut nulls = vec![false; natts];
        self.deform(tuple, &desc, &mut values, &mut nulls, true);
        let flat = self.form_tuple(&desc, &values, &nulls);
        tracing::trace!(from = tuple.t_len, to = flat.t_len, "flattened external attributes");
        self.memory.alloc_varlena(flat.t_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use pgext_core::{Catalog, Toast};

    fn backend() -> Backend {
        Backend::new(HostConfig::default()).unwrap()
    }

    #[test]
    fn test_layout_alignment_and_short_varlena() {
        let host = backend();
        let oid = host
            .create_composite_type("mixed", &[("flag", "bool"), ("n", "int8"), ("s", "text"), ("i", "int4")])
            .unwrap();
        let desc = host.catalog.peek_rowtype(oid, -1).unwrap();
        let s = host.cstring_to_text_with_len(b"hi");
        let values = [Datum::from_bool(true), Datum::from_i64(-5), s, Datum::from_i32(9)];
        let tuple = host.form_tuple(&desc, &values, &[false; 4]);

        // bool at 0, int8 aligned to 8, short text (3 bytes) at 16, int4 aligned to 20.
        assert_eq!(tuple.hoff(), 24);
        assert_eq!(tuple.t_len as usize, 24 + 24);
        assert!(!tuple.has_nulls());
        assert_eq!(tuple.infomask() & HEAP_HASVARWIDTH, HEAP_HASVARWIDTH);
        assert_eq!(tuple.bytes()[24 + 16], (3 << 1) | 1);

        let (n, isnull) = host.fastgetattr(&tuple, 2, &desc);
        assert!(!isnull);
        assert_eq!(n.as_i64(), -5);
        let (i, _) = host.fastgetattr(&tuple, 4, &desc);
        assert_eq!(i.as_i32(), 9);
        let (text, _) = host.fastgetattr(&tuple, 3, &desc);
        assert_eq!(host.detoast(text).unwrap().data_any(), b"hi");
    }

    #[test]
    fn test_nulls_take_no_space() {
        let host = backend();
        let oid = host
            .create_composite_type("sparse", &[("a", "int8"), ("b", "int8"), ("c", "int8")])
            .unwrap();
        let desc = host.catalog.peek_rowtype(oid, -1).unwrap();
        let values = [Datum::from_i64(1), Datum::NULL, Datum::from_i64(3)];
        let tuple = host.form_tuple(&desc, &values, &[false, true, false]);
        assert!(tuple.has_nulls());
        assert_eq!(tuple.t_len as usize, 24 + 16);

        let mut out = [Datum::NULL; 3];
        let mut nulls = [false; 3];
        host.heap_deform_tuple(&tuple, &desc, &mut out, &mut nulls);
        assert_eq!(nulls, [false, true, false]);
        assert_eq!(out[2].as_i64(), 3);
    }

    #[test]
    fn test_missing_trailing_attributes_read_null() {
        let host = backend();
        let narrow = host.create_composite_type("narrow", &[("a", "int4")]).unwrap();
        let narrow_desc = host.catalog.peek_rowtype(narrow, -1).unwrap();
        let tuple = host.form_tuple(&narrow_desc, &[Datum::from_i32(4)], &[false]);

        let wide = host.catalog.bless(vec![
            host.catalog.attribute("a", type_oid::INT4).unwrap(),
            host.catalog.attribute("b", type_oid::INT4).unwrap(),
        ]);
        let (_, isnull) = host.fastgetattr(&tuple, 2, &wide);
        assert!(isnull);
    }

    #[test]
    fn test_get_datum_flattens_external_values() {
        let host = Backend::new(
            HostConfig::from_toml_str("[toast]\ncompression = \"none\"\nexternal_threshold = 32").unwrap(),
        )
        .unwrap();
        let oid = host.create_composite_type("doc", &[("body", "text")]).unwrap();
        let desc = host.catalog.peek_rowtype(oid, -1).unwrap();
        let body = host.toast_datum(&[b'z'; 100]);
        let tuple = host.form_tuple(&desc, &[body], &[false]);
        assert!(tuple.has_external());

        let row = host.heap_tuple_header_get_datum(&tuple);
        let flat = HeapTuple::from_varlena(host.detoast(row).unwrap());
        assert!(!flat.has_external());
        let (value, _) = host.fastgetattr(&flat, 1, &desc);
        assert_eq!(host.detoast(value).unwrap().data_any(), &[b'z'; 100][..]);
    }

    #[test]
    #[should_panic(expected = "does not reference memory")]
    fn test_dangling_varlena_aborts() {
        let host = backend();
        let oid = host.create_composite_type("t1", &[("s", "text")]).unwrap();
        let desc = host.lookup_rowtype_tupdesc(oid, -1).unwrap();
        host.form_tuple(&desc, &[Datum::from_i64(12)], &[false]);
    }

    #[test]
    fn test_widest_row_keeps_header_offset() {
        let host = backend();
        let names: Vec<String> = (0..MAX_HEAP_ATTRIBUTE_NUMBER).map(|i| format!("c{i}")).collect();
        let columns: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "int4")).collect();
        let oid = host.create_composite_type("wide", &columns).unwrap();
        let desc = host.catalog.peek_rowtype(oid, -1).unwrap();

        let values: Vec<Datum> = (0..MAX_HEAP_ATTRIBUTE_NUMBER as i32).map(Datum::from_i32).collect();
        let mut nulls = vec![false; MAX_HEAP_ATTRIBUTE_NUMBER];
        nulls[0] = true;
        let tuple = host.form_tuple(&desc, &values, &nulls);

        // 23-byte header plus a 200-byte null bitmap.
        assert_eq!(tuple.hoff(), 224);
        assert!(host.fastgetattr(&tuple, 1, &desc).1);
        assert_eq!(host.fastgetattr(&tuple, 2, &desc).0.as_i32(), 1);
        assert_eq!(host.fastgetattr(&tuple, 1600, &desc).0.as_i32(), 1599);
    }

    #[test]
    #[should_panic(expected = "number of columns (1601) exceeds limit")]
    fn test_too_many_columns_aborts() {
        let host = backend();
        let attrs = (0..=MAX_HEAP_ATTRIBUTE_NUMBER)
            .map(|i| host.catalog.attribute(&format!("c{i}"), type_oid::INT4).unwrap())
            .collect();
        let desc = host.catalog.bless(attrs);
        let n = MAX_HEAP_ATTRIBUTE_NUMBER + 1;
        host.form_tuple(&desc, &vec![Datum::NULL; n], &vec![true; n]);
    }

    #[test]
    fn test_fixed_width_words_survive_deform() {
        let host = backend();
        let oid = host
            .create_composite_type("words", &[("r", "float4"), ("o", "oid"), ("i", "int4"), ("c", "char")])
            .unwrap();
        let desc = host.catalog.peek_rowtype(oid, -1).unwrap();
        let values = [
            Datum::from_f32(-1.5),
            Datum::from_u32(u32::MAX),
            Datum::from_i32(i32::MIN),
            Datum::from_i8(-3),
        ];
        let tuple = host.form_tuple(&desc, &values, &[false; 4]);
        let mut out = [Datum::NULL; 4];
        let mut nulls = [true; 4];
        host.heap_deform_tuple(&tuple, &desc, &mut out, &mut nulls);
        assert_eq!(out, values);
        assert_eq!(out[0].raw(), 0x0000_0000_bfc0_0000);
    }

    #[test]
    #[should_panic(expected = "invalid attribute number 0")]
    fn test_fastgetattr_bounds() {
        let host = backend();
        let oid = host.create_composite_type("t2", &[("a", "int4")]).unwrap();
        let desc = host.catalog.peek_rowtype(oid, -1).unwrap();
        let tuple = host.form_tuple(&desc, &[Datum::from_i32(1)], &[false]);
        host.fastgetattr(&tuple, 0, &desc);
    }
}
