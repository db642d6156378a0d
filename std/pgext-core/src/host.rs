///
/// Host boundary.
///
/// The host database exposes its primitives as free functions and globals.
/// Here they are grouped into traits so that the safe layers in
/// `pgext-tuple` and `pgext-spi` can be written once and run against any
/// host: the in-process `pgext-runtime::Backend`, or small mocks in tests.
///
/// Return conventions are kept exactly: SPI calls return the host's numeric
/// result codes, `typename_get_typid` returns `INVALID_OID` on a miss, and
/// descriptors carry the host's reference count including the `-1`
/// "not reference counted" sentinel.
///
/// All methods take `&self`. Hosts are expected to use `Cell`/`RefCell`
/// for their state: calls are single-threaded and never reentrant.
///

use std::any::Any;
use std::ffi::{CStr, CString};
use std::rc::Rc;

use crate::datum::Datum;
use crate::htup::HeapTuple;
use crate::tupdesc::{TupleDesc, TupleDescData};
use crate::varlena::Varlena;

/// Catalog object identifier.
pub type Oid = u32;

pub const INVALID_OID: Oid = 0;

/// Built-in type OIDs.
pub mod type_oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const VARCHAR: Oid = 1043;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const RECORD: Oid = 2249;
}

pub const SPI_OK_CONNECT: i32 = 1;
pub const SPI_OK_FINISH: i32 = 2;
pub const SPI_OK_FETCH: i32 = 3;
pub const SPI_OK_UTILITY: i32 = 4;
pub const SPI_OK_SELECT: i32 = 5;
pub const SPI_OK_SELINTO: i32 = 6;
pub const SPI_OK_INSERT: i32 = 7;
pub const SPI_OK_DELETE: i32 = 8;
pub const SPI_OK_UPDATE: i32 = 9;
pub const SPI_OK_CURSOR: i32 = 10;
pub const SPI_OK_INSERT_RETURNING: i32 = 11;
pub const SPI_OK_DELETE_RETURNING: i32 = 12;
pub const SPI_OK_UPDATE_RETURNING: i32 = 13;
pub const SPI_OK_REWRITTEN: i32 = 14;
pub const SPI_OK_REL_REGISTER: i32 = 15;
pub const SPI_OK_REL_UNREGISTER: i32 = 16;
pub const SPI_OK_TD_REGISTER: i32 = 17;
pub const SPI_OK_MERGE: i32 = 18;
pub const SPI_OK_MERGE_RETURNING: i32 = 19;

pub const SPI_ERROR_CONNECT: i32 = -1;
pub const SPI_ERROR_COPY: i32 = -2;
pub const SPI_ERROR_OPUNKNOWN: i32 = -3;
pub const SPI_ERROR_UNCONNECTED: i32 = -4;
pub const SPI_ERROR_CURSOR: i32 = -5;
pub const SPI_ERROR_ARGUMENT: i32 = -6;
pub const SPI_ERROR_PARAM: i32 = -7;
pub const SPI_ERROR_TRANSACTION: i32 = -8;
pub const SPI_ERROR_NOATTRIBUTE: i32 = -9;
pub const SPI_ERROR_NOOUTFUNC: i32 = -10;
pub const SPI_ERROR_TYPUNKNOWN: i32 = -11;
pub const SPI_ERROR_REL_DUPLICATE: i32 = -12;
pub const SPI_ERROR_REL_NOT_FOUND: i32 = -13;

/// Materialization of varlena storage and creation of text values.
pub trait Toast {
    /// Fully detoasts the referenced value into a plain 4-byte-header blob.
    /// `None` when the reference cannot be materialized.
    fn detoast(&self, datum: Datum) -> Option<Varlena>;

    /// Like `detoast`, but a value with a 1-byte header may be returned as is.
    fn detoast_packed(&self, datum: Datum) -> Option<Varlena> {
        self.detoast(datum)
    }

    /// Allocates a text value from `bytes` (one varlena of `len + VARHDRSZ`).
    fn cstring_to_text_with_len(&self, bytes: &[u8]) -> Datum;

    /// Allocates a text value from a NUL-terminated string.
    fn cstring_to_text(&self, s: &CStr) -> Datum;
}

/// Type lookups against the host's catalog and descriptor cache.
pub trait Catalog {
    /// `INVALID_OID` when no type has this name.
    fn typename_get_typid(&self, name: &str) -> Oid;

    /// Looks up a row type's descriptor. Reference counted descriptors are
    /// returned with their count already incremented for the caller.
    fn lookup_rowtype_tupdesc(&self, type_id: Oid, typmod: i32) -> Option<TupleDesc>;

    /// Releases one reference taken by `lookup_rowtype_tupdesc`.
    fn decr_tupdesc_refcount(&self, desc: &TupleDesc);

    fn get_enum_label(&self, oid: Oid) -> Option<CString>;
}

/// Physical row forming and field access.
pub trait HeapAccess {
    fn heap_form_tuple(&self, desc: &TupleDescData, values: &[Datum], nulls: &[bool]) -> HeapTuple;

    /// Decodes every attribute into `values`/`nulls`, which must hold at least
    /// `desc.natts()` entries.
    fn heap_deform_tuple(
        &self,
        tuple: &HeapTuple,
        desc: &TupleDescData,
        values: &mut [Datum],
        nulls: &mut [bool],
    );

    /// Value and null flag of one 1-based attribute.
    fn fastgetattr(&self, tuple: &HeapTuple, attnum: i32, desc: &TupleDescData) -> (Datum, bool);

    /// Turns a formed tuple into a row datum owned by the host.
    fn heap_tuple_header_get_datum(&self, tuple: &HeapTuple) -> Datum;
}

/// The server programming interface: statement execution inside the host.
pub trait SpiBackend {
    fn spi_connect(&self) -> i32;

    /// Executes one statement. `tcount` limits the rows returned (0: no limit).
    fn spi_execute(&self, src: &str, read_only: bool, tcount: i64) -> i32;

    fn spi_finish(&self) -> i32;

    /// Rows processed by the last `spi_execute`.
    fn spi_processed(&self) -> u64;

    /// Result rows of the last `spi_execute`, when it produced any.
    fn spi_tuptable(&self) -> Option<Rc<SpiTupleTable>>;
}

/// Opaque `internal` values handed to functions, such as aggregate states.
pub trait InternalState {
    fn internal_state(&self, datum: Datum) -> Option<Rc<dyn Any>>;
}

/// Everything the safe layers need from a host.
pub trait Host: Toast + Catalog + HeapAccess + SpiBackend + InternalState {}

impl<T> Host for T where T: Toast + Catalog + HeapAccess + SpiBackend + InternalState + ?Sized {}

/// Rows produced by a statement, with the descriptor they are laid out by.
#[derive(Debug)]
pub struct SpiTupleTable {
    pub tupdesc: TupleDesc,
    pub vals: Vec<HeapTuple>,
}

impl SpiTupleTable {
    pub fn numvals(&self) -> u64 {
        self.vals.len() as u64
    }
}
