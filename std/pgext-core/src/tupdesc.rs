///
/// Tuple descriptors.
///
/// A descriptor is shared between whoever decodes or builds rows of its
/// type and the host's process-wide type cache. The host tracks sharing with
/// `refcount`; a count of `-1` marks a descriptor that is borrowed from a
/// global and must never be released.
///

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::host::{Catalog, Oid};

/// Reference count of descriptors that are not reference counted.
pub const TUPDESC_NOT_REFCOUNTED: i32 = -1;

/// Storage properties of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub type_id: Oid,
    pub typmod: i32,
    /// Fixed byte length, or -1 for varlena types.
    pub len: i16,
    pub by_val: bool,
    /// Alignment in bytes: 1, 2, 4 or 8.
    pub align: usize,
}

impl Attribute {
    pub fn is_varlena(&self) -> bool {
        self.len == -1
    }
}

pub struct TupleDescData {
    type_id: Oid,
    typmod: i32,
    attrs: Vec<Attribute>,
    refcount: Cell<i32>,
}

/// Shared handle to a descriptor.
pub type TupleDesc = Rc<TupleDescData>;

impl TupleDescData {
    pub fn new(type_id: Oid, typmod: i32, attrs: Vec<Attribute>, refcount: i32) -> Self {
        Self {
            type_id,
            typmod,
            attrs,
            refcount: Cell::new(refcount),
        }
    }

    pub fn natts(&self) -> usize {
        self.attrs.len()
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Zero-based attribute lookup.
    pub fn attr(&self, index: usize) -> Option<&Attribute> {
        self.attrs.get(index)
    }

    pub fn type_id(&self) -> Oid {
        self.type_id
    }

    pub fn typmod(&self) -> i32 {
        self.typmod
    }

    pub fn refcount(&self) -> i32 {
        self.refcount.get()
    }

    pub fn is_refcounted(&self) -> bool {
        self.refcount.get() >= 0
    }

    pub fn incr_refcount(&self) {
        if self.is_refcounted() {
            self.refcount.set(self.refcount.get() + 1);
        }
    }

    /// Returns the count after decrementing.
    pub fn decr_refcount(&self) -> i32 {
        let next = self.refcount.get() - 1;
        self.refcount.set(next);
        next
    }
}

impl fmt::Debug for TupleDescData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleDesc")
            .field("type_id", &self.type_id)
            .field("typmod", &self.typmod)
            .field("natts", &self.attrs.len())
            .field("refcount", &self.refcount.get())
            .finish()
    }
}

/// Owns one reference to a descriptor and releases it on drop.
///
/// Descriptors carrying the `-1` sentinel are never released.
pub struct TupleDescGuard<'h, C: Catalog + ?Sized> {
    host: &'h C,
    desc: TupleDesc,
}

impl<'h, C: Catalog + ?Sized> TupleDescGuard<'h, C> {
    /// Takes over a reference obtained from `lookup_rowtype_tupdesc` (or a
    /// sentinel descriptor, which needs none).
    pub fn new(host: &'h C, desc: TupleDesc) -> Self {
        Self { host, desc }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }
}

impl<C: Catalog + ?Sized> Deref for TupleDescGuard<'_, C> {
    type Target = TupleDescData;

    fn deref(&self) -> &TupleDescData {
        &self.desc
    }
}

impl<C: Catalog + ?Sized> Drop for TupleDescGuard<'_, C> {
    fn drop(&mut self) {
        if self.desc.refcount() >= 0 {
            tracing::debug!(type_id = self.desc.type_id(), "releasing tuple descriptor");
            self.host.decr_tupdesc_refcount(&self.desc);
        }
    }
}

impl<C: Catalog + ?Sized> fmt::Debug for TupleDescGuard<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TupleDescGuard").field(&self.desc).finish()
    }
}
