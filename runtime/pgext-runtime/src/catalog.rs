///
/// Type catalog and tuple descriptor cache.
///
/// Holds the built-in scalar types under their PostgreSQL OIDs, composite
/// and enum types created at runtime, and anonymous record descriptors
/// blessed from SPI results.
///
/// Descriptor reference counting:
/// - Cached composite descriptors start at 1, the cache's own reference.
///   `lookup_rowtype_tupdesc` adds one for the caller and
///   `decr_tupdesc_refcount` gives it back. Giving back the cache's own
///   reference is a double release and raises a host error.
/// - Static composites and blessed records carry the `-1` sentinel and are
///   never counted.
///

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::CString;

use indexmap::IndexMap;
use pgext_core::{
    type_oid, Attribute, Catalog, Oid, TupleDesc, TupleDescData, INVALID_OID,
    TUPDESC_NOT_REFCOUNTED,
};
use std::rc::Rc;

use crate::error::{host_abort, HostError};
use crate::Backend;

/// First OID handed out to user-defined objects.
pub const FIRST_NORMAL_OBJECT_ID: Oid = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Base,
    Composite,
    Enum,
    Pseudo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub oid: Oid,
    pub name: String,
    pub len: i16,
    pub by_val: bool,
    pub align: usize,
    pub kind: TypeKind,
}

const BUILTIN_TYPES: &[(Oid, &str, i16, bool, usize)] = &[
    (type_oid::BOOL, "bool", 1, true, 1),
    (type_oid::BYTEA, "bytea", -1, false, 4),
    (type_oid::CHAR, "char", 1, true, 1),
    (type_oid::INT8, "int8", 8, true, 8),
    (type_oid::INT2, "int2", 2, true, 2),
    (type_oid::INT4, "int4", 4, true, 4),
    (type_oid::TEXT, "text", -1, false, 4),
    (type_oid::OID, "oid", 4, true, 4),
    (type_oid::FLOAT4, "float4", 4, true, 4),
    (type_oid::FLOAT8, "float8", 8, true, 8),
    (type_oid::VARCHAR, "varchar", -1, false, 4),
    (type_oid::TIMESTAMP, "timestamp", 8, true, 8),
    (type_oid::TIMESTAMPTZ, "timestamptz", 8, true, 8),
];

const TYPE_ALIASES: &[(&str, &str)] = &[
    ("boolean", "bool"),
    ("smallint", "int2"),
    ("integer", "int4"),
    ("int", "int4"),
    ("bigint", "int8"),
    ("real", "float4"),
    ("double precision", "float8"),
    ("double", "float8"),
    ("float", "float8"),
    ("character varying", "varchar"),
    ("character", "text"),
    ("string", "text"),
    ("blob", "bytea"),
    ("timestamp without time zone", "timestamp"),
    ("timestamp with time zone", "timestamptz"),
    ("datetime", "timestamp"),
];

pub(crate) struct TypeCatalog {
    types: RefCell<IndexMap<Oid, TypeInfo>>,
    names: RefCell<HashMap<String, Oid>>,
    rowtypes: RefCell<HashMap<Oid, TupleDesc>>,
    enum_labels: RefCell<HashMap<Oid, (Oid, String)>>,
    enum_values: RefCell<HashMap<Oid, IndexMap<String, Oid>>>,
    records: RefCell<Vec<TupleDesc>>,
    next_oid: Cell<Oid>,
    lookups: Cell<u64>,
    releases: Cell<u64>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        let catalog = Self {
            types: RefCell::new(IndexMap::new()),
            names: RefCell::new(HashMap::new()),
            rowtypes: RefCell::new(HashMap::new()),
            enum_labels: RefCell::new(HashMap::new()),
            enum_values: RefCell::new(HashMap::new()),
            records: RefCell::new(Vec::new()),
            next_oid: Cell::new(FIRST_NORMAL_OBJECT_ID),
            lookups: Cell::new(0),
            releases: Cell::new(0),
        };
        for &(oid, name, len, by_val, align) in BUILTIN_TYPES {
            catalog.register(TypeInfo {
                oid,
                name: name.to_string(),
                len,
                by_val,
                align,
                kind: TypeKind::Base,
            });
        }
        catalog.register(TypeInfo {
            oid: type_oid::RECORD,
            name: "record".to_string(),
            len: -1,
            by_val: false,
            align: 8,
            kind: TypeKind::Pseudo,
        });
        let mut names = catalog.names.borrow_mut();
        for &(alias, target) in TYPE_ALIASES {
            if let Some(&oid) = names.get(target) {
                names.insert(alias.to_string(), oid);
            }
        }
        drop(names);
        catalog
    }

    fn register(&self, info: TypeInfo) {
        self.names.borrow_mut().insert(info.name.clone(), info.oid);
        self.types.borrow_mut().insert(info.oid, info);
    }

    fn next_oid(&self) -> Oid {
        let oid = self.next_oid.get();
        self.next_oid.set(oid + 1);
        oid
    }

    pub fn type_info(&self, oid: Oid) -> Option<TypeInfo> {
        self.types.borrow().get(&oid).cloned()
    }

    /// Exact name lookup, aliases included.
    pub fn type_oid(&self, name: &str) -> Option<Oid> {
        self.names.borrow().get(name).copied()
    }

    /// Resolves a declared SQL column type such as `"VARCHAR(20)"` or
    /// `"Double Precision"`.
    pub fn resolve_declared_type(&self, decl: &str) -> Option<Oid> {
        let base = decl.split('(').next().unwrap_or(decl);
        let normalized = base.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        self.type_oid(&normalized)
    }

    fn ensure_new_name(&self, name: &str) -> Result<(), HostError> {
        if self.names.borrow().contains_key(name) {
            return Err(HostError::DuplicateType {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn attribute(&self, name: &str, type_id: Oid) -> Result<Attribute, HostError> {
        let info = self.type_info(type_id).ok_or_else(|| HostError::UnknownTypeName {
            name: type_id.to_string(),
        })?;
        Ok(Attribute {
            name: name.to_string(),
            type_id,
            typmod: -1,
            len: info.len,
            by_val: info.by_val,
            align: info.align,
        })
    }

    pub fn create_composite(
        &self,
        name: &str,
        columns: &[(&str, &str)],
        refcounted: bool,
    ) -> Result<Oid, HostError> {
        self.ensure_new_name(name)?;
        let mut attrs = Vec::with_capacity(columns.len());
        for (column, type_name) in columns {
            let type_id = self
                .type_oid(type_name)
                .ok_or_else(|| HostError::UnknownTypeName {
                    name: type_name.to_string(),
                })?;
            attrs.push(self.attribute(column, type_id)?);
        }

        let oid = self.next_oid();
        let refcount = if refcounted { 1 } else { TUPDESC_NOT_REFCOUNTED };
        let desc = Rc::new(TupleDescData::new(oid, -1, attrs, refcount));
        self.rowtypes.borrow_mut().insert(oid, desc);
        self.register(TypeInfo {
            oid,
            name: name.to_string(),
            len: -1,
            by_val: false,
            align: 8,
            kind: TypeKind::Composite,
        });
        tracing::debug!(name, oid, natts = columns.len(), refcounted, "created composite type");
        Ok(oid)
    }

    pub fn create_enum(&self, name: &str, labels: &[&str]) -> Result<Oid, HostError> {
        self.ensure_new_name(name)?;
        let type_id = self.next_oid();
        let mut values = IndexMap::new();
        for label in labels {
            let label_oid = self.next_oid();
            values.insert(label.to_string(), label_oid);
            self.enum_labels
                .borrow_mut()
                .insert(label_oid, (type_id, label.to_string()));
        }
        self.enum_values.borrow_mut().insert(type_id, values);
        self.register(TypeInfo {
            oid: type_id,
            name: name.to_string(),
            len: 4,
            by_val: true,
            align: 4,
            kind: TypeKind::Enum,
        });
        tracing::debug!(name, oid = type_id, labels = labels.len(), "created enum type");
        Ok(type_id)
    }

    pub fn enum_value(&self, type_id: Oid, label: &str) -> Option<Oid> {
        self.enum_values.borrow().get(&type_id)?.get(label).copied()
    }

    pub fn enum_label(&self, label_oid: Oid) -> Option<String> {
        self.enum_labels
            .borrow()
            .get(&label_oid)
            .map(|(_, label)| label.clone())
    }

    /// Registers an anonymous record descriptor, reusing an identical one.
    pub fn bless(&self, attrs: Vec<Attribute>) -> TupleDesc {
        let mut records = self.records.borrow_mut();
        if let Some(existing) = records.iter().find(|d| d.attrs() == attrs.as_slice()) {
            return existing.clone();
        }
        let typmod = records.len() as i32;
        let desc = Rc::new(TupleDescData::new(
            type_oid::RECORD,
            typmod,
            attrs,
            TUPDESC_NOT_REFCOUNTED,
        ));
        records.push(desc.clone());
        tracing::trace!(typmod, "blessed record type");
        desc
    }

    /// The cached descriptor without taking a reference.
    pub fn peek_rowtype(&self, type_id: Oid, typmod: i32) -> Option<TupleDesc> {
        if type_id == type_oid::RECORD {
            let index = usize::try_from(typmod).ok()?;
            return self.records.borrow().get(index).cloned();
        }
        self.rowtypes.borrow().get(&type_id).cloned()
    }

    pub fn refcount(&self, type_id: Oid) -> Option<i32> {
        self.rowtypes.borrow().get(&type_id).map(|d| d.refcount())
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.get()
    }

    pub fn releases(&self) -> u64 {
        self.releases.get()
    }
}

impl Catalog for Backend {
    fn typename_get_typid(&self, name: &str) -> Oid {
        self.catalog.type_oid(name).unwrap_or(INVALID_OID)
    }

    fn lookup_rowtype_tupdesc(&self, type_id: Oid, typmod: i32) -> Option<TupleDesc> {
        let desc = self.catalog.peek_rowtype(type_id, typmod)?;
        self.catalog.lookups.set(self.catalog.lookups.get() + 1);
        desc.incr_refcount();
        tracing::trace!(type_id, typmod, refcount = desc.refcount(), "tuple descriptor lookup");
        Some(desc)
    }

    fn decr_tupdesc_refcount(&self, desc: &TupleDesc) {
        if !desc.is_refcounted() {
            return;
        }
        if desc.refcount() <= 1 {
            host_abort(HostError::DoubleRelease {
                type_id: desc.type_id(),
            });
        }
        desc.decr_refcount();
        self.catalog.releases.set(self.catalog.releases.get() + 1);
    }

    fn get_enum_label(&self, oid: Oid) -> Option<CString> {
        let label = self.catalog.enum_label(oid)?;
        CString::new(label).ok()
    }
}
