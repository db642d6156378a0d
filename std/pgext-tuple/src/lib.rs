///
/// pgext Composite Rows
///
/// `PgTuple` is either a view over an existing composite row datum or a
/// freshly built row of a named composite type. Either way it owns one
/// reference to the row type's tuple descriptor and releases it when
/// dropped (descriptors carrying the `-1` sentinel are never released).
///
/// Decoding:
/// - `from_datum` detoasts the row, reads its type id and typmod from the
///   tuple header and resolves the descriptor. An unresolvable row type
///   aborts the call; an unmaterializable datum is `None`.
/// - `get` reads one 1-based attribute, value and null flag together.
/// - `rebind` points the view at another row of the same type without a new
///   descriptor lookup. A row that cannot be detoasted leaves the view on
///   its previous row.
///
/// Encoding:
/// - `build` resolves a type name, checks the declared arity against the
///   descriptor and hands the parallel value/null buffers to the host's
///   row former. `into_datum` gives the row to the caller.
///

use std::fmt;

use pgext_core::{
    abort, BridgeError, Catalog, Datum, DatumRepr, HeapAccess, HeapTuple, Toast, TupleDescData,
    TupleDescGuard, INVALID_OID,
};

/// Everything a row view needs from the host.
pub trait RowHost: Toast + Catalog + HeapAccess {}

impl<T> RowHost for T where T: Toast + Catalog + HeapAccess + ?Sized {}

pub struct PgTuple<'h, H: RowHost + ?Sized> {
    host: &'h H,
    desc: TupleDescGuard<'h, H>,
    tuple: HeapTuple,
}

impl<'h, H: RowHost + ?Sized> PgTuple<'h, H> {
    /// Binds a composite row datum. `None` if the host cannot detoast it or
    /// the blob is too short to carry a tuple header.
    pub fn from_datum(host: &'h H, datum: Datum) -> Option<Self> {
        let Some(blob) = host.detoast(datum) else {
            tracing::debug!(?datum, "row datum could not be detoasted");
            return None;
        };
        let tuple = HeapTuple::from_varlena(blob);
        let Some(fields) = tuple.datum_tuple_fields() else {
            tracing::debug!(len = tuple.t_len, "row datum too short for a tuple header");
            return None;
        };

        let type_id = fields.datum_typeid;
        let typmod = fields.datum_typmod;
        let desc = match host.lookup_rowtype_tupdesc(type_id, typmod) {
            Some(desc) => desc,
            None => abort(BridgeError::UnresolvedRowType { type_id, typmod }),
        };

        Some(Self {
            host,
            desc: TupleDescGuard::new(host, desc),
            tuple,
        })
    }

    /// Forms a new row of the composite type `type_name`.
    pub fn build<const N: usize>(host: &'h H, type_name: &str, values: [Option<Datum>; N]) -> Self {
        let type_id = host.typename_get_typid(type_name);
        if type_id == INVALID_OID {
            abort(BridgeError::UnknownTypeName {
                name: type_name.to_string(),
            });
        }
        let desc = match host.lookup_rowtype_tupdesc(type_id, -1) {
            Some(desc) => TupleDescGuard::new(host, desc),
            None => abort(BridgeError::UnresolvedRowType { type_id, typmod: -1 }),
        };
        check_arity::<N>(&desc);

        let mut datums = [Datum::NULL; N];
        let mut nulls = [false; N];
        for (i, value) in values.into_iter().enumerate() {
            match value {
                Some(d) => datums[i] = d,
                None => nulls[i] = true,
            }
        }

        let tuple = host.heap_form_tuple(&desc, &datums, &nulls);
        tracing::trace!(type_name, len = tuple.t_len, "formed row");
        Self { host, desc, tuple }
    }

    /// Hands the row to the host and returns its datum.
    pub fn into_datum(self) -> Datum {
        self.host.heap_tuple_header_get_datum(&self.tuple)
    }

    /// Value of the 1-based attribute `attnum`, `None` when it is NULL.
    pub fn get(&self, attnum: i32) -> Option<Datum> {
        let natts = self.desc.natts();
        if attnum < 1 || attnum as usize > natts {
            abort(BridgeError::ColumnOutOfRange { attnum, natts });
        }
        let (value, isnull) = self.host.fastgetattr(&self.tuple, attnum, &self.desc);
        if isnull { None } else { Some(value) }
    }

    /// Reads attribute `attnum` and converts it. `None` for NULL or for a
    /// value whose storage cannot be materialized.
    pub fn get_as<T: DatumRepr>(&self, attnum: i32) -> Option<T> {
        let datum = self.get(attnum)?;
        T::from_datum(self.host, datum)
    }

    /// Points the view at another row of the same type.
    ///
    /// When `datum` cannot be detoasted the view keeps its current row.
    pub fn rebind(&mut self, datum: Datum) {
        match self.host.detoast(datum) {
            Some(blob) => self.tuple = HeapTuple::from_varlena(blob),
            None => tracing::debug!(?datum, "rebind target could not be detoasted, keeping row"),
        }
    }

    /// Every attribute of the row, in order.
    pub fn values<const N: usize>(&self) -> [Option<Datum>; N] {
        check_arity::<N>(&self.desc);
        let mut datums = [Datum::NULL; N];
        let mut nulls = [false; N];
        self.host
            .heap_deform_tuple(&self.tuple, &self.desc, &mut datums, &mut nulls);
        let mut out = [None; N];
        for i in 0..N {
            if !nulls[i] {
                out[i] = Some(datums[i]);
            }
        }
        out
    }

    pub fn desc(&self) -> &TupleDescData {
        &self.desc
    }

    pub fn natts(&self) -> usize {
        self.desc.natts()
    }

    pub fn tuple(&self) -> &HeapTuple {
        &self.tuple
    }
}

impl<H: RowHost + ?Sized> fmt::Debug for PgTuple<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTuple")
            .field("desc", &*self.desc)
            .field("len", &self.tuple.t_len)
            .finish()
    }
}

fn check_arity<const N: usize>(desc: &TupleDescData) {
    if desc.natts() != N {
        abort(BridgeError::ArityMismatch {
            declared: N,
            actual: desc.natts(),
        });
    }
}
