//! A scripted SPI host for unit tests.
//!
//! Rows are plain varlenas holding, per attribute, one null flag byte and
//! an 8-byte word.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pgext_core::*;

pub(crate) struct ScriptedSpi {
    pub code: Cell<i32>,
    pub connect_code: Cell<i32>,
    pub processed: Cell<u64>,
    pub natts: Cell<usize>,
    rows: Option<Vec<Vec<Option<i64>>>>,
    table: RefCell<Option<Rc<SpiTupleTable>>>,
    pub connects: Cell<u32>,
    pub finishes: Cell<u32>,
    pub last_read_only: Cell<Option<bool>>,
    pub last_tcount: Cell<i64>,
}

impl ScriptedSpi {
    /// Every statement returns `code` and reports `processed` rows, with no
    /// result table.
    pub fn new(code: i32, processed: u64) -> Self {
        Self {
            code: Cell::new(code),
            connect_code: Cell::new(SPI_OK_CONNECT),
            processed: Cell::new(processed),
            natts: Cell::new(0),
            rows: None,
            table: RefCell::new(None),
            connects: Cell::new(0),
            finishes: Cell::new(0),
            last_read_only: Cell::new(None),
            last_tcount: Cell::new(0),
        }
    }

    /// Every statement is a select returning `rows` of int8 columns.
    pub fn with_rows(rows: &[&[Option<i64>]]) -> Self {
        let mut host = Self::new(SPI_OK_SELECT, rows.len() as u64);
        host.natts.set(rows.first().map_or(0, |r| r.len()));
        host.rows = Some(rows.iter().map(|r| r.to_vec()).collect());
        host
    }

    fn encode(row: &[Option<i64>]) -> HeapTuple {
        let mut payload = Vec::with_capacity(row.len() * 9);
        for value in row {
            payload.push(value.is_none() as u8);
            payload.extend_from_slice(&value.unwrap_or(0).to_le_bytes());
        }
        HeapTuple::from_varlena(Varlena::new_4b(&payload))
    }
}

impl SpiBackend for ScriptedSpi {
    fn spi_connect(&self) -> i32 {
        self.connects.set(self.connects.get() + 1);
        self.connect_code.get()
    }

    fn spi_execute(&self, _src: &str, read_only: bool, tcount: i64) -> i32 {
        self.last_read_only.set(Some(read_only));
        self.last_tcount.set(tcount);
        if let Some(rows) = &self.rows {
            let attrs = (0..self.natts.get())
                .map(|i| Attribute {
                    name: format!("c{}", i + 1),
                    type_id: type_oid::INT8,
                    typmod: -1,
                    len: 8,
                    by_val: true,
                    align: 8,
                })
                .collect();
            let desc = Rc::new(TupleDescData::new(type_oid::RECORD, 0, attrs, TUPDESC_NOT_REFCOUNTED));
            let vals = rows.iter().map(|r| Self::encode(r)).collect();
            *self.table.borrow_mut() = Some(Rc::new(SpiTupleTable { tupdesc: desc, vals }));
        }
        self.code.get()
    }

    fn spi_finish(&self) -> i32 {
        self.finishes.set(self.finishes.get() + 1);
        *self.table.borrow_mut() = None;
        SPI_OK_FINISH
    }

    fn spi_processed(&self) -> u64 {
        self.processed.get()
    }

    fn spi_tuptable(&self) -> Option<Rc<SpiTupleTable>> {
        self.table.borrow().clone()
    }
}

impl HeapAccess for ScriptedSpi {
    fn heap_form_tuple(&self, _desc: &TupleDescData, _values: &[Datum], _nulls: &[bool]) -> HeapTuple {
        unimplemented!("scripted SPI host does not form tuples")
    }

    fn heap_deform_tuple(
        &self,
        tuple: &HeapTuple,
        desc: &TupleDescData,
        values: &mut [Datum],
        nulls: &mut [bool],
    ) {
        for i in 0..desc.natts() {
            let (value, isnull) = self.fastgetattr(tuple, i as i32 + 1, desc);
            values[i] = value;
            nulls[i] = isnull;
        }
    }

    fn fastgetattr(&self, tuple: &HeapTuple, attnum: i32, _desc: &TupleDescData) -> (Datum, bool) {
        let at = (attnum as usize - 1) * 9;
        let payload = tuple.t_data.data_any();
        if payload[at] == 1 {
            return (Datum::NULL, true);
        }
        let word: [u8; 8] = payload[at + 1..at + 9].try_into().unwrap();
        (Datum::from_i64(i64::from_le_bytes(word)), false)
    }

    fn heap_tuple_header_get_datum(&self, _tuple: &HeapTuple) -> Datum {
        unimplemented!("scripted SPI host does not produce row datums")
    }
}
