///
/// SPI backed by SQLite.
///
/// Statements run against the backend's rusqlite connection. The keyword
/// of the main statement (after comments and any `WITH` list) decides the
/// result code:
/// - `SELECT`, `VALUES`: `SPI_OK_SELECT`, rows in `SPI_tuptable`
/// - `INSERT`, `UPDATE`, `DELETE`: `SPI_OK_INSERT`/`UPDATE`/`DELETE`, or the
///   `*_RETURNING` codes with rows when the prepared statement has result
///   columns
/// - anything else: `SPI_OK_UTILITY`
///
/// Read-only execution rejects write statements and any statement SQLite
/// does not report as read-only.
///
/// Result rows are read into owned values first and then formed into heap
/// tuples under a blessed record descriptor. Column types come from the
/// declared column type when it names a known type and from the first
/// non-NULL value otherwise (INTEGER → int8, REAL → float8,
/// TEXT → text, BLOB → bytea).
///
/// Failures the host would raise as errors (SQL errors, writes in read-only
/// mode, several statements at once, values that do not fit the column
/// type) abort the call. Executing without a connection returns
/// `SPI_ERROR_UNCONNECTED`.
///

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pgext_core::{
    type_oid, Attribute, Datum, Oid, SpiBackend, SpiTupleTable, SPI_ERROR_ARGUMENT, SPI_ERROR_UNCONNECTED,
    SPI_OK_CONNECT, SPI_OK_DELETE, SPI_OK_DELETE_RETURNING, SPI_OK_FINISH, SPI_OK_INSERT,
    SPI_OK_INSERT_RETURNING, SPI_OK_SELECT, SPI_OK_UPDATE, SPI_OK_UPDATE_RETURNING, SPI_OK_UTILITY,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Statement};

use crate::catalog::{TypeInfo, TypeKind};
use crate::error::{host_abort, HostError};
use crate::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

impl StatementKind {
    pub fn is_write(self) -> bool {
        matches!(self, StatementKind::Insert | StatementKind::Update | StatementKind::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Symbol(char),
    Quoted,
}

/// Splits SQL into upper-cased words, symbols and quoted runs. Comments
/// and whitespace are dropped.
fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                }
                tokens.push(Token::Quoted);
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            c if c.is_whitespace() => {}
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut word = c.to_ascii_uppercase().to_string();
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_') {
                        break;
                    }
                    word.push(next.to_ascii_uppercase());
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            c => tokens.push(Token::Symbol(c)),
        }
    }
    tokens
}

/// Words outside parentheses, in order.
fn top_level_words(sql: &str) -> Vec<String> {
    let mut depth = 0i32;
    let mut words = Vec::new();
    for token in tokenize(sql) {
        match token {
            Token::Symbol('(') => depth += 1,
            Token::Symbol(')') => depth -= 1,
            Token::Word(word) if depth == 0 => words.push(word),
            _ => {}
        }
    }
    words
}

/// The keyword of the main statement. A `WITH` prefix is skipped up to
/// the statement that follows its common table expressions.
pub fn main_keyword(sql: &str) -> Option<String> {
    let mut words = top_level_words(sql).into_iter();
    let first = words.next()?;
    if first != "WITH" {
        return Some(first);
    }
    words.find(|w| matches!(w.as_str(), "SELECT" | "VALUES" | "INSERT" | "REPLACE" | "UPDATE" | "DELETE"))
}

pub fn classify(sql: &str) -> StatementKind {
    match main_keyword(sql).as_deref() {
        Some("SELECT" | "VALUES") => StatementKind::Select,
        Some("INSERT" | "REPLACE") => StatementKind::Insert,
        Some("UPDATE") => StatementKind::Update,
        Some("DELETE") => StatementKind::Delete,
        _ => StatementKind::Utility,
    }
}

/// True when `sql` holds more than one statement. Semicolons inside quotes
/// and comments do not count.
pub fn has_multiple_statements(sql: &str) -> bool {
    let mut ended = false;
    for token in tokenize(sql) {
        match token {
            Token::Symbol(';') => ended = true,
            _ if ended => return true,
            _ => {}
        }
    }
    false
}

pub(crate) struct SpiState {
    conn: Connection,
    depth: Cell<u32>,
    processed: Cell<u64>,
    tuptable: RefCell<Option<Rc<SpiTupleTable>>>,
}

impl SpiState {
    pub fn open(database: &str, in_memory: bool) -> Result<Self, HostError> {
        let conn = if in_memory {
            Connection::open_in_memory()?
        } else {
            Connection::open(database)?
        };
        Ok(Self {
            conn,
            depth: Cell::new(0),
            processed: Cell::new(0),
            tuptable: RefCell::new(None),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    fn clear_results(&self) {
        self.processed.set(0);
        *self.tuptable.borrow_mut() = None;
    }
}

/// Materialized result rows.
struct ResultSet {
    names: Vec<String>,
    decltypes: Vec<Option<String>>,
    rows: Vec<Vec<SqlValue>>,
}

fn integer_value(value: &SqlValue, info: &TypeInfo) -> Result<i64, HostError> {
    match value {
        SqlValue::Integer(i) => Ok(*i),
        SqlValue::Real(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(*f as i64),
        SqlValue::Text(s) => s.trim().parse::<i64>().map_err(|_| HostError::InvalidInput {
            value: s.clone(),
            type_name: info.name.clone(),
        }),
        other => Err(HostError::InvalidInput {
            value: format!("{:?}", other),
            type_name: info.name.clone(),
        }),
    }
}

fn float_value(value: &SqlValue, info: &TypeInfo) -> Result<f64, HostError> {
    match value {
        SqlValue::Real(f) => Ok(*f),
        SqlValue::Integer(i) => Ok(*i as f64),
        SqlValue::Text(s) => s.trim().parse::<f64>().map_err(|_| HostError::InvalidInput {
            value: s.clone(),
            type_name: info.name.clone(),
        }),
        other => Err(HostError::InvalidInput {
            value: format!("{:?}", other),
            type_name: info.name.clone(),
        }),
    }
}

fn narrow<T: TryFrom<i64>>(value: i64, info: &TypeInfo) -> Result<T, HostError> {
    T::try_from(value).map_err(|_| HostError::ValueOutOfRange {
        value: value.to_string(),
        type_name: info.name.clone(),
    })
}

fn bool_value(value: &SqlValue, info: &TypeInfo) -> Result<bool, HostError> {
    if let SqlValue::Text(s) = value {
        return match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "yes" | "on" | "1" => Ok(true),
            "f" | "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(HostError::InvalidInput {
                value: s.clone(),
                type_name: info.name.clone(),
            }),
        };
    }
    Ok(integer_value(value, info)? != 0)
}

fn bytes_value(value: SqlValue) -> Vec<u8> {
    match value {
        SqlValue::Text(s) => s.into_bytes(),
        SqlValue::Blob(b) => b,
        SqlValue::Integer(i) => i.to_string().into_bytes(),
        SqlValue::Real(f) => f.to_string().into_bytes(),
        SqlValue::Null => Vec::new(),
    }
}

impl Backend {
    fn run_query(&self, stmt: &mut Statement<'_>, limit: usize) -> Result<ResultSet, HostError> {
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let decltypes: Vec<Option<String>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(|d| d.to_string()))
            .collect();
        let column_count = names.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(row.get::<_, SqlValue>(i)?);
            }
            rows.push(values);
            if limit > 0 && rows.len() >= limit {
                break;
            }
        }
        Ok(ResultSet {
            names,
            decltypes,
            rows,
        })
    }

    fn column_type(&self, decltype: Option<&str>, column: usize, rows: &[Vec<SqlValue>]) -> Oid {
        if let Some(oid) = decltype.and_then(|d| self.catalog.resolve_declared_type(d)) {
            return oid;
        }
        let sample = rows.iter().map(|r| &r[column]).find(|v| !matches!(v, SqlValue::Null));
        match sample {
            Some(SqlValue::Integer(_)) => type_oid::INT8,
            Some(SqlValue::Real(_)) => type_oid::FLOAT8,
            Some(SqlValue::Blob(_)) => type_oid::BYTEA,
            _ => type_oid::TEXT,
        }
    }

    /// Converts one SQLite value into a datum of the column type.
    fn sql_to_datum(&self, value: SqlValue, info: &TypeInfo) -> Result<Option<Datum>, HostError> {
        if matches!(value, SqlValue::Null) {
            return Ok(None);
        }
        if info.kind == TypeKind::Enum {
            let label = match value {
                SqlValue::Text(label) => label,
                other => {
                    return Err(HostError::InvalidInput {
                        value: format!("{:?}", other),
                        type_name: info.name.clone(),
                    });
                }
            };
            return match self.catalog.enum_value(info.oid, &label) {
                Some(oid) => Ok(Some(Datum::from_u32(oid))),
                None => Err(HostError::UnknownEnumLabel {
                    type_name: info.name.clone(),
                    label,
                }),
            };
        }
        if info.kind != TypeKind::Base {
            return Err(HostError::UnsupportedResultType { type_id: info.oid });
        }

        let datum = match info.oid {
            type_oid::BOOL => Datum::from_bool(bool_value(&value, info)?),
            type_oid::CHAR => match &value {
                SqlValue::Text(s) => Datum::from_i8(s.bytes().next().unwrap_or(0) as i8),
                _ => Datum::from_i8(narrow::<i8>(integer_value(&value, info)?, info)?),
            },
            type_oid::INT2 => Datum::from_i16(narrow::<i16>(integer_value(&value, info)?, info)?),
            type_oid::INT4 => Datum::from_i32(narrow::<i32>(integer_value(&value, info)?, info)?),
            type_oid::OID => Datum::from_u32(narrow::<u32>(integer_value(&value, info)?, info)?),
            type_oid::INT8 | type_oid::TIMESTAMP | type_oid::TIMESTAMPTZ => {
                Datum::from_i64(integer_value(&value, info)?)
            }
            type_oid::FLOAT4 => Datum::from_f32(float_value(&value, info)? as f32),
            type_oid::FLOAT8 => Datum::from_f64(float_value(&value, info)?),
            type_oid::TEXT | type_oid::VARCHAR | type_oid::BYTEA => {
                let bytes = bytes_value(value);
                if info.oid != type_oid::BYTEA && std::str::from_utf8(&bytes).is_err() {
                    return Err(HostError::InvalidInput {
                        value: String::from_utf8_lossy(&bytes).into_owned(),
                        type_name: info.name.clone(),
                    });
                }
                let blob = self.toast_payload(&bytes);
                self.memory.alloc_varlena(blob)
            }
            other => return Err(HostError::UnsupportedResultType { type_id: other }),
        };
        Ok(Some(datum))
    }

    fn build_tuptable(&self, result: ResultSet) -> Result<SpiTupleTable, HostError> {
        let mut attrs: Vec<Attribute> = Vec::with_capacity(result.names.len());
        let mut infos: Vec<TypeInfo> = Vec::with_capacity(result.names.len());
        for (i, name) in result.names.iter().enumerate() {
            let type_id = self.column_type(result.decltypes[i].as_deref(), i, &result.rows);
            let info = self
                .catalog
                .type_info(type_id)
                .ok_or(HostError::UnsupportedResultType { type_id })?;
            attrs.push(self.catalog.attribute(name, type_id)?);
            infos.push(info);
        }
        let tupdesc = self.catalog.bless(attrs);

        let mut vals = Vec::with_capacity(result.rows.len());
        for row in result.rows {
            let mut values = Vec::with_capacity(infos.len());
            let mut nulls = Vec::with_capacity(infos.len());
            for (value, info) in row.into_iter().zip(&infos) {
                match self.sql_to_datum(value, info)? {
                    Some(d) => {
                        values.push(d);
                        nulls.push(false);
                    }
                    None => {
                        values.push(Datum::NULL);
                        nulls.push(true);
                    }
                }
            }
            vals.push(self.form_tuple(&tupdesc, &values, &nulls));
        }
        Ok(SpiTupleTable { tupdesc, vals })
    }

    fn execute_statement(&self, src: &str, read_only: bool, tcount: i64) -> Result<i32, HostError> {
        if has_multiple_statements(src) {
            return Err(HostError::MultipleStatements);
        }
        let kind = classify(src);
        let mut stmt = self.spi.conn.prepare(src)?;
        if read_only && (kind.is_write() || !stmt.readonly()) {
            let keyword = main_keyword(src).unwrap_or_default();
            return Err(HostError::ReadOnlyViolation { keyword });
        }
        let returning = kind.is_write() && stmt.column_count() > 0;
        if kind == StatementKind::Select || returning {
            let limit = if kind == StatementKind::Select { tcount as usize } else { 0 };
            let result = self.run_query(&mut stmt, limit)?;
            let table = self.build_tuptable(result)?;
            self.spi.processed.set(table.numvals());
            *self.spi.tuptable.borrow_mut() = Some(Rc::new(table));
            return Ok(match kind {
                StatementKind::Insert => SPI_OK_INSERT_RETURNING,
                StatementKind::Update => SPI_OK_UPDATE_RETURNING,
                StatementKind::Delete => SPI_OK_DELETE_RETURNING,
                _ => SPI_OK_SELECT,
            });
        }

        if kind.is_write() {
            let changed = stmt.execute([])?;
            self.spi.processed.set(changed as u64);
            return Ok(match kind {
                StatementKind::Insert => SPI_OK_INSERT,
                StatementKind::Update => SPI_OK_UPDATE,
                _ => SPI_OK_DELETE,
            });
        }
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        Ok(SPI_OK_UTILITY)
    }
}

impl SpiBackend for Backend {
    fn spi_connect(&self) -> i32 {
        let depth = self.spi.depth.get() + 1;
        self.spi.depth.set(depth);
        self.stats.spi_connects.set(self.stats.spi_connects.get() + 1);
        tracing::debug!(depth, "SPI_connect");
        SPI_OK_CONNECT
    }

    fn spi_execute(&self, src: &str, read_only: bool, tcount: i64) -> i32 {
        if self.spi.depth.get() == 0 {
            tracing::warn!("SPI_execute called while unconnected");
            return SPI_ERROR_UNCONNECTED;
        }
        if tcount < 0 || src.trim().is_empty() {
            return SPI_ERROR_ARGUMENT;
        }
        self.spi.clear_results();
        self.stats.spi_executes.set(self.stats.spi_executes.get() + 1);
        match self.execute_statement(src, read_only, tcount) {
            Ok(code) => {
                tracing::debug!(code, processed = self.spi.processed.get(), read_only, "SPI_execute");
                code
            }
            Err(e) => host_abort(e),
        }
    }

    fn spi_finish(&self) -> i32 {
        let depth = self.spi.depth.get();
        if depth == 0 {
            return SPI_ERROR_UNCONNECTED;
        }
        self.spi.depth.set(depth - 1);
        self.spi.clear_results();
        self.stats.spi_finishes.set(self.stats.spi_finishes.get() + 1);
        tracing::debug!(depth = depth - 1, "SPI_finish");
        SPI_OK_FINISH
    }

    fn spi_processed(&self) -> u64 {
        self.spi.processed.get()
    }

    fn spi_tuptable(&self) -> Option<Rc<SpiTupleTable>> {
        self.spi.tuptable.borrow().clone()
    }
}
