///
/// Host-side error types.
///
/// `HostError` covers failures inside the in-process host that the real
/// database would raise as an ERROR: SQL failures, read-only violations,
/// out-of-range conversions, corrupt storage. Raised from inside a call they
/// abort it, like `pgext_core::BridgeError`. `ConfigError` is returned from
/// config loading, and `CallError` is what `Backend::call` reports for an
/// aborted function.
///

use std::path::PathBuf;
use thiserror::Error;

use pgext_core::Oid;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("{keyword} is not allowed in a read-only statement")]
    ReadOnlyViolation { keyword: String },

    #[error("cannot run multiple statements in one SPI_execute call")]
    MultipleStatements,

    #[error("value \"{value}\" is out of range for type {type_name}")]
    ValueOutOfRange { value: String, type_name: String },

    #[error("invalid input syntax for type {type_name}: \"{value}\"")]
    InvalidInput { value: String, type_name: String },

    #[error("invalid input value for enum {type_name}: \"{label}\"")]
    UnknownEnumLabel { type_name: String, label: String },

    #[error("type \"{name}\" does not exist")]
    UnknownTypeName { name: String },

    #[error("type \"{name}\" already exists")]
    DuplicateType { name: String },

    #[error("type {type_id} cannot be returned from SPI")]
    UnsupportedResultType { type_id: Oid },

    #[error("tuple descriptor for type {type_id} released more often than it was referenced")]
    DoubleRelease { type_id: Oid },

    #[error("datum {handle:#x} does not reference memory in the current context")]
    DanglingDatum { handle: u64 },

    #[error("invalid attribute number {attnum} for row with {natts} attributes")]
    InvalidAttribute { attnum: i32, natts: usize },

    #[error("number of columns ({0}) exceeds limit")]
    TooManyColumns(usize),

    #[error("corrupt tuple: {0}")]
    CorruptTuple(String),

    #[error("missing chunk {chunk} for toast value {value_id}")]
    MissingToastChunk { value_id: Oid, chunk: usize },

    #[error("compressed data is corrupt: {0}")]
    CorruptCompressedData(String),

    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u32),

    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("function call aborted: {message}")]
    Aborted { message: String },
}

impl CallError {
    pub fn message(&self) -> &str {
        match self {
            CallError::Aborted { message } => message,
        }
    }
}

/// Raises a host error inside the current call.
#[track_caller]
pub(crate) fn host_abort(err: HostError) -> ! {
    tracing::error!(error = %err, "host error");
    panic!("{}", err)
}
