///
/// Contract violation types.
///
/// Everything in `BridgeError` is a caller or host contract violation that
/// the current call cannot continue past. These are never returned as
/// values: `abort` logs them and unwinds, and the host reports the unwind
/// as a failing statement. Soft failures (detoast misses, unknown enum
/// labels, NULL arguments) are `Option::None` at the call site instead.
///

use thiserror::Error;

use crate::host::Oid;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("declared arity {declared} does not match tuple descriptor with {actual} attributes")]
    ArityMismatch { declared: usize, actual: usize },

    #[error("type \"{name}\" does not exist")]
    UnknownTypeName { name: String },

    #[error("failed to get tuple descriptor for type {type_id} (typmod {typmod})")]
    UnresolvedRowType { type_id: Oid, typmod: i32 },

    #[error("column {attnum} out of range for row with {natts} attributes")]
    ColumnOutOfRange { attnum: i32, natts: usize },

    #[error("{operation} failed with result code {code}")]
    UnexpectedResultCode { operation: &'static str, code: i32 },

    #[error("query returned no tuple descriptor")]
    MissingResultDescriptor,

    #[error("invalid UTF-8 in text datum: {0}")]
    MalformedText(#[from] std::string::FromUtf8Error),
}

/// Aborts the current call with a contract violation.
///
/// The panic message is the error's display text, which is what the host
/// surfaces as the statement's error message.
#[track_caller]
pub fn abort(err: BridgeError) -> ! {
    tracing::error!(error = %err, "aborting call");
    panic!("{}", err)
}
