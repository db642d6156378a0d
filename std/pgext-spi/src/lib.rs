///
/// pgext Server Programming Interface
///
/// Runs SQL inside the host through its SPI primitives.
///
/// Architecture:
/// - `Spi` is one SPI connection. It is opened by `Spi::connect` and
///   consumed by whichever statement runs on it.
/// - Read statements (`query`, `query_with_limit`) must come back as
///   `SPI_OK_SELECT` with a result descriptor of exactly `N` attributes.
///   The connection moves into the returned `Cursor`, which finishes it
///   once, on the first `next` past the last row.
/// - Write statements (`execute`) finish the connection right away and
///   report whether the host classified the statement as an insert, update
///   or delete. Affected row counts do not matter.
///
/// A cursor dropped before exhaustion leaves its connection open. The host
/// is expected to clean up at the end of the call.
///

pub mod cursor;
pub mod session;

pub use cursor::*;
pub use session::*;

use pgext_core::{HeapAccess, SpiBackend};

/// Everything a query session needs from the host.
pub trait SpiHost: SpiBackend + HeapAccess {}

impl<T> SpiHost for T where T: SpiBackend + HeapAccess + ?Sized {}

#[cfg(test)]
pub(crate) mod mock;
