use pgext_core::{
    abort, BridgeError, SPI_OK_CONNECT, SPI_OK_DELETE, SPI_OK_FINISH, SPI_OK_INSERT,
    SPI_OK_SELECT, SPI_OK_UPDATE,
};

use crate::cursor::Cursor;
use crate::SpiHost;

/// An open SPI connection.
pub struct Spi<'h, H: SpiHost + ?Sized> {
    host: &'h H,
}

impl<'h, H: SpiHost + ?Sized> Spi<'h, H> {
    /// Connects to SPI. A refused connection aborts the call.
    pub fn connect(host: &'h H) -> Self {
        let code = host.spi_connect();
        if code != SPI_OK_CONNECT {
            abort(BridgeError::UnexpectedResultCode {
                operation: "SPI_connect",
                code,
            });
        }
        tracing::debug!("SPI connected");
        Self { host }
    }

    /// Runs a read statement and returns a cursor over its rows.
    pub fn query<const N: usize>(self, sql: &str) -> Cursor<'h, H, N> {
        self.query_with_limit(sql, 0)
    }

    /// Like `query`, returning at most `limit` rows (0: no limit).
    pub fn query_with_limit<const N: usize>(self, sql: &str, limit: i64) -> Cursor<'h, H, N> {
        tracing::debug!(sql, limit, "SPI query");
        let code = self.host.spi_execute(sql, true, limit);
        if code != SPI_OK_SELECT {
            abort(BridgeError::UnexpectedResultCode {
                operation: "SPI_execute",
                code,
            });
        }
        let Some(table) = self.host.spi_tuptable() else {
            abort(BridgeError::MissingResultDescriptor);
        };
        let natts = table.tupdesc.natts();
        if natts != N {
            abort(BridgeError::ArityMismatch {
                declared: N,
                actual: natts,
            });
        }
        let total = self.host.spi_processed().min(table.numvals());
        Cursor::new(self, table, total)
    }

    /// Runs a write statement and finishes the connection.
    ///
    /// True when the host reports an insert, update or delete.
    pub fn execute(self, sql: &str) -> bool {
        tracing::debug!(sql, "SPI execute");
        let code = self.host.spi_execute(sql, false, 0);
        let processed = self.host.spi_processed();
        self.finish();
        let ok = matches!(code, SPI_OK_INSERT | SPI_OK_UPDATE | SPI_OK_DELETE);
        tracing::debug!(code, processed, ok, "SPI execute done");
        ok
    }

    pub fn host(&self) -> &'h H {
        self.host
    }

    /// Closes the connection.
    pub fn finish(self) {
        let code = self.host.spi_finish();
        if code != SPI_OK_FINISH {
            abort(BridgeError::UnexpectedResultCode {
                operation: "SPI_finish",
                code,
            });
        }
        tracing::debug!("SPI finished");
    }
}

/// Connects and runs a read statement.
pub fn query<'h, H: SpiHost + ?Sized, const N: usize>(host: &'h H, sql: &str) -> Cursor<'h, H, N> {
    Spi::connect(host).query(sql)
}

/// Connects and runs a write statement.
pub fn execute<H: SpiHost + ?Sized>(host: &H, sql: &str) -> bool {
    Spi::connect(host).execute(sql)
}
