//!
//! pgext-runtime - In-process Host for pgext Extensions
//!
//! `Backend` implements every host boundary trait from `pgext-core`, so
//! extension code written against `pgext-tuple` and `pgext-spi` runs
//! unchanged inside an ordinary process:
//!
//! - `memory`: the memory context that by-reference datums point into
//! - `toast`: compression (deflate) and out-of-line storage of varlenas
//! - `catalog`: built-in, composite and enum types, the tuple descriptor
//!   cache with reference counting, blessed record types
//! - `heaptuple`: heap tuple forming, deforming and attribute access
//! - `spi`: statement execution against an embedded SQLite database
//! - `fmgr`: function invocation with abort capture
//!
//! A `Backend` is single threaded (`!Sync`): all state sits behind `Cell`
//! and `RefCell`, matching the one-call-at-a-time model of the host. Use
//! one backend per thread.
//!

pub mod catalog;
pub mod config;
pub mod error;
pub mod fmgr;
pub mod heaptuple;
pub mod logging;
pub mod memory;
pub mod spi;
pub mod toast;

use std::cell::Cell;

use pgext_core::Oid;

pub use catalog::{TypeInfo, TypeKind};
pub use config::{Compression, HostConfig, LogConfig, SpiConfig, ToastConfig};
pub use error::{CallError, ConfigError, HostError};
pub use pgext_core;
pub use pgext_spi;
pub use pgext_tuple;

use crate::catalog::TypeCatalog;
use crate::memory::MemoryContext;
use crate::spi::SpiState;
use crate::toast::ToastTable;

#[derive(Default)]
pub(crate) struct Stats {
    pub text_allocations: Cell<u64>,
    pub detoasts: Cell<u64>,
    pub toasted_inline: Cell<u64>,
    pub toasted_external: Cell<u64>,
    pub spi_connects: Cell<u64>,
    pub spi_finishes: Cell<u64>,
    pub spi_executes: Cell<u64>,
    pub leaked_connections: Cell<u64>,
}

/// Counters describing what a backend has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: u64,
    pub allocated_bytes: usize,
    pub live_chunks: usize,
    pub text_allocations: u64,
    pub detoasts: u64,
    pub toasted_inline: u64,
    pub toasted_external: u64,
    pub toast_values: usize,
    pub tupdesc_lookups: u64,
    pub tupdesc_releases: u64,
    pub spi_connects: u64,
    pub spi_finishes: u64,
    pub spi_executes: u64,
    pub leaked_connections: u64,
}

pub struct Backend {
    config: HostConfig,
    memory: MemoryContext,
    toast: ToastTable,
    catalog: TypeCatalog,
    spi: SpiState,
    stats: Stats,
}

impl Backend {
    /// Starts a backend and installs log output at `config.log.level`. The
    /// first backend in a process decides the log level.
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        logging::init(&config.log)?;
        let spi = SpiState::open(&config.spi.database, config.spi.is_in_memory())?;
        tracing::debug!(database = %config.spi.database, "backend started");
        Ok(Self {
            config,
            memory: MemoryContext::new(),
            toast: ToastTable::new(),
            catalog: TypeCatalog::new(),
            spi,
            stats: Stats::default(),
        })
    }

    /// A backend with the default configuration and an in-memory database.
    pub fn in_memory() -> Result<Self, HostError> {
        Self::new(HostConfig::default())
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            allocations: self.memory.allocations(),
            allocated_bytes: self.memory.allocated_bytes(),
            live_chunks: self.memory.live_chunks(),
            text_allocations: self.stats.text_allocations.get(),
            detoasts: self.stats.detoasts.get(),
            toasted_inline: self.stats.toasted_inline.get(),
            toasted_external: self.stats.toasted_external.get(),
            toast_values: self.toast.values(),
            tupdesc_lookups: self.catalog.lookups(),
            tupdesc_releases: self.catalog.releases(),
            spi_connects: self.stats.spi_connects.get(),
            spi_finishes: self.stats.spi_finishes.get(),
            spi_executes: self.stats.spi_executes.get(),
            leaked_connections: self.stats.leaked_connections.get(),
        }
    }

    /// Frees every by-reference datum. Datums handed out before the reset
    /// no longer resolve.
    pub fn reset_memory(&self) {
        self.memory.reset();
    }

    /// Runs SQL directly against the database, outside SPI. Meant for
    /// creating and seeding tables.
    pub fn execute_batch(&self, sql: &str) -> Result<(), HostError> {
        self.spi.connection().execute_batch(sql)?;
        Ok(())
    }

    /// Creates a composite type whose cached descriptor is reference
    /// counted. `columns` pairs column names with type names.
    pub fn create_composite_type(&self, name: &str, columns: &[(&str, &str)]) -> Result<Oid, HostError> {
        self.catalog.create_composite(name, columns, true)
    }

    /// Creates a composite type whose descriptor is never reference counted.
    pub fn create_static_composite_type(
        &self,
        name: &str,
        columns: &[(&str, &str)],
    ) -> Result<Oid, HostError> {
        self.catalog.create_composite(name, columns, false)
    }

    pub fn create_enum_type(&self, name: &str, labels: &[&str]) -> Result<Oid, HostError> {
        self.catalog.create_enum(name, labels)
    }

    /// OID of `label` in the enum type `type_name`.
    pub fn enum_value(&self, type_name: &str, label: &str) -> Option<Oid> {
        let type_id = self.catalog.type_oid(type_name)?;
        self.catalog.enum_value(type_id, label)
    }

    pub fn type_info(&self, oid: Oid) -> Option<TypeInfo> {
        self.catalog.type_info(oid)
    }

    /// Current reference count of a composite type's cached descriptor.
    pub fn tupdesc_refcount(&self, type_id: Oid) -> Option<i32> {
        self.catalog.refcount(type_id)
    }

    /// Number of open SPI connections.
    pub fn spi_depth(&self) -> u32 {
        self.spi.depth()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("database", &self.config.spi.database)
            .field("spi_depth", &self.spi.depth())
            .field("live_chunks", &self.memory.live_chunks())
            .finish()
    }
}
