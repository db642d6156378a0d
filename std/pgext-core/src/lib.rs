//!
//! pgext-core - Core Datum and Host Boundary Types
//!
//! This crate provides the fundamental types shared across all pgext crates:
//!
//! - `Datum`, a single 64-bit word holding either an inline scalar or a
//!   reference to out-of-line storage owned by the host
//! - `DatumRepr` for converting application values to and from a `Datum`
//! - `Varlena` and the heap tuple header layout shared with the host
//! - `TupleDescData` and `TupleDescGuard`, the reference counted row type
//!   metadata and its scoped release
//! - The host boundary traits (`Toast`, `Catalog`, `HeapAccess`,
//!   `SpiBackend`, `InternalState`) and their union `Host`
//!
//! A `Datum` never records its own type. The caller always knows it from the
//! originating column or argument, and calling the wrong accessor returns
//! meaningless (but memory-safe) bits.
//!
//! Everything here assumes one logical thread per call, as guaranteed by the
//! host's calling convention. No type in this crate is `Sync`.
//!

pub mod datum;
pub mod error;
pub mod fcinfo;
pub mod host;
pub mod htup;
pub mod repr;
pub mod text;
pub mod tupdesc;
pub mod varlena;

pub use datum::*;
pub use error::*;
pub use fcinfo::*;
pub use host::*;
pub use htup::*;
pub use repr::*;
pub use text::*;
pub use tupdesc::*;
pub use varlena::*;
