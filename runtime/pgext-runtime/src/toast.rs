///
/// TOAST: compressed and out-of-line varlena storage.
///
/// Storing a value (`Backend::toast_payload`) follows the host's order:
/// payloads above `compress_threshold` are deflated when that saves space,
/// and a result still above `external_threshold` moves to the toast table
/// in `chunk_size` pieces, leaving an 18-byte external pointer behind.
///
/// `detoast` undoes all of it and always yields a plain 4-byte-header
/// value. `detoast_packed` also lets short-header values through as is.
/// Storage that cannot be resolved is a soft failure (`None`), logged at
/// warn level.
///

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::CStr;
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use pgext_core::{CompressionMethod, Datum, Oid, Toast, ToastPointer, Varlena, VARHDRSZ, VARHDRSZ_COMPRESSED};

use crate::config::Compression;
use crate::error::{host_abort, HostError};
use crate::Backend;

/// Relation id recorded in external pointers.
pub const TOAST_REL_ID: Oid = 16_300;

const FIRST_VALUE_ID: Oid = 16_384;

pub(crate) struct ToastTable {
    next_value_id: Cell<Oid>,
    chunks: RefCell<HashMap<Oid, Vec<Vec<u8>>>>,
}

impl ToastTable {
    pub fn new() -> Self {
        Self {
            next_value_id: Cell::new(FIRST_VALUE_ID),
            chunks: RefCell::new(HashMap::new()),
        }
    }

    fn store(&self, data: &[u8], chunk_size: usize) -> Oid {
        let value_id = self.next_value_id.get();
        self.next_value_id.set(value_id + 1);
        let pieces: Vec<Vec<u8>> = data.chunks(chunk_size).map(|c| c.to_vec()).collect();
        tracing::trace!(value_id, chunks = pieces.len(), "stored toast value");
        self.chunks.borrow_mut().insert(value_id, pieces);
        value_id
    }

    fn fetch(&self, pointer: &ToastPointer) -> Result<Vec<u8>, HostError> {
        let chunks = self.chunks.borrow();
        let pieces = chunks.get(&pointer.value_id).ok_or(HostError::MissingToastChunk {
            value_id: pointer.value_id,
            chunk: 0,
        })?;
        let mut data = Vec::with_capacity(pointer.ext_size());
        for piece in pieces {
            data.extend_from_slice(piece);
        }
        if data.len() != pointer.ext_size() {
            return Err(HostError::MissingToastChunk {
                value_id: pointer.value_id,
                chunk: pieces.len(),
            });
        }
        Ok(data)
    }

    pub fn values(&self) -> usize {
        self.chunks.borrow().len()
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>, HostError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8], raw_len: usize) -> Result<Vec<u8>, HostError> {
    let mut out = Vec::with_capacity(raw_len);
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| HostError::CorruptCompressedData(e.to_string()))?;
    if out.len() != raw_len {
        return Err(HostError::CorruptCompressedData(format!(
            "expected {} bytes, got {}",
            raw_len,
            out.len()
        )));
    }
    Ok(out)
}

fn check_method(method: u32) -> Result<(), HostError> {
    match CompressionMethod::from_id(method) {
        Some(CompressionMethod::Deflate) => Ok(()),
        None => Err(HostError::UnsupportedCompression(method)),
    }
}

impl Backend {
    /// Encodes `payload` the way the host stores a column value.
    pub(crate) fn toast_payload(&self, payload: &[u8]) -> Varlena {
        let config = &self.config.toast;
        let mut compressed = None;
        if config.compression == Compression::Deflate && payload.len() > config.compress_threshold {
            match compress(payload) {
                Ok(bytes) if bytes.len() < payload.len() => compressed = Some(bytes),
                Ok(_) => {}
                Err(e) => host_abort(e),
            }
        }

        let inline_size = match &compressed {
            Some(bytes) => bytes.len() + VARHDRSZ_COMPRESSED,
            None => payload.len() + VARHDRSZ,
        };
        if inline_size > config.external_threshold {
            let stored = compressed.as_deref().unwrap_or(payload);
            let value_id = self.toast.store(stored, config.chunk_size);
            let method = if compressed.is_some() {
                (CompressionMethod::Deflate as u32) << 30
            } else {
                0
            };
            self.stats.toasted_external.set(self.stats.toasted_external.get() + 1);
            return Varlena::new_external(&ToastPointer {
                raw_size: (payload.len() + VARHDRSZ) as i32,
                ext_info: stored.len() as u32 | method,
                value_id,
                toast_rel_id: TOAST_REL_ID,
            });
        }

        match compressed {
            Some(bytes) => {
                self.stats.toasted_inline.set(self.stats.toasted_inline.get() + 1);
                Varlena::new_compressed(payload.len(), CompressionMethod::Deflate, &bytes)
            }
            None => Varlena::new_4b(payload),
        }
    }

    /// Stores `payload` as a column value would be stored and returns its
    /// datum, which may be compressed or external.
    pub fn toast_datum(&self, payload: &[u8]) -> Datum {
        let blob = self.toast_payload(payload);
        self.memory.alloc_varlena(blob)
    }

    pub(crate) fn detoast_blob(&self, blob: &Varlena) -> Result<Varlena, HostError> {
        if let Some(pointer) = blob.toast_pointer() {
            let data = self.toast.fetch(&pointer)?;
            let raw_len = (pointer.raw_size as usize).saturating_sub(VARHDRSZ);
            if pointer.is_compressed() {
                check_method(pointer.compression())?;
                return Ok(Varlena::new_4b(&decompress(&data, raw_len)?));
            }
            return Ok(Varlena::new_4b(&data));
        }
        if let Some((raw_len, method)) = blob.compressed_info() {
            check_method(method)?;
            return Ok(Varlena::new_4b(&decompress(blob.data_any(), raw_len)?));
        }
        Ok(blob.expand_short())
    }

    fn detoast_datum(&self, datum: Datum, packed: bool) -> Option<Varlena> {
        let Some(blob) = self.memory.varlena(datum) else {
            tracing::trace!(?datum, "datum references no varlena");
            return None;
        };
        if blob.is_plain() || (packed && blob.is_short()) {
            return Some(blob);
        }
        self.stats.detoasts.set(self.stats.detoasts.get() + 1);
        match self.detoast_blob(&blob) {
            Ok(plain) => Some(plain),
            Err(e) => {
                tracing::warn!(error = %e, "detoast failed");
                None
            }
        }
    }

    fn alloc_text(&self, bytes: &[u8]) -> Datum {
        self.stats.text_allocations.set(self.stats.text_allocations.get() + 1);
        self.memory.alloc_varlena(Varlena::new_4b(bytes))
    }
}

impl Toast for Backend {
    fn detoast(&self, datum: Datum) -> Option<Varlena> {
        self.detoast_datum(datum, false)
    }

    fn detoast_packed(&self, datum: Datum) -> Option<Varlena> {
        self.detoast_datum(datum, true)
    }

    fn cstring_to_text_with_len(&self, bytes: &[u8]) -> Datum {
        self.alloc_text(bytes)
    }

    fn cstring_to_text(&self, s: &CStr) -> Datum {
        self.alloc_text(s.to_bytes())
    }
}
