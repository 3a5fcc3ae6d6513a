//! Binary storage for cached catalog embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of `provider:model`)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u32 (little-endian)
//! - transaction_id: [u8; id_len] (UTF-8)
//! - fingerprint: [u8; 32] (SHA256 of the composite document)
//! - embedding: [f32; dimensions] (little-endian)

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::cache::CacheEntry;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Upper bound for a stored transaction id, guards against reading garbage lengths.
const MAX_ID_LEN: usize = 4096;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// Entries loaded from disk together with their vector width.
#[derive(Debug, Default)]
pub struct StoredVectors {
    pub dimensions: usize,
    pub entries: HashMap<String, CacheEntry>,
}

/// Storage manager for cached embeddings.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load every stored entry.
    ///
    /// Fails with `ModelMismatch` if the file was written for another model and
    /// with `InvalidFormat` if the entry section is cut short or garbled.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<StoredVectors, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        let dimensions = header.dimensions as usize;
        let mut entries = HashMap::with_capacity(header.entry_count as usize);

        for idx in 0..header.entry_count {
            let (id, entry) = read_entry(&mut reader, dimensions).map_err(|e| match e {
                VectorStorageError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    VectorStorageError::InvalidFormat(format!(
                        "file ends after {idx} of {} entries",
                        header.entry_count
                    ))
                }
                other => other,
            })?;
            entries.insert(id, entry);
        }

        Ok(StoredVectors {
            dimensions,
            entries,
        })
    }

    /// Save all entries.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(
        &self,
        entries: &HashMap<String, CacheEntry>,
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(dimensions).map_err(|_| {
            VectorStorageError::InvalidFormat(format!("{dimensions} dimensions do not fit the header"))
        })?;

        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, entries, dimensions, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

fn write_to_file(
    path: &Path,
    entries: &HashMap<String, CacheEntry>,
    dimensions: u16,
    model_id: &[u8; 32],
) -> Result<(), VectorStorageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(
        &mut writer,
        &Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: entries.len() as u64,
        },
    )?;

    for (id, entry) in entries {
        if entry.embedding.len() != dimensions as usize {
            return Err(VectorStorageError::InvalidFormat(format!(
                "entry {id} has {} dimensions, expected {dimensions}",
                entry.embedding.len()
            )));
        }
        write_entry(&mut writer, id, entry)?;
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes(take_array(&header_bytes[43..47]));
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    Ok(Header {
        version,
        model_id: take_array(&header_bytes[1..33]),
        dimensions: u16::from_le_bytes(take_array(&header_bytes[33..35])),
        entry_count: u64::from_le_bytes(take_array(&header_bytes[35..43])),
    })
}

fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_entry<R: Read>(
    reader: &mut R,
    dimensions: usize,
) -> Result<(String, CacheEntry), VectorStorageError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let id_len = u32::from_le_bytes(len_bytes) as usize;
    if id_len > MAX_ID_LEN {
        return Err(VectorStorageError::InvalidFormat(format!(
            "transaction id length {id_len} exceeds {MAX_ID_LEN}"
        )));
    }

    let mut id_bytes = vec![0u8; id_len];
    reader.read_exact(&mut id_bytes)?;
    let id = String::from_utf8(id_bytes)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("transaction id: {e}")))?;

    let mut fingerprint = [0u8; 32];
    reader.read_exact(&mut fingerprint)?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((
        id,
        CacheEntry {
            fingerprint,
            embedding,
        },
    ))
}

fn write_entry<W: Write>(
    writer: &mut W,
    id: &str,
    entry: &CacheEntry,
) -> Result<(), VectorStorageError> {
    writer.write_all(&(id.len() as u32).to_le_bytes())?;
    writer.write_all(id.as_bytes())?;
    writer.write_all(&entry.fingerprint)?;

    for &value in &entry.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

fn take_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}
