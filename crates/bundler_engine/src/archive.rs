//! Single-container archive assembly.
//!
//! A zip writer cannot take concurrent writers, so every mutation goes
//! through one mutex owned by the assembler. Callers may ingest from any
//! number of threads.

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard};

use bundle_logging::{bundle_debug, bundle_info};
use bundler_core::{EntryNames, FetchResult};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Fast deflate; the sources are already-compressed images.
pub const DEFAULT_COMPRESSION_LEVEL: i64 = 1;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive is already sealed")]
    Sealed,
    #[error("archive was lost after a failed finalize")]
    Closed,
}

/// A finished, immutable archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    bytes: Vec<u8>,
    entry_names: Vec<String>,
    failed_count: usize,
}

impl Archive {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn entry_count(&self) -> usize {
        self.entry_names.len()
    }

    /// Entry names in write order.
    pub fn entry_names(&self) -> &[String] {
        &self.entry_names
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }
}

/// In-memory zip target that refuses to grow past `limit` bytes.
struct BoundedBuffer {
    inner: Cursor<Vec<u8>>,
    limit: Option<u64>,
}

impl Write for BoundedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.limit {
            let end = self.inner.position() + buf.len() as u64;
            if end > limit {
                return Err(io::Error::other(format!(
                    "archive size limit exceeded (max {limit}, needed {end})"
                )));
            }
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for BoundedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

struct OpenArchive {
    writer: ZipWriter<BoundedBuffer>,
    names: EntryNames,
    entry_names: Vec<String>,
    failed_count: usize,
}

struct AssemblerState {
    open: Option<OpenArchive>,
    sealed: Option<Archive>,
}

pub struct ArchiveAssembler {
    state: Mutex<AssemblerState>,
    options: SimpleFileOptions,
}

impl ArchiveAssembler {
    pub fn new(compression_level: i64) -> Self {
        Self::bounded(compression_level, None)
    }

    /// Like [`ArchiveAssembler::new`], but any write that would take the
    /// container past `max_bytes` fails with [`ArchiveError::Zip`] or
    /// [`ArchiveError::Io`].
    pub fn bounded(compression_level: i64, max_bytes: Option<u64>) -> Self {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level))
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);
        let open = OpenArchive {
            writer: ZipWriter::new(BoundedBuffer {
                inner: Cursor::new(Vec::new()),
                limit: max_bytes,
            }),
            names: EntryNames::new(),
            entry_names: Vec::new(),
            failed_count: 0,
        };
        Self {
            state: Mutex::new(AssemblerState {
                open: Some(open),
                sealed: None,
            }),
            options,
        }
    }

    /// Writes a successful result as one entry, or counts a failure.
    pub fn ingest(&self, result: &FetchResult) -> Result<(), ArchiveError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(open) = state.open.as_mut() else {
            return Err(if state.sealed.is_some() {
                ArchiveError::Sealed
            } else {
                ArchiveError::Closed
            });
        };
        match result {
            FetchResult::Success {
                job,
                bytes,
                content_name,
            } => {
                let name = open.names.claim(content_name, job.sequence_index());
                if name != *content_name {
                    bundle_debug!(
                        "Entry name {} already used; job {} stored as {}",
                        content_name,
                        job.sequence_index(),
                        name
                    );
                }
                open.writer.start_file(name.as_str(), self.options)?;
                open.writer.write_all(bytes)?;
                open.entry_names.push(name);
            }
            FetchResult::Failure { .. } => open.failed_count += 1,
        }
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        let state = self.lock();
        match (&state.open, &state.sealed) {
            (Some(open), _) => open.entry_names.len(),
            (None, Some(archive)) => archive.entry_count(),
            (None, None) => 0,
        }
    }

    /// Finalizes the container. Must only be called once no more results
    /// will be ingested. Later calls return the same archive.
    pub fn seal(&self) -> Result<Archive, ArchiveError> {
        let mut state = self.lock();
        if let Some(archive) = &state.sealed {
            return Ok(archive.clone());
        }
        let open = state.open.take().ok_or(ArchiveError::Closed)?;
        let buffer = open.writer.finish()?;
        let archive = Archive {
            bytes: buffer.inner.into_inner(),
            entry_names: open.entry_names,
            failed_count: open.failed_count,
        };
        bundle_info!(
            "Sealed archive: {} entries, {} failed, {} bytes",
            archive.entry_count(),
            archive.failed_count,
            archive.bytes.len()
        );
        state.sealed = Some(archive.clone());
        Ok(archive)
    }

    fn lock(&self) -> MutexGuard<'_, AssemblerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ArchiveAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}
