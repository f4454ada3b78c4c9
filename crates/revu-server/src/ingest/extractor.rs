//! Archive extraction
//!
//! Reads an untrusted archive and writes its entries under a destination root,
//! handing each written entry to a caller-supplied sink as soon as it lands on
//! disk. Extraction is synchronous and is meant to run on a blocking thread.
//!
//! # Supported Formats
//!
//! Detected from magic bytes, never from the file name:
//!
//! - **Zip**: `PK\x03\x04` (or `PK\x05\x06` for an empty archive)
//! - **Tar.gz**: gzip magic `1f 8b`
//! - **Tar**: `ustar` at offset 257
//!
//! # Entry handling
//!
//! - Paths are normalized to `/`, `.` is dropped and `..` resolved lexically.
//!   Anything that would land outside the root is skipped with a warning.
//! - `__MACOSX/`, `.DS_Store` and AppleDouble `._*` entries are skipped.
//! - Symlinks, hard links and device entries are skipped.
//! - The first file entry for a path wins; later duplicates are skipped.
//! - Entry count and total written bytes are bounded by [`ExtractionLimits`].

use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::SessionStorage;

/// Size of the buffer used to stream entry bytes to disk.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Number of leading bytes inspected to detect the archive format.
const MAGIC_PROBE_LEN: u64 = 512;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive is corrupt: {0}")]
    Corrupt(String),

    #[error("Unsupported archive format")]
    UnsupportedFormat,

    #[error("Archive has more than {limit} entries")]
    TooManyEntries { limit: u64 },

    #[error("Archive expands to more than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Failed to read archive entry '{path}': {source}")]
    Entry {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Extraction stopped by the consumer")]
    Aborted,
}

/// An entry whose resolved path leaves the destination root
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Entry path '{path}' escapes the destination root")]
pub struct PathTraversalRejected {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// An entry that has been written under the destination root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    /// Normalized archive-relative path, no leading or trailing slash
    pub path: String,
    pub kind: EntryKind,
    /// Bytes written; 0 for directories
    pub size: u64,
    /// 1-based position of this entry among all archive entries
    pub position: u64,
    /// Total number of entries in the archive, skipped ones included
    pub total: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_entries: u64,
    pub max_total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: u64,
    pub directories: u64,
    pub skipped: u64,
    pub bytes_written: u64,
}

/// Normalize a raw archive entry name to a root-relative `/` path.
///
/// Returns `Ok(None)` when nothing is left after normalization (for example
/// `./`), and `Err` when the path is absolute, carries a drive prefix, or climbs
/// above the root.
pub fn resolve_entry_path(raw: &str) -> Result<Option<String>, PathTraversalRejected> {
    let rejected = || PathTraversalRejected {
        path: raw.to_string(),
    };

    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || unified.contains('\0') {
        return Err(rejected());
    }

    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(rejected());
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    return Err(rejected());
                }
            },
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        Ok(None)
    } else {
        Ok(Some(segments.join("/")))
    }
}

/// Whether a normalized path is OS metadata that should never be indexed
pub fn is_metadata_entry(path: &str) -> bool {
    if path.split('/').any(|segment| segment == "__MACOSX") {
        return true;
    }
    let name = revu_common::types::file_name(path);
    name == ".DS_Store" || name.starts_with("._")
}

/// Detect the archive format from its leading bytes
pub fn detect_format(header: &[u8]) -> Option<ArchiveFormat> {
    match header {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => Some(ArchiveFormat::Zip),
        [0x1F, 0x8B, ..] => Some(ArchiveFormat::TarGz),
        _ if header.len() >= 262 && &header[257..262] == b"ustar" => Some(ArchiveFormat::Tar),
        _ => None,
    }
}

/// Sniff the format of an archive on disk
pub fn probe_archive(path: &Path) -> Result<ArchiveFormat, ExtractionError> {
    let mut file = open(path)?;
    read_format(&mut file, path)
}

/// Extract `archive` under `dest`, calling `sink` once per written entry.
///
/// The sink may stop extraction early by returning an error, typically
/// [`ExtractionError::Aborted`] when the consumer has gone away.
pub fn extract_archive<F>(
    archive: &Path,
    dest: &Path,
    storage: &SessionStorage,
    limits: ExtractionLimits,
    sink: F,
) -> Result<ExtractionSummary, ExtractionError>
where
    F: FnMut(ExtractedEntry) -> Result<(), ExtractionError>,
{
    let mut file = open(archive)?;
    let format = read_format(&mut file, archive)?;
    debug!(archive = %archive.display(), ?format, "Detected archive format");

    let mut writer = EntryWriter {
        dest,
        storage,
        limits,
        sink,
        seen_files: HashSet::new(),
        summary: ExtractionSummary::default(),
        buffer: vec![0u8; COPY_BUFFER_SIZE],
    };

    match format {
        ArchiveFormat::Zip => extract_zip(file, &mut writer)?,
        ArchiveFormat::Tar => {
            let total = count_tar_entries(BufReader::new(open(archive)?), limits)?;
            extract_tar(BufReader::new(file), total, &mut writer)?;
        },
        ArchiveFormat::TarGz => {
            let total =
                count_tar_entries(GzDecoder::new(BufReader::new(open(archive)?)), limits)?;
            extract_tar(GzDecoder::new(BufReader::new(file)), total, &mut writer)?;
        },
    }

    info!(
        files = writer.summary.files,
        directories = writer.summary.directories,
        skipped = writer.summary.skipped,
        bytes = writer.summary.bytes_written,
        "Archive extracted"
    );

    Ok(writer.summary)
}

fn open(path: &Path) -> Result<File, ExtractionError> {
    File::open(path).map_err(|source| ExtractionError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn read_format(file: &mut File, path: &Path) -> Result<ArchiveFormat, ExtractionError> {
    let open_err = |source| ExtractionError::Open {
        path: path.to_path_buf(),
        source,
    };

    let mut header = Vec::with_capacity(MAGIC_PROBE_LEN as usize);
    Read::by_ref(file)
        .take(MAGIC_PROBE_LEN)
        .read_to_end(&mut header)
        .map_err(open_err)?;
    file.seek(SeekFrom::Start(0)).map_err(open_err)?;

    detect_format(&header).ok_or(ExtractionError::UnsupportedFormat)
}

fn corrupt(err: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Corrupt(err.to_string())
}

/// What an archive entry turned out to be before path checks
enum RawKind {
    File,
    Directory,
    Unsupported,
}

struct EntryWriter<'a, F> {
    dest: &'a Path,
    storage: &'a SessionStorage,
    limits: ExtractionLimits,
    sink: F,
    seen_files: HashSet<String>,
    summary: ExtractionSummary,
    buffer: Vec<u8>,
}

impl<F> EntryWriter<'_, F>
where
    F: FnMut(ExtractedEntry) -> Result<(), ExtractionError>,
{
    fn visit(
        &mut self,
        raw_path: &str,
        kind: RawKind,
        reader: &mut dyn Read,
        position: u64,
        total: u64,
    ) -> Result<(), ExtractionError> {
        let path = match resolve_entry_path(raw_path) {
            Ok(Some(path)) => path,
            Ok(None) => {
                self.summary.skipped += 1;
                return Ok(());
            },
            Err(rejected) => {
                warn!(entry = %rejected.path, "Skipping archive entry: {}", rejected);
                self.summary.skipped += 1;
                return Ok(());
            },
        };

        if is_metadata_entry(&path) {
            debug!(entry = %path, "Skipping metadata entry");
            self.summary.skipped += 1;
            return Ok(());
        }

        let target = self.dest.join(&path);
        let entry = match kind {
            RawKind::Unsupported => {
                debug!(entry = %path, "Skipping unsupported entry type");
                self.summary.skipped += 1;
                return Ok(());
            },
            RawKind::Directory => {
                self.storage
                    .create_dir_all(&target)
                    .map_err(|source| ExtractionError::Filesystem {
                        path: target.clone(),
                        source,
                    })?;
                self.summary.directories += 1;
                ExtractedEntry {
                    path,
                    kind: EntryKind::Directory,
                    size: 0,
                    position,
                    total,
                }
            },
            RawKind::File => {
                if !self.seen_files.insert(path.clone()) {
                    debug!(entry = %path, "Skipping duplicate entry");
                    self.summary.skipped += 1;
                    return Ok(());
                }
                let size = self.write_file(&path, &target, reader)?;
                self.summary.files += 1;
                ExtractedEntry {
                    path,
                    kind: EntryKind::File,
                    size,
                    position,
                    total,
                }
            },
        };

        (self.sink)(entry)
    }

    /// Stream an entry to disk, enforcing the total byte budget as bytes arrive
    /// rather than trusting the size declared in the archive.
    fn write_file(
        &mut self,
        path: &str,
        target: &Path,
        reader: &mut dyn Read,
    ) -> Result<u64, ExtractionError> {
        let fs_err = |source| ExtractionError::Filesystem {
            path: target.to_path_buf(),
            source,
        };

        let mut file = self.storage.create_file(target).map_err(fs_err)?;
        let mut written = 0u64;

        loop {
            let n = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ExtractionError::Entry {
                        path: path.to_string(),
                        source,
                    })
                },
            };

            self.summary.bytes_written += n as u64;
            if self.summary.bytes_written > self.limits.max_total_bytes {
                return Err(ExtractionError::TooLarge {
                    limit: self.limits.max_total_bytes,
                });
            }

            file.write_all(&self.buffer[..n]).map_err(fs_err)?;
            written += n as u64;
        }

        file.flush().map_err(fs_err)?;
        Ok(written)
    }
}

fn extract_zip<F>(file: File, writer: &mut EntryWriter<'_, F>) -> Result<(), ExtractionError>
where
    F: FnMut(ExtractedEntry) -> Result<(), ExtractionError>,
{
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(corrupt)?;
    let total = archive.len() as u64;
    if total > writer.limits.max_entries {
        return Err(ExtractionError::TooManyEntries {
            limit: writer.limits.max_entries,
        });
    }

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;
        let name = entry.name().to_string();
        let kind = if entry.is_dir() {
            RawKind::Directory
        } else if entry.unix_mode().is_some_and(is_special_mode) {
            RawKind::Unsupported
        } else {
            RawKind::File
        };

        writer.visit(&name, kind, &mut entry, i as u64 + 1, total)?;
    }

    Ok(())
}

/// Symlinks and other non-regular files carry a file-type in the high mode bits
fn is_special_mode(mode: u32) -> bool {
    const S_IFMT: u32 = 0o170000;
    const S_IFREG: u32 = 0o100000;
    const S_IFDIR: u32 = 0o040000;
    let file_type = mode & S_IFMT;
    file_type != 0 && file_type != S_IFREG && file_type != S_IFDIR
}

fn count_tar_entries<R: Read>(reader: R, limits: ExtractionLimits) -> Result<u64, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0u64;
    for entry in archive.entries().map_err(corrupt)? {
        entry.map_err(corrupt)?;
        count += 1;
        if count > limits.max_entries {
            return Err(ExtractionError::TooManyEntries {
                limit: limits.max_entries,
            });
        }
    }
    Ok(count)
}

fn extract_tar<R, F>(
    reader: R,
    total: u64,
    writer: &mut EntryWriter<'_, F>,
) -> Result<(), ExtractionError>
where
    R: Read,
    F: FnMut(ExtractedEntry) -> Result<(), ExtractionError>,
{
    let mut archive = tar::Archive::new(reader);
    let mut position = 0u64;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        position += 1;

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();
        let kind = if entry_type.is_dir() {
            RawKind::Directory
        } else if entry_type.is_file() {
            RawKind::File
        } else {
            RawKind::Unsupported
        };

        writer.visit(&name, kind, &mut entry, position, total)?;
    }

    Ok(())
}
