//! SFTP data types

use serde::{Deserialize, Serialize};

use super::handle::RawEntry;
use super::location::Location;

/// Snapshot of one remote item, built fresh on every listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name (not full path)
    pub name: String,
    /// Full location
    pub location: Location,
    pub file_type: FileType,
    /// Icon name for UI
    pub icon: String,
    pub readable: bool,
    pub writable: bool,
    pub is_directory: bool,
    /// Name starts with `.`
    pub is_hidden: bool,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (Unix timestamp)
    pub modified: i64,
}

impl FileEntry {
    /// Build an entry for a raw listing item inside `parent`.
    /// Returns `None` when the item's name cannot be determined.
    pub fn from_raw(parent: &Location, raw: &RawEntry) -> Option<Self> {
        let name = raw.name.as_deref().filter(|n| !n.is_empty())?;
        if name == "." || name == ".." {
            return None;
        }

        let file_type = if raw.is_dir {
            FileType::Directory
        } else if raw.is_symlink {
            FileType::Symlink
        } else {
            FileType::File
        };

        // Owner bits; servers that omit permissions are assumed permissive
        let readable = raw.permissions.map_or(true, |p| p & 0o400 != 0);
        let writable = raw.permissions.map_or(true, |p| p & 0o200 != 0);

        Some(Self {
            name: name.to_string(),
            location: parent.join(name, raw.is_dir),
            file_type,
            icon: file_type.icon().to_string(),
            readable,
            writable,
            is_directory: raw.is_dir,
            is_hidden: name.starts_with('.'),
            size: raw.size.unwrap_or(0),
            modified: raw.modified.map(i64::from).unwrap_or(0),
        })
    }
}

/// File type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Unknown,
}

impl FileType {
    /// Get icon name for UI
    pub fn icon(&self) -> &'static str {
        match self {
            FileType::File => "file",
            FileType::Directory => "folder",
            FileType::Symlink => "link",
            FileType::Unknown => "file-question",
        }
    }
}

/// Result of loading one directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub entries: Vec<FileEntry>,
    /// Bytes available at the listed location, when the server reports it
    pub free_space: Option<u64>,
}

/// Directories first, then case-insensitive name
pub fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// Constants for SFTP operations
pub mod constants {
    /// Default chunk size for file transfers (256 KB)
    pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

    /// Upper bound on disambiguation attempts for one name
    pub const MAX_NAME_ATTEMPTS: u32 = 10_000;
}

/// Adaptive chunk size calculator for SFTP transfers.
///
/// Adjusts read/write buffer size based on measured throughput over
/// a 1-second sliding window:
///
/// | Throughput        | Chunk Size |
/// |-------------------|------------|
/// | < 256 KB/s        | 64 KB      |
/// | 256 KB – 1 MB/s   | 128 KB     |
/// | 1 – 10 MB/s       | 256 KB     |
/// | 10 – 50 MB/s      | 1 MB       |
/// | > 50 MB/s         | 2 MB       |
///
/// The buffer is always allocated at [`MAX_CHUNK`](Self::MAX_CHUNK) size; only
/// the slice passed to read/write varies.
pub struct AdaptiveChunkSizer {
    current: usize,
    window_bytes: u64,
    window_start: std::time::Instant,
}

impl AdaptiveChunkSizer {
    /// Smallest allowed chunk (64 KB)
    pub const MIN_CHUNK: usize = 64 * 1024;
    /// Largest allowed chunk (2 MB)
    pub const MAX_CHUNK: usize = 2 * 1024 * 1024;
    /// Measurement window (1 second)
    const ADAPT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

    /// Create a new sizer starting at `initial` bytes (clamped to the allowed range).
    pub fn new(initial: usize) -> Self {
        Self {
            current: initial.clamp(Self::MIN_CHUNK, Self::MAX_CHUNK),
            window_bytes: 0,
            window_start: std::time::Instant::now(),
        }
    }

    /// Current chunk size to use for the next read/write.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.current
    }

    /// Record `bytes` transferred; recalculates chunk size once per window.
    pub fn record(&mut self, bytes: usize) {
        self.window_bytes += bytes as u64;

        if self.window_start.elapsed() >= Self::ADAPT_INTERVAL {
            let elapsed = self.window_start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let throughput = self.window_bytes as f64 / elapsed;
                self.current = Self::throughput_to_chunk(throughput as u64);
            }
            self.window_bytes = 0;
            self.window_start = std::time::Instant::now();
        }
    }

    /// Deterministic mapping from bytes/sec → chunk size.
    #[inline]
    fn throughput_to_chunk(bytes_per_sec: u64) -> usize {
        match bytes_per_sec {
            0..=262_144 => Self::MIN_CHUNK,
            262_145..=1_048_576 => 128 * 1024,
            1_048_577..=10_485_760 => 256 * 1024,
            10_485_761..=52_428_800 => 1_048_576,
            _ => Self::MAX_CHUNK,
        }
    }
}

impl Default for AdaptiveChunkSizer {
    fn default() -> Self {
        Self::new(constants::DEFAULT_CHUNK_SIZE)
    }
}
