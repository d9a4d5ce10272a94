//! Zero-copy extraction of dex segments from a module container.
//!
//! Only STORED `classes*.dex` entries are mapped: a mapping needs the entry's
//! bytes to sit contiguously on disk. The container's signature is not
//! verified here; whether modules need verification is the caller's policy.

use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::FileExt;

use memmap2::{Mmap, MmapOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use zip::{CompressionMethod, ZipArchive};

use crate::error::{ModuleError, Result};
use crate::reader::PositionalReader;

static CLASSES_DEX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^classes\d*\.dex$").expect("static pattern"));

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_LEN: u64 = 30;

/// State of one module load, passed explicitly by the loading thread.
///
/// The descriptor is borrowed: its owner may keep using it (the native linker
/// can dup it at any time), and mapping never closes it.
#[derive(Debug)]
pub struct ModuleLoadState<'fd> {
    pub module_path: String,
    pub module_fd: BorrowedFd<'fd>,
}

impl<'fd> ModuleLoadState<'fd> {
    pub fn new(module_path: impl Into<String>, module_fd: BorrowedFd<'fd>) -> Self {
        Self {
            module_path: module_path.into(),
            module_fd,
        }
    }

    pub fn map_dex_segments(&self) -> Result<Vec<DexSegment>> {
        map_code_segments(self)
    }
}

/// Read-only mapping of one dex entry.
pub struct DexSegment {
    name: String,
    offset: u64,
    map: Mmap,
}

impl DexSegment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset of the entry's data within the container.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }
}

impl Deref for DexSegment {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map
    }
}

impl fmt::Debug for DexSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DexSegment")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("len", &self.len())
            .finish()
    }
}

pub fn is_code_segment_name(name: &str) -> bool {
    CLASSES_DEX_PATTERN.is_match(name)
}

/// Maps every stored dex entry of the container behind `state.module_fd`,
/// in central directory order.
pub fn map_code_segments(state: &ModuleLoadState<'_>) -> Result<Vec<DexSegment>> {
    // Our own descriptor; closing it leaves the borrowed one open.
    let channel = File::from(state.module_fd.try_clone_to_owned()?);
    let file_len = channel.metadata()?.len();
    let mut archive = ZipArchive::new(PositionalReader::new(&channel, file_len))?;

    let mut segments = Vec::with_capacity(1);
    for index in 0..archive.len() {
        let (name, method, size, compressed_size, header_start) = {
            let entry = archive.by_index_raw(index)?;
            (
                entry.name().to_string(),
                entry.compression(),
                entry.size(),
                entry.compressed_size(),
                entry.header_start(),
            )
        };

        if !is_code_segment_name(&name) {
            continue;
        }
        if method != CompressionMethod::Stored {
            debug!("Skipping {} in {}: not stored", name, state.module_path);
            continue;
        }
        if size != compressed_size {
            return Err(ModuleError::Malformed(format!(
                "stored entry {name} has mismatched sizes"
            )));
        }

        let offset = data_offset(&channel, header_start)?;
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= file_len)
            .ok_or_else(|| ModuleError::Malformed(format!("entry {name} exceeds container")))?;
        let len = usize::try_from(size)
            .map_err(|_| ModuleError::Malformed(format!("entry {name} is too large")))?;

        // SAFETY: the mapping is read-only and covers [offset, end) of a module
        // file the provider never rewrites in place.
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(&channel)? };
        debug!(
            "Mapped {} [{}, {}) from {}",
            name, offset, end, state.module_path
        );
        segments.push(DexSegment { name, offset, map });
    }

    Ok(segments)
}

/// Offset of an entry's data, read from its local file header.
fn data_offset(channel: &File, header_start: u64) -> Result<u64> {
    let mut header = [0u8; LOCAL_HEADER_LEN as usize];
    channel.read_exact_at(&mut header, header_start)?;

    let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if signature != LOCAL_HEADER_SIGNATURE {
        return Err(ModuleError::Malformed(format!(
            "bad local header signature at {header_start}"
        )));
    }
    let name_len = u64::from(u16::from_le_bytes([header[26], header[27]]));
    let extra_len = u64::from(u16::from_le_bytes([header[28], header[29]]));

    Ok(header_start + LOCAL_HEADER_LEN + name_len + extra_len)
}
