//! Initramfs construction in cpio "newc" format.
//!
//! Provides:
//! - `InitFile` - an in-memory file destined for the guest's initial rootfs
//! - `build_initramfs` - serializes files into a newc archive with trailer
//! - `NewcReader` - walks an encoded archive record by record

mod newc;
mod reader;

pub use newc::{NEWC_HEADER_LEN, NEWC_MAGIC, NEWC_REGULAR_FILE_BIT, NEWC_TRAILER_NAME};
pub use reader::{NewcReader, NewcRecord};

use crate::errors::{BootError, BootResult};
use newc::{NewcEntry, newc_field, write_newc_entry};

/// Permission bits kept from `InitFile::mode`.
const PERMISSION_MASK: u32 = 0o777;

const DEFAULT_FILE_MODE: u32 = 0o644;

/// A file placed into the initramfs.
///
/// Only the permission bits of `mode` are encoded; every entry is written as
/// a regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFile {
    /// Guest path. One leading `/` is stripped.
    pub path: String,
    pub mode: u32,
    pub data: Vec<u8>,
    pub dev_major: u32,
    pub dev_minor: u32,
}

impl InitFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            mode: DEFAULT_FILE_MODE,
            data: data.into(),
            dev_major: 0,
            dev_minor: 0,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn device(mut self, major: u32, minor: u32) -> Self {
        self.dev_major = major;
        self.dev_minor = minor;
        self
    }

    /// Archive name: the path with one leading `/` removed.
    pub fn archive_name(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }
}

/// Serialize `files` into a newc archive terminated by `TRAILER!!!`.
///
/// Inodes are assigned 1..=N in input order, restarting on every call.
/// Fails without producing output if any file has an empty archive name or
/// a field that does not fit the 8-digit header encoding.
pub fn build_initramfs(files: &[InitFile]) -> BootResult<Vec<u8>> {
    let mut buf = Vec::new();

    for (idx, file) in files.iter().enumerate() {
        let name = file.archive_name();
        if name.is_empty() {
            return Err(BootError::Validation(format!(
                "initramfs file {} ({:?}) has empty name",
                idx, file.path
            )));
        }
        let ino =
            newc_field(idx + 1, "inode").map_err(|e| with_entry_context(e, idx, &file.path))?;
        let filesize = newc_field(file.data.len(), "file size")
            .map_err(|e| with_entry_context(e, idx, &file.path))?;

        let entry = NewcEntry {
            ino,
            mode: (file.mode & PERMISSION_MASK) | NEWC_REGULAR_FILE_BIT,
            nlink: 1,
            filesize,
            devmajor: file.dev_major,
            devminor: file.dev_minor,
            name,
            data: &file.data,
            ..Default::default()
        };
        write_newc_entry(&mut buf, &entry).map_err(|e| with_entry_context(e, idx, &file.path))?;

        tracing::trace!(ino, name, size = filesize, "Wrote initramfs entry");
    }

    write_newc_entry(&mut buf, &NewcEntry::trailer()).map_err(|e| match e {
        BootError::Internal(msg) => BootError::Internal(format!("write cpio trailer: {}", msg)),
        other => other,
    })?;

    tracing::debug!(
        files = files.len(),
        bytes = buf.len(),
        "Built initramfs archive"
    );

    Ok(buf)
}

fn with_entry_context(err: BootError, idx: usize, path: &str) -> BootError {
    match err {
        BootError::Validation(msg) => BootError::Validation(format!(
            "write initramfs file {} ({}): {}",
            idx, path, msg
        )),
        BootError::Internal(msg) => BootError::Internal(format!(
            "write initramfs file {} ({}): {}",
            idx, path, msg
        )),
        other => other,
    }
}
