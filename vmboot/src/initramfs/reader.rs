//! Sequential reader for newc archives held in memory.

use super::newc::{NEWC_HEADER_LEN, NEWC_MAGIC, NEWC_TRAILER_NAME, align_to_4, field};
use crate::errors::{BootError, BootResult};

/// One decoded archive record borrowing from the source bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewcRecord<'a> {
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub devmajor: u32,
    pub devminor: u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    pub name: &'a str,
    pub data: &'a [u8],
}

impl NewcRecord<'_> {
    pub fn is_trailer(&self) -> bool {
        self.name == NEWC_TRAILER_NAME
    }
}

/// Iterates the records of a newc archive, trailer included.
///
/// Iteration ends after the trailer or after the first error.
pub struct NewcReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> NewcReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            done: false,
        }
    }

    fn read_record(&mut self) -> BootResult<NewcRecord<'a>> {
        let bytes = self.bytes;
        let start = self.pos;
        let header = bytes
            .get(start..start + NEWC_HEADER_LEN)
            .ok_or_else(|| {
                BootError::Archive(format!("truncated header at offset {}", start))
            })?;

        if &header[..NEWC_MAGIC.len()] != NEWC_MAGIC.as_bytes() {
            return Err(BootError::Archive(format!(
                "bad magic {:?} at offset {}",
                String::from_utf8_lossy(&header[..NEWC_MAGIC.len()]),
                start
            )));
        }

        let hex = |offset: usize| parse_hex_field(header, offset, start);
        let filesize = hex(field::FILESIZE)? as usize;
        let name_size = hex(field::NAMESIZE)? as usize;
        if name_size == 0 {
            return Err(BootError::Archive(format!(
                "zero name size at offset {}",
                start
            )));
        }

        let name_start = start + NEWC_HEADER_LEN;
        let raw_name = bytes
            .get(name_start..name_start + name_size)
            .ok_or_else(|| BootError::Archive(format!("truncated name at offset {}", name_start)))?;
        let (nul, name_bytes) = raw_name
            .split_last()
            .ok_or_else(|| BootError::Archive(format!("empty name at offset {}", name_start)))?;
        if *nul != 0 {
            return Err(BootError::Archive(format!(
                "name at offset {} is not NUL-terminated",
                name_start
            )));
        }
        let name = std::str::from_utf8(name_bytes).map_err(|e| {
            BootError::Archive(format!("name at offset {} is not UTF-8: {}", name_start, e))
        })?;

        let data_start = name_start + name_size + align_to_4(NEWC_HEADER_LEN + name_size);
        let data = bytes
            .get(data_start..data_start + filesize)
            .ok_or_else(|| {
                BootError::Archive(format!(
                    "truncated data for {:?}: want {} bytes at offset {}",
                    name, filesize, data_start
                ))
            })?;

        self.pos = data_start + filesize + align_to_4(filesize);

        Ok(NewcRecord {
            ino: hex(field::INO)?,
            mode: hex(field::MODE)?,
            uid: hex(field::UID)?,
            gid: hex(field::GID)?,
            nlink: hex(field::NLINK)?,
            mtime: hex(field::MTIME)?,
            devmajor: hex(field::DEVMAJOR)?,
            devminor: hex(field::DEVMINOR)?,
            rdevmajor: hex(field::RDEVMAJOR)?,
            rdevminor: hex(field::RDEVMINOR)?,
            name,
            data,
        })
    }
}

impl<'a> Iterator for NewcReader<'a> {
    type Item = BootResult<NewcRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let record = self.read_record();
        match &record {
            Ok(r) if !r.is_trailer() => {}
            _ => self.done = true,
        }
        Some(record)
    }
}

fn parse_hex_field(header: &[u8], offset: usize, record_start: usize) -> BootResult<u32> {
    let raw = &header[offset..offset + field::WIDTH];
    std::str::from_utf8(raw)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or_else(|| {
            BootError::Archive(format!(
                "invalid hex field {:?} at offset {}",
                String::from_utf8_lossy(raw),
                record_start + offset
            ))
        })
}
