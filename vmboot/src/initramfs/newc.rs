//! cpio "newc" wire format primitives.
//!
//! Every header is 110 ASCII bytes: the magic `070701` followed by thirteen
//! 8-digit lowercase hex fields. Name (with its NUL) and data are each padded
//! with zeros to a 4-byte boundary.

use crate::errors::{BootError, BootResult};

pub const NEWC_MAGIC: &str = "070701";
pub const NEWC_HEADER_LEN: usize = 110;
pub const NEWC_TRAILER_NAME: &str = "TRAILER!!!";

/// `S_IFREG` in newc mode encoding.
pub const NEWC_REGULAR_FILE_BIT: u32 = 0o100000;

/// Byte offsets of the hex fields within a header.
pub(crate) mod field {
    pub const INO: usize = 6;
    pub const MODE: usize = 14;
    pub const UID: usize = 22;
    pub const GID: usize = 30;
    pub const NLINK: usize = 38;
    pub const MTIME: usize = 46;
    pub const FILESIZE: usize = 54;
    pub const DEVMAJOR: usize = 62;
    pub const DEVMINOR: usize = 70;
    pub const RDEVMAJOR: usize = 78;
    pub const RDEVMINOR: usize = 86;
    pub const NAMESIZE: usize = 94;
    pub const WIDTH: usize = 8;
}

/// One archive record before serialization.
#[derive(Debug, Clone, Default)]
pub(crate) struct NewcEntry<'a> {
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub filesize: u32,
    pub devmajor: u32,
    pub devminor: u32,
    pub rdevmajor: u32,
    pub rdevminor: u32,
    pub name: &'a str,
    pub data: &'a [u8],
}

impl NewcEntry<'_> {
    /// The end-of-archive sentinel.
    pub(crate) fn trailer() -> Self {
        Self {
            ino: 0,
            mode: NEWC_REGULAR_FILE_BIT,
            nlink: 1,
            filesize: 0,
            name: NEWC_TRAILER_NAME,
            data: &[],
            ..Default::default()
        }
    }
}

/// Append `entry` to `buf`.
///
/// The caller guarantees `filesize == data.len()`. `namesize` is derived here
/// and must fit in 32 bits.
pub(crate) fn write_newc_entry(buf: &mut Vec<u8>, entry: &NewcEntry<'_>) -> BootResult<()> {
    let name_size = entry.name.len() + 1;
    let name_size_field = newc_field(name_size, "name size")?;

    let header = format!(
        "{}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
        NEWC_MAGIC,
        entry.ino,
        entry.mode,
        entry.uid,
        entry.gid,
        entry.nlink,
        entry.mtime,
        entry.filesize,
        entry.devmajor,
        entry.devminor,
        entry.rdevmajor,
        entry.rdevminor,
        name_size_field,
        0u32,
    );
    if header.len() != NEWC_HEADER_LEN {
        return Err(BootError::Internal(format!(
            "unexpected header length {}",
            header.len()
        )));
    }

    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(entry.name.as_bytes());
    buf.push(0);
    pad_to_4(buf, NEWC_HEADER_LEN + name_size);

    buf.extend_from_slice(entry.data);
    pad_to_4(buf, entry.data.len());

    Ok(())
}

/// Narrow `value` to a header field, rejecting anything over 32 bits.
pub(crate) fn newc_field(value: usize, what: &str) -> BootResult<u32> {
    u32::try_from(value).map_err(|_| {
        BootError::Validation(format!("{} {} exceeds 32-bit newc field", what, value))
    })
}

/// Number of zero bytes needed to round `len` up to a multiple of 4.
pub(crate) fn align_to_4(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn pad_to_4(buf: &mut Vec<u8>, len: usize) {
    buf.resize(buf.len() + align_to_4(len), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to_4() {
        assert_eq!(align_to_4(0), 0);
        assert_eq!(align_to_4(1), 3);
        assert_eq!(align_to_4(2), 2);
        assert_eq!(align_to_4(3), 1);
        assert_eq!(align_to_4(4), 0);
        assert_eq!(align_to_4(115), 1);
    }

    #[test]
    fn test_newc_field_limits() {
        assert_eq!(newc_field(0, "file size").unwrap(), 0);
        assert_eq!(newc_field(u32::MAX as usize, "file size").unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_newc_field_rejects_wide_values() {
        let too_big = u32::MAX as usize + 1;
        for what in ["file size", "name size", "inode"] {
            let err = newc_field(too_big, what).unwrap_err();
            assert!(matches!(err, BootError::Validation(_)));
            assert!(err
                .to_string()
                .contains(&format!("{} 4294967296 exceeds 32-bit newc field", what)));
        }
    }

    #[test]
    fn test_trailer_encoding() {
        let mut buf = Vec::new();
        write_newc_entry(&mut buf, &NewcEntry::trailer()).unwrap();

        let expected_header = concat!(
            "070701",
            "00000000", // ino
            "00008000", // mode
            "00000000", // uid
            "00000000", // gid
            "00000001", // nlink
            "00000000", // mtime
            "00000000", // filesize
            "00000000", // devmajor
            "00000000", // devminor
            "00000000", // rdevmajor
            "00000000", // rdevminor
            "0000000b", // namesize
            "00000000", // check
        );
        assert_eq!(&buf[..NEWC_HEADER_LEN], expected_header.as_bytes());
        assert_eq!(&buf[NEWC_HEADER_LEN..NEWC_HEADER_LEN + 11], b"TRAILER!!!\0");
        // 110 + 11 = 121, padded to 124; no data.
        assert_eq!(buf.len(), 124);
        assert!(buf[121..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fields_are_lowercase_hex() {
        let mut buf = Vec::new();
        let entry = NewcEntry {
            ino: 0xabcdef,
            mode: NEWC_REGULAR_FILE_BIT | 0o755,
            nlink: 1,
            name: "x",
            ..Default::default()
        };
        write_newc_entry(&mut buf, &entry).unwrap();

        let header = std::str::from_utf8(&buf[..NEWC_HEADER_LEN]).unwrap();
        assert_eq!(&header[field::INO..field::INO + field::WIDTH], "00abcdef");
        assert_eq!(&header[field::MODE..field::MODE + field::WIDTH], "000081ed");
        assert!(!header.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_data_padding_is_independent_of_name_padding() {
        let mut buf = Vec::new();
        let entry = NewcEntry {
            ino: 1,
            mode: NEWC_REGULAR_FILE_BIT | 0o644,
            nlink: 1,
            filesize: 5,
            name: "ab",
            data: b"hello",
            ..Default::default()
        };
        write_newc_entry(&mut buf, &entry).unwrap();

        // 110 + "ab\0" = 113 -> 116, then 5 data bytes -> 8.
        assert_eq!(buf.len(), 116 + 8);
        assert_eq!(&buf[116..121], b"hello");
        assert_eq!(&buf[121..], &[0, 0, 0]);
    }
}
