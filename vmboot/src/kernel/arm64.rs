//! ARM64 `Image` header parsing and compressed-image probing.
//!
//! Header layout follows Documentation/arch/arm64/booting.rst: 64 bytes,
//! little-endian, magic "ARM\x64" at offset 56.

use std::io::Read;

use flate2::read::GzDecoder;

use super::{GZIP_MAGIC, ReadAt, SectionReader, read_full_at, reserve_image};
use crate::errors::{BootError, BootResult};

pub const IMAGE_HEADER_SIZE: usize = 64;

/// The kernel is placed `text_offset` bytes above a 2 MiB aligned base.
pub const IMAGE_LOAD_ALIGNMENT: u64 = 2 * 1024 * 1024;

/// "ARM\x64" read as a little-endian u32.
pub const ARM64_IMAGE_MAGIC: u32 = 0x644d_5241;

/// How far into the file to look for a gzip stream behind a decompressor stub.
const MAX_GZIP_SCAN_BYTES: u64 = 1 << 20;

/// The 64-byte header at the start of every decompressed ARM64 Image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelHeader {
    pub code0: u32,
    pub code1: u32,
    pub text_offset: u64,
    pub image_size: u64,
    pub flags: u64,
    pub res2: u64,
    pub res3: u64,
    pub res4: u64,
    pub magic: u32,
    pub res5: u32,
}

impl KernelHeader {
    pub fn parse(bytes: &[u8]) -> BootResult<Self> {
        let header = bytes.get(..IMAGE_HEADER_SIZE).ok_or_else(|| {
            BootError::InvalidImage(format!(
                "arm64 kernel header truncated: got {} bytes",
                bytes.len()
            ))
        })?;

        let h = Self {
            code0: le_u32(header, 0),
            code1: le_u32(header, 4),
            text_offset: le_u64(header, 8),
            image_size: le_u64(header, 16),
            flags: le_u64(header, 24),
            res2: le_u64(header, 32),
            res3: le_u64(header, 40),
            res4: le_u64(header, 48),
            magic: le_u32(header, 56),
            res5: le_u32(header, 60),
        };
        if h.magic != ARM64_IMAGE_MAGIC {
            return Err(BootError::InvalidImage(format!(
                "invalid arm64 kernel magic {:#x}",
                h.magic
            )));
        }
        Ok(h)
    }

    /// Address the CPU jumps to for a kernel placed at `base`.
    pub fn entry_point(&self, base: u64) -> BootResult<u64> {
        if base & (IMAGE_LOAD_ALIGNMENT - 1) != 0 {
            return Err(BootError::InvalidImage(format!(
                "arm64 kernel base must be 2 MiB aligned (got {:#x})",
                base
            )));
        }
        base.checked_add(self.text_offset).ok_or_else(|| {
            BootError::InvalidImage(format!(
                "arm64 entry point overflows: base {:#x} + text offset {:#x}",
                base, self.text_offset
            ))
        })
    }
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Metadata read from a kernel file without materializing the whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub header: KernelHeader,
    pub needs_decompression: bool,
    /// Offset of the gzip stream when `needs_decompression` is set.
    pub compressed_offset: u64,
}

impl ImageProbe {
    /// Inspect a kernel file: a raw Image, a bare gzip stream, or a gzip
    /// stream preceded by a self-decompression stub.
    pub fn probe<R: ReadAt + ?Sized>(reader: &R, size: u64) -> BootResult<Self> {
        check_size(size)?;

        let raw_err = match read_header_at(reader, 0) {
            Ok(header) => {
                return Ok(Self {
                    header,
                    needs_decompression: false,
                    compressed_offset: 0,
                });
            }
            Err(e) => e,
        };

        let offset = match find_gzip_payload(reader, size) {
            Ok(offset) => offset,
            Err(scan_err) => {
                tracing::debug!(error = %scan_err, "No gzip payload found in arm64 kernel");
                return Err(BootError::InvalidImage(format!(
                    "arm64 kernel header not found: {}",
                    raw_err
                )));
            }
        };

        let header = read_gzip_header(reader, offset, size)?;
        tracing::debug!(
            offset,
            text_offset = header.text_offset,
            "Found gzip-compressed arm64 kernel"
        );

        Ok(Self {
            header,
            needs_decompression: true,
            compressed_offset: offset,
        })
    }

    /// Return the full Image payload, decompressing when required.
    ///
    /// Raw images come back byte-for-byte.
    pub fn extract_image<R: ReadAt + ?Sized>(
        &self,
        reader: &R,
        size: u64,
    ) -> BootResult<Vec<u8>> {
        check_size(size)?;

        if !self.needs_decompression {
            let mut data = reserve_image(size)?;
            SectionReader::new(reader, 0, size)
                .read_to_end(&mut data)
                .map_err(|e| BootError::read("read raw arm64 image", e))?;
            return Ok(data);
        }

        if self.compressed_offset >= size {
            return Err(BootError::InvalidImage(format!(
                "arm64 compressed offset {} out of bounds (size {})",
                self.compressed_offset, size
            )));
        }

        let section = SectionReader::new(
            reader,
            self.compressed_offset,
            size - self.compressed_offset,
        );
        let mut data = Vec::new();
        GzDecoder::new(section)
            .read_to_end(&mut data)
            .map_err(|e| BootError::decompress("decompress arm64 image", e))?;
        Ok(data)
    }
}

fn check_size(size: u64) -> BootResult<()> {
    if size == 0 {
        return Err(BootError::InvalidSize(
            "arm64 kernel image size must be positive (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn read_header_at<R: ReadAt + ?Sized>(reader: &R, offset: u64) -> BootResult<KernelHeader> {
    let mut buf = [0u8; IMAGE_HEADER_SIZE];
    let n = read_full_at(reader, &mut buf, offset)
        .map_err(|e| BootError::read("read arm64 kernel header", e))?;
    KernelHeader::parse(&buf[..n])
}

fn find_gzip_payload<R: ReadAt + ?Sized>(reader: &R, size: u64) -> BootResult<u64> {
    if size < GZIP_MAGIC.len() as u64 {
        return Err(BootError::InvalidImage(
            "kernel image too small to contain gzip header".to_string(),
        ));
    }
    let scan = size.min(MAX_GZIP_SCAN_BYTES);

    // scan <= 1 MiB, so the cast is lossless.
    let mut buf = vec![0u8; scan as usize];
    let n = read_full_at(reader, &mut buf, 0)
        .map_err(|e| BootError::read("read kernel prefix", e))?;
    buf.truncate(n);

    buf.windows(GZIP_MAGIC.len())
        .position(|w| w == GZIP_MAGIC.as_slice())
        .map(|idx| idx as u64)
        .ok_or_else(|| {
            BootError::InvalidImage(format!(
                "gzip header not found within first {} bytes",
                scan
            ))
        })
}

fn read_gzip_header<R: ReadAt + ?Sized>(
    reader: &R,
    offset: u64,
    size: u64,
) -> BootResult<KernelHeader> {
    if offset >= size {
        return Err(BootError::InvalidImage(format!(
            "gzip offset {} outside kernel (size {})",
            offset, size
        )));
    }

    let section = SectionReader::new(reader, offset, size - offset);
    let mut buf = [0u8; IMAGE_HEADER_SIZE];
    GzDecoder::new(section)
        .read_exact(&mut buf)
        .map_err(|e| BootError::decompress("read gzip kernel header", e))?;
    KernelHeader::parse(&buf)
}
