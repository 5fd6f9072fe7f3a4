//! Kernel image loading for direct boot.
//!
//! `KernelImage::load` reads a whole kernel blob and, when it starts with the
//! gzip magic, replaces it with the decompressed payload. Architecture
//! specific header parsing lives in submodules.

pub mod arm64;
mod source;

pub use source::ReadAt;
pub(crate) use source::{SectionReader, read_full_at};

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::errors::{BootError, BootResult};

/// Leading bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decoded kernel payload, ready to be placed in guest memory.
///
/// `Default` yields an empty image whose `len()` is 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelImage {
    payload: Vec<u8>,
}

impl KernelImage {
    /// Read `size` bytes from `source` and decompress them if gzip-encoded.
    ///
    /// A short read at end of stream truncates the image instead of failing.
    pub fn load<R: ReadAt + ?Sized>(source: &R, size: u64) -> BootResult<Self> {
        if size == 0 {
            return Err(BootError::InvalidSize(
                "kernel image size must be positive (got 0)".to_string(),
            ));
        }
        let mut payload = reserve_image(size)?;
        let n = SectionReader::new(source, 0, size)
            .read_to_end(&mut payload)
            .map_err(|e| BootError::read("read kernel", e))?;
        if (n as u64) < size {
            tracing::debug!(declared = size, read = n, "Kernel source ended early");
        }
        if payload.is_empty() {
            tracing::warn!("Kernel source returned no data");
        }

        if payload.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            MultiGzDecoder::new(payload.as_slice())
                .read_to_end(&mut decoded)
                .map_err(|e| BootError::decompress("decompress kernel", e))?;
            tracing::debug!(
                compressed = payload.len(),
                decompressed = decoded.len(),
                "Decompressed gzip kernel image"
            );
            payload = decoded;
        } else {
            tracing::debug!(bytes = payload.len(), "Loaded raw kernel image");
        }

        Ok(Self { payload })
    }

    /// Open `path` and load it, using the file length as the declared size.
    pub fn open(path: &Path) -> BootResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Self::load(&file, size)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse the ARM64 Image header at the start of the payload.
    pub fn arm64_header(&self) -> BootResult<arm64::KernelHeader> {
        arm64::KernelHeader::parse(&self.payload)
    }
}

/// Empty buffer with room for `size` bytes.
///
/// Capacity is only reserved; pages are committed as data is read, so a
/// declared size larger than the source costs nothing.
pub(crate) fn reserve_image(size: u64) -> BootResult<Vec<u8>> {
    let len = usize::try_from(size).map_err(|_| {
        BootError::InvalidSize(format!(
            "kernel image size {} exceeds addressable memory",
            size
        ))
    })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        BootError::InvalidSize(format!("kernel image size {} cannot be allocated: {}", size, e))
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{self, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    struct FailingSource;

    impl ReadAt for FailingSource {
        fn read_at(&self, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    /// Panics if touched; proves validation happens before any read.
    struct UntouchableSource;

    impl ReadAt for UntouchableSource {
        fn read_at(&self, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            panic!("read_at must not be called");
        }
    }

    #[test]
    fn test_raw_image_passthrough() {
        let raw: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
        let image = KernelImage::load(raw.as_slice(), raw.len() as u64).unwrap();
        assert_eq!(image.len(), raw.len());
        assert_eq!(image.payload(), raw.as_slice());
    }

    #[test]
    fn test_gzip_image_is_decompressed() {
        let raw = b"MZ fake kernel payload ".repeat(512);
        let compressed = gzip(&raw);
        assert!(compressed.starts_with(&GZIP_MAGIC));

        let image = KernelImage::load(&compressed, compressed.len() as u64).unwrap();
        assert_eq!(image.payload(), raw.as_slice());
        assert_eq!(image.into_payload(), raw);
    }

    #[test]
    fn test_concatenated_gzip_members() {
        let mut compressed = gzip(b"first ");
        compressed.extend(gzip(b"second"));

        let image = KernelImage::load(&compressed, compressed.len() as u64).unwrap();
        assert_eq!(image.payload(), b"first second");
    }

    #[test]
    fn test_zero_size_rejected_before_read() {
        let err = KernelImage::load(&UntouchableSource, 0).unwrap_err();
        assert!(matches!(err, BootError::InvalidSize(_)));
    }

    #[test]
    fn test_oversized_declared_size() {
        let err = KernelImage::load(&UntouchableSource, u64::MAX).unwrap_err();
        assert!(matches!(err, BootError::InvalidSize(_)));

        let err = KernelImage::load(&b"tiny kernel".to_vec(), u64::MAX).unwrap_err();
        assert!(matches!(err, BootError::InvalidSize(_)));
    }

    #[test]
    fn test_short_read_truncates() {
        let raw = b"short kernel".to_vec();
        let image = KernelImage::load(&raw, 1024).unwrap();
        assert_eq!(image.payload(), raw.as_slice());
    }

    #[test]
    fn test_declared_size_limits_read() {
        let raw = b"0123456789".to_vec();
        let image = KernelImage::load(&raw, 4).unwrap();
        assert_eq!(image.payload(), b"0123");
    }

    #[test]
    fn test_read_failure() {
        let err = KernelImage::load(&FailingSource, 16).unwrap_err();
        assert!(matches!(err, BootError::Read { .. }));
        assert!(err.to_string().starts_with("read kernel"));
    }

    #[test]
    fn test_corrupt_gzip() {
        let mut compressed = gzip(&[0x55u8; 2048]);
        let mid = compressed.len() / 2;
        compressed.truncate(mid);

        let err = KernelImage::load(&compressed, compressed.len() as u64).unwrap_err();
        assert!(matches!(err, BootError::Decompress { .. }));
        assert!(err.to_string().starts_with("decompress kernel"));
    }

    #[test]
    fn test_gzip_magic_without_stream() {
        let bogus = vec![0x1fu8, 0x8b, 0x00, 0x00];
        let err = KernelImage::load(&bogus, bogus.len() as u64).unwrap_err();
        assert!(matches!(err, BootError::Decompress { .. }));
    }

    #[test]
    fn test_single_magic_byte_is_raw() {
        let data = vec![0x1fu8];
        let image = KernelImage::load(&data, 1).unwrap();
        assert_eq!(image.payload(), &[0x1fu8]);
    }

    #[test]
    fn test_default_image_is_empty() {
        let image = KernelImage::default();
        assert_eq!(image.len(), 0);
        assert!(image.is_empty());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmlinuz");
        std::fs::write(&path, gzip(b"kernel from disk")).unwrap();

        let image = KernelImage::open(&path).unwrap();
        assert_eq!(image.payload(), b"kernel from disk");
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = KernelImage::open(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, BootError::Io(_)));
    }
}
