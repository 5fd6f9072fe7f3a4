//! Atomic artifact output.

use std::io::Write;
use std::path::Path;

use crate::errors::{BootError, BootResult};

/// Write `bytes` to `path` via a temp file in the same directory.
///
/// Readers of `path` see either the previous contents or the complete new
/// artifact, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> BootResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| {
        BootError::Io(std::io::Error::new(
            e.error.kind(),
            format!("Failed to persist {}: {}", path.display(), e.error),
        ))
    })?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/boot/initramfs.cpio");

        write_atomic(&path, b"070701").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"070701");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Image");
        std::fs::write(&path, b"old contents that are longer").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");

        // No temp files left behind.
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
