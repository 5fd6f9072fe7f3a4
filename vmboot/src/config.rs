//! JSON manifest describing initramfs contents.
//!
//! ```json
//! { "files": [
//!     { "path": "/init", "source": "build/init", "mode": "0755" },
//!     { "path": "/etc/motd", "contents": "hello\n" },
//!     { "path": "/mem", "mode": "0600", "dev_major": 1, "dev_minor": 1 }
//! ] }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::errors::{BootError, BootResult};
use crate::initramfs::InitFile;

fn default_file_mode() -> u32 {
    0o644
}

/// Manifest root.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitramfsManifest {
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

/// One file entry. At most one of `source` and `contents` may be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestFile {
    pub path: String,
    /// Host file to copy. Relative paths resolve against the manifest directory.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Inline UTF-8 contents.
    #[serde(default)]
    pub contents: Option<String>,
    #[serde(default = "default_file_mode", deserialize_with = "deserialize_mode")]
    pub mode: u32,
    #[serde(default)]
    pub dev_major: u32,
    #[serde(default)]
    pub dev_minor: u32,
}

impl InitramfsManifest {
    pub fn from_json(json: &str) -> BootResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| BootError::Config(format!("Failed to parse initramfs manifest: {}", e)))
    }

    pub fn from_path(path: &Path) -> BootResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            BootError::Config(format!(
                "Failed to read initramfs manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Turn manifest entries into `InitFile`s, reading host sources.
    pub fn resolve(&self, base_dir: &Path) -> BootResult<Vec<InitFile>> {
        self.files
            .iter()
            .map(|entry| entry.resolve(base_dir))
            .collect()
    }
}

impl ManifestFile {
    fn resolve(&self, base_dir: &Path) -> BootResult<InitFile> {
        let data = match (&self.source, &self.contents) {
            (Some(_), Some(_)) => {
                return Err(BootError::Config(format!(
                    "Manifest entry {} sets both source and contents",
                    self.path
                )));
            }
            (Some(source), None) => {
                let host_path = base_dir.join(source);
                std::fs::read(&host_path).map_err(|e| {
                    BootError::Config(format!(
                        "Failed to read source {} for {}: {}",
                        host_path.display(),
                        self.path,
                        e
                    ))
                })?
            }
            (None, Some(contents)) => contents.clone().into_bytes(),
            (None, None) => Vec::new(),
        };

        tracing::debug!(
            path = %self.path,
            mode = %format!("{:o}", self.mode),
            size = data.len(),
            "Resolved manifest entry"
        );

        Ok(InitFile::new(self.path.clone(), data)
            .mode(self.mode)
            .device(self.dev_major, self.dev_minor))
    }
}

/// Accept a JSON number or an octal string ("0755", "0o755", "755").
fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModeRepr {
        Number(u32),
        Text(String),
    }

    match ModeRepr::deserialize(deserializer)? {
        ModeRepr::Number(mode) => Ok(mode),
        ModeRepr::Text(text) => parse_octal_mode(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_octal_mode(text: &str) -> Result<u32, String> {
    let digits = text.strip_prefix("0o").unwrap_or(text);
    u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {:?}: {}", text, e))
}
