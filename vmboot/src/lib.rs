//! Direct kernel boot artifacts.
//!
//! Two independent pieces feed a VM launcher that boots Linux without a
//! firmware or bootloader chain:
//! - [`initramfs`] serializes in-memory files into a cpio "newc" archive
//! - [`kernel`] loads a kernel blob, transparently gunzipping it
//!
//! Both are synchronous, allocate fresh buffers per call, and keep no state
//! between calls.

pub mod config;
pub mod errors;
pub mod initramfs;
pub mod kernel;
pub mod util;

pub use config::{InitramfsManifest, ManifestFile};
pub use errors::{BootError, BootResult};
pub use initramfs::{InitFile, NewcReader, NewcRecord, build_initramfs};
pub use kernel::{KernelImage, ReadAt};
