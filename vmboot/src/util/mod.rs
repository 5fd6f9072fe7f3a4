//! Host-side helpers for writing boot artifacts.

mod file;

pub use file::write_atomic;
