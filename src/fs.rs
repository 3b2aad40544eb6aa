//! Synchronous filesystem helpers with contextual errors. Used where the caller cannot be async,
//! such as the content cache, which is read and written under a mutex.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

pub(crate) fn create_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)
        .with_context(|| format!("Unable to create directory {}", path.display()))
}

pub(crate) fn file(path: impl AsRef<Path>) -> Result<std::fs::File> {
    let path = path.as_ref();
    std::fs::File::create(path).context(format!("Unable to create file {}", path.display()))
}

/// Creates or truncates `path` and writes `data` to it.
pub(crate) fn write_all(path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    let mut f = file(path)?;
    f.write_all(data.as_ref())
        .context(format!("Unable to write data to {}", path.display()))
}

pub(crate) fn read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).context(format!("Unable to read file {}", path.display()))
}

pub(crate) fn remove_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::remove_file(path).context(format!("Unable to remove file {}", path.display()))
}

/// Proves that `dir` can be used for storage: creates it, writes a probe file and removes it.
pub(crate) fn probe_writable(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let probe = dir.join(".probe");
    write_all(&probe, b"ok")?;
    remove_file(&probe)
}
