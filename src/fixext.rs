//! Renames workbooks whose extension lies about their contents.
//!
//! Legacy `.xls` files are OLE2 compound documents and `.xlsx` files are ZIP archives. Files in the
//! wild are often mislabeled, and the service may convert an `.xls` into OOXML when it writes a
//! new revision, so both inputs and written-back outputs are checked.

use crate::{utils, Result};
use anyhow::{bail, Context};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::warn;

const OLE2_MAGIC: [u8; 4] = [0xd0, 0xcf, 0x11, 0xe0];
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcelFormat {
    /// Binary `.xls`.
    Ole2,
    /// ZIP-based `.xlsx`/`.xlsm`.
    Ooxml,
    Unknown,
}

impl ExcelFormat {
    fn name(self) -> &'static str {
        match self {
            ExcelFormat::Ole2 => "OLE2",
            ExcelFormat::Ooxml => "OOXML",
            ExcelFormat::Unknown => "unknown",
        }
    }
}

/// Sniffs the format from the first bytes of the file.
pub fn detect_format(path: &Path) -> Result<ExcelFormat> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    let mut header = Vec::with_capacity(4);
    file.by_ref()
        .take(4)
        .read_to_end(&mut header)
        .with_context(|| format!("Unable to read {}", path.display()))?;
    Ok(match header.as_slice() {
        h if h == OLE2_MAGIC.as_slice() => ExcelFormat::Ole2,
        h if h == ZIP_MAGIC.as_slice() => ExcelFormat::Ooxml,
        _ => ExcelFormat::Unknown,
    })
}

/// The path `path` should have given its contents, or `None` when it is fine as is.
fn corrected_path(path: &Path) -> Result<Option<(PathBuf, ExcelFormat)>> {
    let corrected_extension = match utils::extension(path).as_deref() {
        Some("xls") => "xlsx",
        Some("xlsx") => "xls",
        _ => return Ok(None),
    };
    let format = detect_format(path)?;
    let mismatched = match corrected_extension {
        "xlsx" => format == ExcelFormat::Ooxml,
        _ => format == ExcelFormat::Ole2,
    };
    if !mismatched {
        return Ok(None);
    }
    Ok(Some((path.with_extension(corrected_extension), format)))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        bail!(
            "cannot rename {} to {}: target already exists",
            utils::file_name(from),
            utils::file_name(to)
        );
    }
    std::fs::rename(from, to).with_context(|| format!("renaming {}", utils::file_name(from)))
}

/// Fixes the extension of an input workbook before it is sent anywhere. Returns the path to use
/// from now on.
///
/// # Errors
/// - When the file cannot be read.
/// - When the corrected name is already taken.
pub fn fix_excel_extension(path: &Path) -> Result<PathBuf> {
    let Some((corrected, format)) = corrected_path(path)? else {
        return Ok(path.to_path_buf());
    };
    rename(path, &corrected)?;
    warn!(
        "{} is {} format, renamed to {}",
        utils::file_name(path),
        format.name(),
        utils::file_name(&corrected)
    );
    Ok(corrected)
}

/// Fixes the extension of a workbook that was just written back from the service.
pub fn fix_writeback_extension(path: &Path) -> Result<PathBuf> {
    let Some((corrected, _)) = corrected_path(path)? else {
        return Ok(path.to_path_buf());
    };
    rename(path, &corrected)?;
    warn!("converted output saved as {}", utils::file_name(&corrected));
    Ok(corrected)
}
