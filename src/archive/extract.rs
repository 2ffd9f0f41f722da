use std::fs;
use std::io;
use std::path::Path;

use crate::error::{AppError, Result};

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| AppError::io(format!("failed to set permissions on {path:?}: {e}"))),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

pub(super) fn create_dir(out_path: &Path) -> Result<()> {
    fs::create_dir_all(out_path)
        .map_err(|e| AppError::io(format!("failed to create directory {out_path:?}: {e}")))
}

/// Write one file entry, checking the byte count against the declared size.
pub(super) fn write_file<R: io::Read>(
    out_path: &Path,
    reader: &mut R,
    declared_size: u64,
    unix_mode: Option<u32>,
) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        create_dir(parent)?;
    }

    let mut outfile = fs::File::create(out_path)
        .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
    let written = io::copy(reader, &mut outfile)
        .map_err(|e| AppError::archive(format!("failed to extract {out_path:?}: {e}")))?;
    if written != declared_size {
        return Err(AppError::archive(format!(
            "entry size mismatch for {out_path:?}: expected {declared_size} bytes, wrote {written}"
        )));
    }
    apply_mode(out_path, unix_mode)
}
