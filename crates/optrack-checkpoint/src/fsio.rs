use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CheckpointError;

/// Replace `path` with `data` so readers see either the old or the new
/// contents, never a partial write.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
        }
    }
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp).map_err(|e| CheckpointError::io(&tmp, e))?;
        file.write_all(data)
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.sync_all().map_err(|e| CheckpointError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path, e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
