//! Atomic file replacement

use std::io::Write;
use std::path::Path;

/// Atomically replace `path` with `contents`.
///
/// Creates missing parent directories, writes a uniquely named sibling temp
/// file, syncs it and renames it over the target. A failed write removes its
/// temp file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_with_mode(path, contents, None)
}

/// Like [`atomic_write`] but the file is created owner read/write only.
pub fn atomic_write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_with_mode(path, contents, Some(0o600))
}

/// Remove a file, treating "already gone" as success.
///
/// Returns `true` if a file was removed.
pub fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn write_with_mode(path: &Path, contents: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    // Unique per call: concurrent writers to one path never share a temp file.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = mode.unwrap_or(0o644);
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }

    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
