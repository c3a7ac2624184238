use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub fn write_artifact(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Moves `staged` into `dest_dir` (created if missing) under its own file
/// name and returns the new path. An existing file at the target is never
/// replaced.
///
/// A plain rename is tried first; when that fails (e.g. the work directory
/// sits on another filesystem) the file is copied into a temp file inside
/// `dest_dir`, persisted, and the source removed.
pub fn relocate_artifact(staged: &Path, dest_dir: &Path) -> Result<PathBuf> {
    relocate_with(staged, dest_dir, |from, to| fs::rename(from, to))
}

fn relocate_with<F>(staged: &Path, dest_dir: &Path, rename: F) -> Result<PathBuf>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    let file_name = staged
        .file_name()
        .ok_or_else(|| anyhow!("artifact path has no file name: {}", staged.display()))?;
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;
    let target = dest_dir.join(file_name);
    if target.exists() {
        bail!("refusing to overwrite existing {}", target.display());
    }

    let rename_err = match rename(staged, &target) {
        Ok(()) => return Ok(target),
        Err(err) => err,
    };
    if !staged.exists() {
        return Err(anyhow::Error::new(rename_err)
            .context(format!("failed to move {}", staged.display())));
    }

    copy_into_place(staged, dest_dir, &target).with_context(|| {
        format!(
            "failed to move {} to {} (rename: {rename_err})",
            staged.display(),
            target.display()
        )
    })?;
    fs::remove_file(staged)
        .with_context(|| format!("moved artifact but failed to remove {}", staged.display()))?;
    Ok(target)
}

fn copy_into_place(source: &Path, dest_dir: &Path, target: &Path) -> Result<()> {
    let mut input = File::open(source)?;
    let mut staged = NamedTempFile::new_in(dest_dir)?;
    io::copy(&mut input, &mut staged)?;
    staged.as_file().sync_all()?;
    staged.persist_noclobber(target).map_err(|err| err.error)?;
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
