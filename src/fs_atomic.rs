//! Write-temp-then-rename helpers for artifacts that readers may probe concurrently.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

/// A fully written temporary file waiting to be renamed onto its destination.
///
/// Dropping a staged file without committing removes the temporary copy.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl StagedFile {
    /// Destination the file will occupy once committed.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Rename the staged file onto its destination, replacing any previous file.
    pub fn commit(self) -> io::Result<PathBuf> {
        let dest = self.dest;
        self.temp.persist(&dest).map_err(|err| err.error)?;
        Ok(dest)
    }
}

/// Write `bytes` to a temporary sibling of `dest` without touching `dest` yet.
pub fn stage_bytes(dest: &Path, bytes: &[u8]) -> io::Result<StagedFile> {
    let mut temp = temp_sibling(dest)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    Ok(StagedFile {
        temp,
        dest: dest.to_path_buf(),
    })
}

/// Copy `src` into a temporary sibling of `dest` without touching `dest` yet.
pub fn stage_copy(src: &Path, dest: &Path) -> io::Result<StagedFile> {
    let mut temp = temp_sibling(dest)?;
    let mut input = File::open(src)?;
    io::copy(&mut input, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    Ok(StagedFile {
        temp,
        dest: dest.to_path_buf(),
    })
}

/// Atomically replace `dest` with `bytes`.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    stage_bytes(dest, bytes)?.commit().map(|_| ())
}

/// Atomically replace `dest` with the pretty-printed JSON form of `value`.
pub fn write_json_atomic<T: Serialize + ?Sized>(dest: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(dest, &bytes)
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove a directory tree, treating "already gone" as success.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn temp_sibling(dest: &Path) -> io::Result<NamedTempFile> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    tempfile::Builder::new()
        .prefix(".staging-")
        .suffix(".tmp")
        .tempfile_in(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn staged_file_is_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested/weights.json");
        let staged = stage_bytes(&dest, b"{}").unwrap();
        assert!(!dest.exists());
        assert_eq!(staged.dest(), dest.as_path());
        staged.commit().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"{}");
    }

    #[test]
    fn dropped_stage_leaves_no_residue() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weights.json");
        drop(stage_bytes(&dest, b"partial").unwrap());
        let leftover = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("classes.json");
        write_atomic(&dest, b"old").unwrap();
        write_json_atomic(&dest, &vec![1, 2, 3]).unwrap();
        let parsed: Vec<i32> = serde_json::from_slice(&fs::read(&dest).unwrap()).unwrap();
        assert_eq!(parsed, vec![1, 2, 3]);
    }

    #[test]
    fn removals_ignore_missing_paths() {
        let dir = tempdir().unwrap();
        remove_if_exists(&dir.path().join("nope")).unwrap();
        remove_dir_if_exists(&dir.path().join("nope")).unwrap();
    }
}
