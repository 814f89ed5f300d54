//! File system helpers shared by the pipelines.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Makes sure the directory that will hold `file_path` exists.
pub fn validate_output_dir(file_path: impl AsRef<Path>) -> io::Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Sibling path used while a file is being rewritten, e.g. `items.csv` →
/// `.items.csv.tmp`.
pub fn staging_path(file_path: &Path) -> PathBuf {
    let name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file_path.with_file_name(format!(".{}.tmp", name))
}

/// Runs `write` against a staging file next to `file_path`, syncs it and
/// renames it over the target.
pub fn replace_file(
    file_path: &Path,
    write: impl FnOnce(&mut fs::File) -> io::Result<()>,
) -> io::Result<()> {
    let staging = staging_path(file_path);
    let result = (|| {
        let mut file = fs::File::create(&staging)?;
        write(&mut file)?;
        file.sync_all()?;
        fs::rename(&staging, file_path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/out.csv");
        validate_output_dir(&target).unwrap();
        assert!(target.parent().unwrap().is_dir());
        validate_output_dir("relative.csv").unwrap();
    }

    #[test]
    fn replace_file_swaps_contents_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();
        replace_file(&target, |f| f.write_all(b"new")).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn failed_write_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();
        let err = replace_file(&target, |_| Err(io::Error::other("boom")));
        assert!(err.is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert!(!staging_path(&target).exists());
    }
}
