//! Small filesystem helpers shared by the file-backed stores.

use std::path::{Path, PathBuf};

use ulid::Ulid;

/// Like [`replace_file`], creating missing parent directories first.
/// Only for machine-local files.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    replace_file(path, bytes).await
}

/// Write `bytes` to `path` by writing a sibling temp file and renaming it over.
///
/// Readers see either the old or the new content, never a torn file. The
/// temp name carries a ULID so two writers on a shared drive never collide.
/// The parent directory must already exist.
pub async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Ulid::new()))
}

/// Make an external key usable as a file name.
pub fn file_safe(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_safe_replaces_separators() {
        assert_eq!(file_safe("ORD-1_22"), "ORD-1_22");
        assert_eq!(file_safe("a/b\\c d"), "a_b_c_d");
    }

    #[tokio::test]
    async fn write_atomic_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "two");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn replace_file_never_creates_the_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("data.json");

        let err = replace_file(&path, b"one").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(!dir.path().join("absent").exists());
    }
}
