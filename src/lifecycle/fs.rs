//! Sandboxed file operations inside a module's working tree.
//!
//! Only relative paths survive sanitization: no `..` segments, no leading
//! separator, `.` and `""` both mean the tree root. The root itself cannot
//! be deleted and renames refuse to clobber an existing destination.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use pan_bagnat_common::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Reject absolute paths and any `..` segment; normalize `"."` to `""`.
pub fn sanitize_rel_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() || raw.starts_with('/') {
        return Err(Error::InvalidInput(format!("absolute path: {raw:?}")));
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidInput(format!(
                    "path escapes the module tree: {raw:?}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!("absolute path: {raw:?}")));
            }
        }
    }
    Ok(clean)
}

pub struct ModuleFiles {
    root: PathBuf,
}

impl ModuleFiles {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, rel: &str) -> Result<(PathBuf, PathBuf)> {
        let rel = sanitize_rel_path(rel)?;
        Ok((self.root.join(&rel), rel))
    }

    /// Recursive listing of the tree (or a subtree), `.git` excluded,
    /// sorted by path.
    pub fn tree(&self, rel: &str) -> Result<Vec<FileEntry>> {
        let (abs, _) = self.resolve(rel)?;
        if !abs.exists() {
            return Err(Error::NotFound(format!("path {rel:?}")));
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&abs)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != std::ffi::OsStr::new(".git"))
        {
            let entry = entry.map_err(|e| Error::Internal(format!("walk failed: {e}")))?;
            let rel_path = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            let meta = entry
                .metadata()
                .map_err(|e| Error::Internal(format!("stat failed: {e}")))?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: rel_path,
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    pub async fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let (abs, _) = self.resolve(rel)?;
        match tokio::fs::read(&abs).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {rel:?}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write(&self, rel: &str, contents: &[u8]) -> Result<()> {
        let (abs, rel_clean) = self.resolve(rel)?;
        if rel_clean.as_os_str().is_empty() {
            return Err(Error::InvalidInput("cannot write the tree root".into()));
        }
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, contents).await?;
        Ok(())
    }

    pub async fn mkdir(&self, rel: &str) -> Result<()> {
        let (abs, rel_clean) = self.resolve(rel)?;
        if rel_clean.as_os_str().is_empty() {
            return Err(Error::InvalidInput("directory name required".into()));
        }
        tokio::fs::create_dir_all(&abs).await?;
        Ok(())
    }

    /// Rename within the tree; fails with `Conflict` when the destination
    /// already exists.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (abs_from, rel_from) = self.resolve(from)?;
        let (abs_to, rel_to) = self.resolve(to)?;
        if rel_from.as_os_str().is_empty() || rel_to.as_os_str().is_empty() {
            return Err(Error::InvalidInput("cannot rename the tree root".into()));
        }
        if !abs_from.exists() {
            return Err(Error::NotFound(format!("path {from:?}")));
        }
        if abs_to.exists() {
            return Err(Error::Conflict(format!("destination exists: {to:?}")));
        }
        if let Some(parent) = abs_to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&abs_from, &abs_to).await?;
        Ok(())
    }

    /// Delete a file or directory. The tree root is refused.
    pub async fn delete(&self, rel: &str) -> Result<()> {
        let (abs, rel_clean) = self.resolve(rel)?;
        if rel_clean.as_os_str().is_empty() {
            return Err(Error::InvalidInput("cannot delete the module root".into()));
        }
        let meta = match tokio::fs::metadata(&abs).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("path {rel:?}")));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&abs).await?;
        } else {
            tokio::fs::remove_file(&abs).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_rejects_escapes() {
        assert!(sanitize_rel_path("../x").is_err());
        assert!(sanitize_rel_path("a/../../b").is_err());
        assert!(sanitize_rel_path("/etc/passwd").is_err());
        assert!(sanitize_rel_path("a/b/../c").is_err());
    }

    #[test]
    fn test_sanitize_dot_equals_empty() {
        assert_eq!(sanitize_rel_path(".").unwrap(), PathBuf::new());
        assert_eq!(sanitize_rel_path("").unwrap(), PathBuf::new());
        assert_eq!(sanitize_rel_path("./a/./b").unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn test_sanitize_plain_paths() {
        assert_eq!(
            sanitize_rel_path("src/main.rs").unwrap(),
            PathBuf::from("src/main.rs")
        );
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let files = ModuleFiles::new(dir.path().to_path_buf());

        files.write("docs/readme.md", b"hello").await.unwrap();
        assert_eq!(files.read("docs/readme.md").await.unwrap(), b"hello");

        files.delete("docs/readme.md").await.unwrap();
        assert!(matches!(
            files.read("docs/readme.md").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_root_cannot_be_deleted() {
        let dir = tempdir().unwrap();
        let files = ModuleFiles::new(dir.path().to_path_buf());
        assert!(matches!(files.delete(".").await, Err(Error::InvalidInput(_))));
        assert!(matches!(files.delete("").await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_rename_conflict() {
        let dir = tempdir().unwrap();
        let files = ModuleFiles::new(dir.path().to_path_buf());
        files.write("a.txt", b"a").await.unwrap();
        files.write("b.txt", b"b").await.unwrap();
        assert!(matches!(
            files.rename("a.txt", "b.txt").await,
            Err(Error::Conflict(_))
        ));
        files.rename("a.txt", "c.txt").await.unwrap();
        assert_eq!(files.read("c.txt").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_tree_lists_sorted_and_skips_git() {
        let dir = tempdir().unwrap();
        let files = ModuleFiles::new(dir.path().to_path_buf());
        files.write("b.txt", b"b").await.unwrap();
        files.write("a/x.txt", b"x").await.unwrap();
        files.mkdir(".git").await.unwrap();
        files.write(".git/config", b"hidden").await.unwrap();

        let entries = files.tree("").unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/x.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_escape_attempt_is_rejected_by_ops() {
        let dir = tempdir().unwrap();
        let files = ModuleFiles::new(dir.path().to_path_buf());
        assert!(files.write("../evil.txt", b"x").await.is_err());
        assert!(files.read("/etc/passwd").await.is_err());
    }
}
