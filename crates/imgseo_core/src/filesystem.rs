use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

pub fn display_path(path: &Path) -> String {
    normalize_separators(&path.to_string_lossy())
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
pub fn normalize_pathbuf(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Forward-slash relative reference from `from_dir` to `target`, as written into HTML.
pub fn relative_reference(from_dir: &Path, target: &Path) -> String {
    let from = normalize_pathbuf(from_dir);
    let target = normalize_pathbuf(target);
    let from_parts = from.components().collect::<Vec<_>>();
    let target_parts = target.components().collect::<Vec<_>>();
    let common = from_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(left, right)| left == right)
        .count();

    let mut segments = Vec::new();
    for _ in common..from_parts.len() {
        segments.push("..".to_string());
    }
    for part in &target_parts[common..] {
        segments.push(part.as_os_str().to_string_lossy().to_string());
    }
    segments.join("/")
}

/// Replace `path` with `content` through a sibling temporary file so readers
/// never observe a truncated file.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", display_path(path)))?;
    let mut staged = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage write in {}", display_path(parent)))?;
    staged
        .write_all(content)
        .with_context(|| format!("failed to write staged copy of {}", display_path(path)))?;
    staged
        .as_file()
        .sync_all()
        .with_context(|| format!("failed to flush staged copy of {}", display_path(path)))?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", display_path(path)))?;
    Ok(())
}

pub fn content_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", display_path(path)))?;
    let digest = Sha256::digest(&bytes);
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use super::{content_hash, normalize_pathbuf, relative_reference, write_atomic};

    #[test]
    fn normalize_pathbuf_folds_dot_segments() {
        assert_eq!(
            normalize_pathbuf(Path::new("/site/pages/../images/./a.png")),
            PathBuf::from("/site/images/a.png")
        );
    }

    #[test]
    fn relative_reference_from_site_root_and_nested_pages() {
        assert_eq!(
            relative_reference(Path::new("/site"), Path::new("/site/images/a-1.png")),
            "images/a-1.png"
        );
        assert_eq!(
            relative_reference(Path::new("/site/blog"), Path::new("/site/images/a-1.png")),
            "../images/a-1.png"
        );
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("page.html");
        fs::write(&path, "old content that is longer").expect("seed file");
        write_atomic(&path, b"new").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "new");
        let leftovers = fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn content_hash_matches_for_identical_bytes() {
        let temp = tempdir().expect("tempdir");
        let first = temp.path().join("a.png");
        let second = temp.path().join("b.png");
        let third = temp.path().join("c.png");
        fs::write(&first, b"pixels").expect("write");
        fs::write(&second, b"pixels").expect("write");
        fs::write(&third, b"other").expect("write");
        let hash = content_hash(&first).expect("hash");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash(&second).expect("hash"));
        assert_ne!(hash, content_hash(&third).expect("hash"));
    }
}
