use std::path::{Component, Path, PathBuf};

use crate::error::IngestError;

/// Turn an archive entry name into a relative path that stays under the
/// extraction root. Backslashes are treated as separators; `.` segments are
/// dropped; absolute names, drive prefixes and `..` are rejected.
pub fn sanitize_entry_name(name: &str) -> Result<PathBuf, IngestError> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(IngestError::validation(name, "absolute paths are not allowed"));
    }
    let mut out = PathBuf::new();
    for comp in Path::new(&normalized).components() {
        match comp {
            Component::Normal(seg) => out.push(seg),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(IngestError::validation(name, "parent traversal not allowed"))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(IngestError::validation(name, "absolute paths are not allowed"))
            }
        }
    }
    // Windows drive letters only parse as a prefix on Windows.
    if out.components().next().is_some_and(|c| c.as_os_str().to_string_lossy().ends_with(':')) {
        return Err(IngestError::validation(name, "drive prefixes are not allowed"));
    }
    if out.as_os_str().is_empty() {
        return Err(IngestError::validation(name, "empty entry name"));
    }
    Ok(out)
}

/// Ensure `rel` is safe relative to `root`: no absolute, no `..`, and no
/// symlink anywhere between `root` and the final component.
pub fn validate_path(root: &Path, rel: &Path) -> Result<PathBuf, IngestError> {
    let shown = rel.to_string_lossy();
    if rel.is_absolute() {
        return Err(IngestError::validation(shown, "absolute paths are not allowed"));
    }
    for comp in rel.components() {
        if !matches!(comp, Component::Normal(_) | Component::CurDir) {
            return Err(IngestError::validation(shown, "parent traversal not allowed"));
        }
    }
    let mut cur = root.to_path_buf();
    for comp in rel.components() {
        cur = cur.join(comp);
        if let Ok(m) = std::fs::symlink_metadata(&cur) {
            if m.file_type().is_symlink() {
                return Err(IngestError::validation(shown, "symlink in path (not following)"));
            }
        }
    }
    Ok(root.join(rel))
}

/// Instance names become directory and file names under the storage root and
/// a URL path segment, so they are restricted to one plain segment.
pub fn validate_instance_name(name: &str) -> Result<(), IngestError> {
    if name.is_empty() {
        return Err(IngestError::validation(name, "instance name is empty"));
    }
    if name.starts_with('.') {
        return Err(IngestError::validation(name, "instance name may not start with '.'"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(IngestError::validation(
            name,
            "instance name may only contain [A-Za-z0-9._-]",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_names() {
        assert_eq!(sanitize_entry_name("a/b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(sanitize_entry_name("./a//b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(sanitize_entry_name("dir\\f.bin").unwrap(), PathBuf::from("dir/f.bin"));
        assert!(sanitize_entry_name("../../etc/passwd").is_err());
        assert!(sanitize_entry_name("a/../../b").is_err());
        assert!(sanitize_entry_name("/etc/passwd").is_err());
        assert!(sanitize_entry_name("C:/Windows/x").is_err());
        assert!(sanitize_entry_name("./").is_err());
    }

    #[test]
    fn instance_names() {
        assert!(validate_instance_name("carpinCraftPiola").is_ok());
        assert!(validate_instance_name("pack-1.20_b").is_ok());
        assert!(validate_instance_name("").is_err());
        assert!(validate_instance_name(".staging").is_err());
        assert!(validate_instance_name("a/b").is_err());
        assert!(validate_instance_name("..").is_err());
    }
}
