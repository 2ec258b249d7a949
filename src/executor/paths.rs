use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Why a path supplied by the assistant was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("path escapes the working directory: {0}")]
    Escapes(String),
}

/// Resolve `relative` against `root`, refusing anything that could leave it.
///
/// Absolute paths, drive prefixes and `..` components are rejected outright
/// rather than normalized. `.` components are dropped.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let trimmed = relative.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let mut resolved = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Escapes(trimmed.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(trimmed.to_string()))
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_paths() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_within(root, "src/main.rs").unwrap(),
            PathBuf::from("/work/src/main.rs")
        );
        assert_eq!(
            resolve_within(root, "./a/./b.txt").unwrap(),
            PathBuf::from("/work/a/b.txt")
        );
        // A lone "." is the root itself.
        assert_eq!(resolve_within(root, ".").unwrap(), PathBuf::from("/work"));
    }

    #[test]
    fn test_rejects_escapes() {
        let root = Path::new("/work");
        assert_eq!(resolve_within(root, "  "), Err(PathError::Empty));
        assert!(matches!(
            resolve_within(root, "/etc/passwd"),
            Err(PathError::Absolute(_))
        ));
        assert!(matches!(
            resolve_within(root, "../outside.txt"),
            Err(PathError::Escapes(_))
        ));
        assert!(matches!(
            resolve_within(root, "src/../../x"),
            Err(PathError::Escapes(_))
        ));
    }
}
