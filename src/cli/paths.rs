use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Find the nearest ancestor of `start` (inclusive) that holds a `.git` entry.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Resolve the directory edits and commands run against.
pub fn resolve_workspace_root(workspace_root: Option<String>) -> Result<PathBuf> {
    if let Some(path) = workspace_root {
        return PathBuf::from(&path)
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize provided workspace root: {}", path));
    }
    let current = std::env::current_dir().context("Failed to get current directory")?;
    Ok(find_git_root(&current).unwrap_or(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_git_root_walks_up() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        let nested = tmp.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_git_root(&nested), Some(tmp.path().to_path_buf()));
    }

    #[test]
    fn test_explicit_root_must_exist() {
        let tmp = TempDir::new().unwrap();
        let resolved = resolve_workspace_root(Some(tmp.path().display().to_string())).unwrap();
        assert_eq!(resolved, tmp.path().canonicalize().unwrap());

        let missing = tmp.path().join("missing").display().to_string();
        assert!(resolve_workspace_root(Some(missing)).is_err());
    }
}
