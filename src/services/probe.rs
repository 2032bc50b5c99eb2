//! Executable lookup for the prerequisite check

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Locate an executable by name on `PATH`, or check an explicit path.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    find_in(name, std::env::var_os("PATH").as_deref())
}

fn find_in(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    std::env::split_paths(search_path?)
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// The subset of `tools` that cannot be found
pub fn missing_tools(tools: &[String]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| find_executable(tool).is_none())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn make_tool(dir: &Path, name: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_search_path() {
        let dir = TempDir::new().unwrap();
        make_tool(dir.path(), "pg_dump", 0o755);
        make_tool(dir.path(), "pigz", 0o644);

        let search = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(
            find_in("pg_dump", Some(search.as_os_str())),
            Some(dir.path().join("pg_dump"))
        );
        // Not executable
        assert_eq!(find_in("pigz", Some(search.as_os_str())), None);
        assert_eq!(find_in("scp", Some(search.as_os_str())), None);
        assert_eq!(find_in("pg_dump", None), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_path() {
        let dir = TempDir::new().unwrap();
        let tool = make_tool(dir.path(), "pg_dump", 0o755);
        let name = tool.to_string_lossy().into_owned();
        assert_eq!(find_executable(&name), Some(tool));
        assert!(missing_tools(&[name]).is_empty());
    }

    #[test]
    fn test_missing_tools() {
        let missing = missing_tools(&["/nonexistent/pg_dump".to_string()]);
        assert_eq!(missing, vec!["/nonexistent/pg_dump"]);
    }
}
