//! Path helpers

use std::path::{Path, PathBuf};

/// Resolve a user-supplied path: `~` and `~/...` expand to the home
/// directory, relative paths are joined onto the current directory.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    let home_relative = match path {
        "~" => dirs::home_dir(),
        _ => path
            .strip_prefix("~/")
            .and_then(|rest| dirs::home_dir().map(|home| home.join(rest))),
    };
    let expanded = home_relative.unwrap_or_else(|| PathBuf::from(path));

    if expanded.is_absolute() {
        return expanded;
    }
    absolutize(&expanded)
}

fn absolutize(path: &Path) -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) if path.as_os_str().is_empty() => cwd,
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/etc/streamgate.json"), PathBuf::from("/etc/streamgate.json"));
    }

    #[test]
    fn test_expand_path_relative() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(expand_path("streamgate.json"), cwd.join("streamgate.json"));
        assert_eq!(expand_path("../conf/a.json"), cwd.join("../conf/a.json"));
        assert_eq!(expand_path("  "), cwd);
    }

    #[test]
    fn test_expand_path_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~"), home);
            assert_eq!(
                expand_path("~/.streamgate/streamgate.json"),
                home.join(".streamgate/streamgate.json")
            );
        }
    }
}
