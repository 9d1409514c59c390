use crate::compiler::compiler_errors::{CompileError, ErrorLocation};
use crate::settings::LOCKFILE_NAME;
use crate::{return_config_error, return_file_error};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Parsed workspace lockfile.
///
/// The lockfile is a fixed line-oriented format, one directive per line:
/// `lock_version = N` (N must be 0 or 1) and `dep <name> <path>` (requires
/// version 1). Blank lines and `#` comments are ignored. Dependency paths
/// are resolved relative to the workspace root and must exist.
#[derive(Debug, Default)]
pub struct Lockfile {
    pub version: u32,
    deps: FxHashMap<String, PathBuf>,
}

impl Lockfile {
    pub fn empty() -> Self {
        Lockfile::default()
    }

    /// The resolved absolute root directory of a dependency, if declared.
    pub fn dep_root(&self, name: &str) -> Option<&PathBuf> {
        self.deps.get(name)
    }

    pub fn has_deps(&self) -> bool {
        !self.deps.is_empty()
    }
}

/// Parses `<root>/aster.lock`. A missing lockfile is legal (version-0
/// semantics, no deps); a present but malformed one is fatal.
pub fn parse_lockfile(root: &Path) -> Result<Lockfile, CompileError> {
    let path = root.join(LOCKFILE_NAME);
    if !path.exists() {
        return Ok(Lockfile::empty());
    }

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => return_file_error!(&path, format!("Could not read lockfile: {e}")),
    };

    let mut lockfile = Lockfile::empty();

    for (line_index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let location = || directive_location(&path, line_index, line);

        if let Some(rest) = line.strip_prefix("lock_version") {
            let Some(value) = rest.trim().strip_prefix('=') else {
                return_config_error!("Expected `lock_version = <N>`", location());
            };
            match value.trim().parse::<u32>() {
                Ok(version @ (0 | 1)) => lockfile.version = version,
                Ok(version) => {
                    return_config_error!(
                        format!("Unsupported lock_version {version} (expected 0 or 1)"),
                        location()
                    );
                }
                Err(_) => {
                    return_config_error!("lock_version must be an integer", location());
                }
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("dep ") {
            if lockfile.version < 1 {
                return_config_error!(
                    "`dep` directives require `lock_version = 1`",
                    location()
                );
            }
            let mut parts = rest.trim().splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("");
            let dep_path = parts.next().map(str::trim).unwrap_or("");
            if name.is_empty() || dep_path.is_empty() {
                return_config_error!("Expected `dep <name> <path>`", location());
            }
            let resolved = root.join(dep_path);
            let canonical = match fs::canonicalize(&resolved) {
                Ok(canonical) => canonical,
                Err(e) => {
                    return_config_error!(
                        format!("Could not resolve dep `{name}` at {}: {e}", resolved.display()),
                        location()
                    );
                }
            };
            lockfile.deps.insert(name.to_string(), canonical);
            continue;
        }

        return_config_error!(format!("Unknown lockfile directive: `{line}`"), location());
    }

    Ok(lockfile)
}

fn directive_location(path: &Path, line_index: usize, line: &str) -> ErrorLocation {
    ErrorLocation::new(
        path.to_path_buf(),
        line_index + 1,
        1,
        line.chars().take(40).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_lockfile(dir: &Path, contents: &str) {
        fs::write(dir.join(LOCKFILE_NAME), contents).unwrap();
    }

    #[test]
    fn missing_lockfile_is_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = parse_lockfile(dir.path()).unwrap();
        assert_eq!(lockfile.version, 0);
        assert!(!lockfile.has_deps());
    }

    #[test]
    fn parses_version_and_deps() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("libraries/mathlib")).unwrap();
        write_lockfile(
            dir.path(),
            "# workspace lock\nlock_version = 1\ndep mathlib libraries/mathlib\n",
        );

        let lockfile = parse_lockfile(dir.path()).unwrap();
        assert_eq!(lockfile.version, 1);
        assert!(lockfile.dep_root("mathlib").is_some());
        assert!(lockfile.dep_root("other").is_none());
    }

    #[test]
    fn dep_without_version_one_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("libs/x")).unwrap();
        write_lockfile(dir.path(), "dep x libs/x\n");
        assert!(parse_lockfile(dir.path()).is_err());
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_lockfile(dir.path(), "lock_version = 1\nfrobnicate yes\n");
        assert!(parse_lockfile(dir.path()).is_err());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_lockfile(dir.path(), "lock_version = 7\n");
        assert!(parse_lockfile(dir.path()).is_err());
    }

    #[test]
    fn unresolved_dep_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_lockfile(dir.path(), "lock_version = 1\ndep ghost libraries/ghost\n");
        assert!(parse_lockfile(dir.path()).is_err());
    }
}
