//! Lexical path helpers.
//!
//! Resolution works on absolute, lexically normalized paths so that the
//! same file reached through `a/../b` and `b` is one cache key and one
//! visited-set entry. Nothing here touches the file system except
//! [`modified_time`].

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Removes `.` components and folds `..` into its parent where possible.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    let _ = out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Joins `path` onto `base` unless it is already absolute, then normalizes.
#[must_use]
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Expresses `path` relative to `base`. Both should be absolute and
/// normalized; the result uses `..` to climb out of `base`.
#[must_use]
pub fn relative_to(base: &Path, path: &Path) -> PathBuf {
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let path_parts: Vec<Component<'_>> = path.components().collect();

    let common = base_parts
        .iter()
        .zip(path_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common == 0 && base.has_root() != path.has_root() {
        return path.to_path_buf();
    }

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in path_parts.iter().skip(common) {
        out.push(part.as_os_str());
    }
    out
}

/// Returns `true` when `path` lies outside `root`.
///
/// The test is done on the relative form (does it climb out with `..`?),
/// not by searching the absolute path for the root as a substring, so
/// `/repo/app-shared` is correctly outside `/repo/app`.
#[must_use]
pub fn is_external(root: &Path, path: &Path) -> bool {
    let relative = relative_to(&normalize(root), &normalize(path));
    matches!(relative.components().next(), Some(Component::ParentDir))
        || relative.is_absolute()
}

/// Renders a path with `/` separators regardless of platform.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}

/// Current modification time of `path`, or `None` if it cannot be read.
#[must_use]
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A file together with the modification time observed when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Modification time at observation, `None` if the file was unreadable.
    pub modified: Option<SystemTime>,
}

impl FileStamp {
    /// Observes `path` now.
    #[must_use]
    pub fn observe(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            modified: modified_time(path),
        }
    }

    /// Returns `true` if the file's modification time is unchanged.
    #[must_use]
    pub fn is_current(&self) -> bool {
        modified_time(&self.path) == self.modified
    }
}
