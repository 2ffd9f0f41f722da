use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Relative path of an archive entry. `None` for empty, absolute,
/// drive-prefixed or traversing names.
pub(crate) fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut lexical = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !lexical.pop() {
                    return Err(AppError::archive(format!(
                        "path {path:?} escapes the filesystem root"
                    )));
                }
            }
            Component::CurDir => {}
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                    return Err(AppError::archive(format!(
                        "cannot resolve {lexical:?}: no existing ancestor"
                    )));
                };
                missing.push(name);
                existing = parent;
            }
            Err(e) => {
                return Err(AppError::archive(format!("cannot resolve {existing:?}: {e}")));
            }
        }
    }
}

/// Resolve `path` against `base_dir` and fail unless it stays inside it.
pub(super) fn confine(base_dir: &Path, path: &Path) -> Result<PathBuf> {
    let base = base_dir
        .canonicalize()
        .map_err(|e| AppError::archive(format!("cannot resolve destination {base_dir:?}: {e}")))?;
    let resolved = canonicalize_existing_prefix(&base.join(path))?;
    if resolved.starts_with(&base) {
        Ok(resolved)
    } else {
        Err(AppError::archive(format!(
            "entry {path:?} resolves outside the destination"
        )))
    }
}

/// Relative link targets only.
pub(super) fn check_link_target(target: &Path) -> Result<()> {
    let text = target.to_string_lossy();
    if text.is_empty() {
        return Err(AppError::archive("symlink target is empty"));
    }
    if target.is_absolute()
        || has_drive_prefix(&text)
        || target
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(AppError::archive(format!(
            "symlink target {text:?} is not relative"
        )));
    }
    Ok(())
}

/// The single top-level directory shared by every entry, if there is one.
///
/// A lone top-level file does not count: something must be nested below
/// the shared component for it to be a wrapper directory.
pub(super) fn common_root<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut root: Option<String> = None;
    let mut nested = false;

    for name in names {
        let Some(relative) = safe_relative_path(name) else {
            continue;
        };
        let mut components = relative.components();
        let first = components.next()?.as_os_str().to_str()?.to_string();
        if components.next().is_some() {
            nested = true;
        }
        match &root {
            None => root = Some(first),
            Some(existing) if *existing == first => {}
            Some(_) => return None,
        }
    }

    root.filter(|_| nested)
}

/// Drop `root` from the front of `relative`. `None` for the root itself.
pub(super) fn hoist(relative: &Path, root: Option<&str>) -> Option<PathBuf> {
    let Some(root) = root else {
        return Some(relative.to_path_buf());
    };
    relative
        .strip_prefix(root)
        .ok()
        .filter(|rest| !rest.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_names_are_rejected() {
        assert_eq!(safe_relative_path("../etc/passwd"), None);
        assert_eq!(safe_relative_path("a/../../b"), None);
        assert_eq!(safe_relative_path("/abs/path"), None);
        assert_eq!(safe_relative_path("C:\\Windows\\x"), None);
        assert_eq!(safe_relative_path(""), None);
        assert_eq!(safe_relative_path("./"), None);
        assert_eq!(
            safe_relative_path("dist\\assets/app.js"),
            Some(PathBuf::from("dist/assets/app.js"))
        );
    }

    #[test]
    fn common_root_requires_a_single_wrapper_dir() {
        assert_eq!(
            common_root(["root/", "root/index.html", "root/assets/a.js"]),
            Some("root".to_string())
        );
        assert_eq!(common_root(["root/index.html", "other.txt"]), None);
        assert_eq!(common_root(["index.html"]), None);
        assert_eq!(common_root(std::iter::empty()), None);
    }

    #[test]
    fn hoist_strips_only_the_root() {
        let path = Path::new("root/assets/a.js");
        assert_eq!(hoist(path, Some("root")), Some(PathBuf::from("assets/a.js")));
        assert_eq!(hoist(Path::new("root"), Some("root")), None);
        assert_eq!(hoist(path, None), Some(path.to_path_buf()));
    }

    #[test]
    fn confine_rejects_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(confine(tmp.path(), Path::new("a/b.txt")).is_ok());
        assert!(confine(tmp.path(), Path::new("../outside.txt")).is_err());
    }

    #[test]
    fn link_targets_must_be_relative() {
        assert!(check_link_target(Path::new("lib/x.so")).is_ok());
        assert!(check_link_target(Path::new("/etc/passwd")).is_err());
        assert!(check_link_target(Path::new("")).is_err());
    }
}
