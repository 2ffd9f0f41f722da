//! Applies a staged update over the installation root. Runs first thing at
//! launcher startup, before the web root is served.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{AppError, Result};
use crate::paths::{LauncherPaths, VERSION_FILE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    NothingStaged,
    /// Staging exists but carries no `version.json`; left untouched.
    Incomplete,
    Applied { entries: usize, version: Option<String> },
}

/// Version recorded in a `version.json`, if readable.
pub fn read_version(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    value
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Copy a file keeping its permissions and modification time. A timestamp
/// that cannot be set is logged, not fatal.
fn copy_preserving(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)?;
    let modified = fs::metadata(src)?.modified()?;
    let stamped = fs::File::options()
        .write(true)
        .open(dest)
        .and_then(|file| file.set_modified(modified));
    if let Err(e) = stamped {
        log::debug!("Could not preserve mtime of {}: {e}", dest.display());
    }
    Ok(())
}

fn copy_dir_replacing(src: &Path, dest: &Path) -> Result<()> {
    if dest.is_dir() {
        fs::remove_dir_all(dest)?;
    } else if dest.exists() {
        fs::remove_file(dest)?;
    }

    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::io(e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_preserving(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_file_replacing(src: &Path, dest: &Path) -> Result<()> {
    if dest.is_dir() {
        fs::remove_dir_all(dest)?;
    }
    copy_preserving(src, dest)
}

/// Copy the staging area over the root, `version.json` last, then delete it.
pub fn apply_staged_update(paths: &LauncherPaths) -> Result<BootstrapOutcome> {
    let staging = paths.staging_dir();
    if !staging.is_dir() {
        return Ok(BootstrapOutcome::NothingStaged);
    }
    let staged_version = staging.join(VERSION_FILE);
    if !staged_version.is_file() {
        log::warn!(
            "Staging area {} has no {VERSION_FILE}, leaving it untouched",
            staging.display()
        );
        return Ok(BootstrapOutcome::Incomplete);
    }

    let version = read_version(&staged_version);
    log::info!(
        "Applying staged update {}",
        version.as_deref().unwrap_or("(unknown version)")
    );

    let mut entries = 0;
    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == VERSION_FILE {
            continue;
        }
        let src = entry.path();
        let dest = paths.root().join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_replacing(&src, &dest)?;
        } else {
            copy_file_replacing(&src, &dest)?;
        }
        log::debug!("Updated {}", dest.display());
        entries += 1;
    }

    copy_preserving(&staged_version, &paths.version_file())?;
    fs::remove_dir_all(&staging)?;
    log::info!("Staged update applied ({entries} entries)");

    Ok(BootstrapOutcome::Applied { entries, version })
}

/// Mirror the installed `version.json` into the web root for the frontend.
pub fn publish_version_to_web(paths: &LauncherPaths, web_dir_name: &str) {
    let source = paths.version_file();
    let web_dir = paths.web_dir(web_dir_name);
    if !source.is_file() || !web_dir.is_dir() {
        return;
    }
    if let Err(e) = fs::copy(&source, web_dir.join(VERSION_FILE)) {
        log::warn!("Failed to copy {VERSION_FILE} into web root: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn stage(paths: &LauncherPaths, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = paths.staging_dir().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn nothing_staged_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        assert_eq!(
            apply_staged_update(&paths).unwrap(),
            BootstrapOutcome::NothingStaged
        );
    }

    #[test]
    fn staging_without_version_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        stage(&paths, &[("web/index.html", "new")]);

        assert_eq!(
            apply_staged_update(&paths).unwrap(),
            BootstrapOutcome::Incomplete
        );
        assert!(paths.staging_dir().join("web/index.html").exists());
        assert!(!tmp.path().join("web").exists());
    }

    #[test]
    fn staged_files_replace_installation() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        fs::create_dir_all(tmp.path().join("web/old")).unwrap();
        fs::write(tmp.path().join("web/old/stale.js"), "stale").unwrap();
        fs::write(tmp.path().join("web/index.html"), "old").unwrap();
        fs::write(tmp.path().join("launcher.py"), "old").unwrap();
        fs::write(paths.version_file(), r#"{"version":"1.2.9"}"#).unwrap();

        stage(
            &paths,
            &[
                ("web/index.html", "new"),
                ("web/assets/app.js", "js"),
                ("launcher.py", "new"),
                ("version.json", r#"{"version":"1.3.0"}"#),
            ],
        );

        let outcome = apply_staged_update(&paths).unwrap();
        assert_eq!(
            outcome,
            BootstrapOutcome::Applied {
                entries: 2,
                version: Some("1.3.0".to_string())
            }
        );
        assert_eq!(fs::read_to_string(tmp.path().join("web/index.html")).unwrap(), "new");
        assert!(tmp.path().join("web/assets/app.js").exists());
        assert!(!tmp.path().join("web/old").exists());
        assert_eq!(fs::read_to_string(tmp.path().join("launcher.py")).unwrap(), "new");
        assert_eq!(read_version(&paths.version_file()).as_deref(), Some("1.3.0"));
        assert!(!paths.staging_dir().exists());
    }

    #[test]
    fn staged_files_keep_their_modification_time() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        stage(
            &paths,
            &[
                ("web/index.html", "new"),
                ("launcher.py", "new"),
                ("version.json", r#"{"version":"1.3.0"}"#),
            ],
        );
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        for name in ["web/index.html", "launcher.py"] {
            fs::File::options()
                .write(true)
                .open(paths.staging_dir().join(name))
                .unwrap()
                .set_modified(stamp)
                .unwrap();
        }

        apply_staged_update(&paths).unwrap();

        for name in ["web/index.html", "launcher.py"] {
            let modified = fs::metadata(tmp.path().join(name))
                .unwrap()
                .modified()
                .unwrap();
            assert_eq!(modified, stamp, "{name}");
        }
    }

    #[test]
    fn version_is_published_into_existing_web_root() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        fs::write(paths.version_file(), r#"{"version":"1.0.0"}"#).unwrap();
        publish_version_to_web(&paths, "web");
        assert!(!tmp.path().join("web").exists());

        fs::create_dir(tmp.path().join("web")).unwrap();
        publish_version_to_web(&paths, "web");
        assert_eq!(
            read_version(&tmp.path().join("web/version.json")).as_deref(),
            Some("1.0.0")
        );
    }
}
