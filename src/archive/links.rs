use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

use super::entry_path::{check_link_target, confine};

/// Symlink validated during extraction, created once every file is written.
pub(super) struct PendingLink {
    link: PathBuf,
    target: PathBuf,
    resolved: PathBuf,
}

pub(super) fn plan_link(link: &Path, target: &Path, dest_dir: &Path) -> Result<PendingLink> {
    check_link_target(target)?;
    let parent = link
        .parent()
        .ok_or_else(|| AppError::archive("symlink entry has no parent directory"))?;
    let resolved = confine(dest_dir, &parent.join(target))?;
    Ok(PendingLink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        resolved,
    })
}

#[cfg(unix)]
fn make_link(item: &PendingLink) -> Result<()> {
    std::os::unix::fs::symlink(&item.target, &item.link)
        .map_err(|e| AppError::io(format!("failed to create symlink {:?}: {e}", item.link)))
}

/// Windows needs the target kind; dangling links cannot be created.
#[cfg(windows)]
fn make_link(item: &PendingLink) -> Result<()> {
    let result = if item.resolved.is_dir() {
        std::os::windows::fs::symlink_dir(&item.target, &item.link)
    } else if item.resolved.is_file() {
        std::os::windows::fs::symlink_file(&item.target, &item.link)
    } else {
        return Err(AppError::archive(format!(
            "symlink {:?} points at a missing target",
            item.link
        )));
    };
    result.map_err(|e| AppError::io(format!("failed to create symlink {:?}: {e}", item.link)))
}

pub(super) fn create_links(pending: Vec<PendingLink>) -> Result<()> {
    for item in pending {
        if let Some(parent) = item.link.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io(format!("failed to create directory {parent:?}: {e}")))?;
        }
        log::debug!("Linking {:?} -> {:?}", item.link, item.resolved);
        make_link(&item)?;
    }
    Ok(())
}
