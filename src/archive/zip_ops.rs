use std::fs;
use std::io::Read as _;
use std::path::Path;

use crate::error::{AppError, Result};

use super::entry_path::{common_root, confine, hoist, safe_relative_path};
use super::extract::{create_dir, write_file};
use super::links::{create_links, plan_link, PendingLink};

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: usize,
    pub dirs: usize,
    pub links: usize,
    /// Wrapper directory stripped from every entry, if any.
    pub hoisted_root: Option<String>,
}

/// Extract a release package into `dest_dir`.
///
/// When every entry sits under one top-level directory, that directory is
/// hoisted away so its contents land directly in `dest_dir`. Any unsafe
/// entry name aborts the whole extraction.
pub fn extract_package(archive_path: &Path, dest_dir: &Path) -> Result<ExtractReport> {
    fs::create_dir_all(dest_dir)?;
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    if let Some(bad) = archive
        .file_names()
        .find(|name| safe_relative_path(name).is_none())
    {
        return Err(AppError::archive(format!(
            "archive contains unsafe path {bad:?}"
        )));
    }
    let root = common_root(archive.file_names());
    let mut report = ExtractReport {
        hoisted_root: root.clone(),
        ..ExtractReport::default()
    };
    let mut pending: Vec<PendingLink> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = safe_relative_path(entry.name()) else {
            continue;
        };
        let Some(relative) = hoist(&relative, root.as_deref()) else {
            continue;
        };
        let out_path = confine(dest_dir, &relative)?;

        if entry.is_symlink() {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            pending.push(plan_link(&out_path, Path::new(&target), dest_dir)?);
            report.links += 1;
        } else if entry.is_dir() {
            create_dir(&out_path)?;
            report.dirs += 1;
        } else {
            let size = entry.size();
            let mode = entry.unix_mode();
            write_file(&out_path, &mut entry, size, mode)?;
            report.files += 1;
        }
    }

    create_links(pending)?;
    Ok(report)
}
