//! Safe extraction of release packages.

mod entry_path;
mod extract;
mod links;
mod zip_ops;

pub use zip_ops::{extract_package, ExtractReport};

/// Write a zip with the given entries; `None` content marks a directory.
#[cfg(test)]
pub(crate) fn write_test_zip(path: &std::path::Path, entries: &[(&str, Option<&[u8]>)]) {
    use std::io::Write as _;

    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        match content {
            Some(bytes) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(bytes).unwrap();
            }
            None => writer.add_directory(*name, options).unwrap(),
        }
    }
    writer.finish().unwrap();
}
