//! Flashable zip creation from a staging tree.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::exclude::{is_hidden, ExcludeRules};
use super::PackageError;

/// Write every non-excluded file and directory under `root` into a zip at
/// `dest`. Entry names are relative to `root` and use `/` separators.
///
/// Returns the entry names in the order written.
pub fn write_zip(root: &Path, dest: &Path, rules: &ExcludeRules) -> Result<Vec<String>, PackageError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| PackageError::io(parent, e))?;
    }
    let file = File::create(dest).map_err(|e| PackageError::io(dest, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let mut names = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        // Excluded directories are pruned along with everything below them
        .filter_entry(|e| e.depth() == 0 || !is_pruned(root, e.path(), rules));

    for entry in walker {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };

        let name = entry_name(&rel);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(unix_mode(entry.path()));

        if entry.file_type().is_dir() {
            zip.add_directory(name.clone(), options)?;
        } else {
            zip.start_file(name.clone(), options)?;
            let mut src = File::open(entry.path()).map_err(|e| PackageError::io(entry.path(), e))?;
            io::copy(&mut src, &mut zip).map_err(|e| PackageError::io(entry.path(), e))?;
        }
        names.push(name);
    }

    zip.finish()?;
    Ok(names)
}

fn is_pruned(root: &Path, path: &Path, rules: &ExcludeRules) -> bool {
    is_hidden(path) || path.strip_prefix(root).is_ok_and(|rel| rules.is_excluded(rel))
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn unix_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn unix_mode(path: &Path) -> u32 {
    if path.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Names of the entries in an existing zip.
pub fn list_entries(path: &Path) -> Result<Vec<String>, PackageError> {
    let file = File::open(path).map_err(|e| PackageError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(io::BufReader::new(file))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        names.push(archive.by_index(i)?.name().to_string());
    }
    Ok(names)
}

