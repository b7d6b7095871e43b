//! Packs a dump into an in-memory zip archive.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Display, Error, From)]
/// Errors on packaging a dump.
pub enum ArchiveError {
    /// The dump to package doesn't exist.
    #[display("Nothing to package at {}", _0.display())]
    #[from(ignore)]
    Missing(#[error(ignore)] PathBuf),
    /// Reading the dump failed.
    #[display("Reading {} failed: {source}", path.display())]
    #[from(ignore)]
    Read { path: PathBuf, source: io::Error },
    /// Writing the archive failed.
    #[display("Writing zip archive failed: {_0}")]
    Zip(zip::result::ZipError),
}

/// Zips the file or folder at `path`.
///
/// A folder is stored with paths relative to it, a single file under its
/// file name.
pub fn zip_artifact(path: &Path) -> Result<Vec<u8>, ArchiveError> {
    let metadata = fs::metadata(path).map_err(|_| ArchiveError::Missing(path.to_path_buf()))?;
    log::debug!(target: "archive", "Packaging {}", path.display());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    if metadata.is_dir() {
        let mut entries = Vec::new();
        collect_entries(path, Path::new(""), &mut entries)?;
        entries.sort();

        for (name, source) in entries {
            match source {
                Some(file) => add_file(&mut zip, name, &file, options)?,
                None => zip.add_directory(name, options)?,
            }
        }
    } else {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ArchiveError::Missing(path.to_path_buf()))?;
        add_file(&mut zip, name, path, options)?;
    }

    let buffer = zip.finish()?.into_inner();
    log::debug!(target: "archive", "Packaged {} into {} bytes", path.display(), buffer.len());

    Ok(buffer)
}

fn add_file(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: String,
    source: &Path,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    let read_err = |source_err| ArchiveError::Read {
        path: source.to_path_buf(),
        source: source_err,
    };

    log::trace!(target: "archive", "Adding {name}");
    let mut file = File::open(source).map_err(read_err)?;
    zip.start_file(name, options)?;
    io::copy(&mut file, zip).map_err(read_err)?;

    Ok(())
}

/// Collects `(entry name, Some(file) | None for folders)` below `dir`.
fn collect_entries(
    dir: &Path,
    prefix: &Path,
    entries: &mut Vec<(String, Option<PathBuf>)>,
) -> Result<(), ArchiveError> {
    let read_err = |source| ArchiveError::Read {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let relative = prefix.join(entry.file_name());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().map_err(read_err)?.is_dir() {
            entries.push((format!("{name}/"), None));
            collect_entries(&entry.path(), &relative, entries)?;
        } else {
            entries.push((name, Some(entry.path())));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn names(buffer: Vec<u8>) -> Vec<String> {
        let archive = ZipArchive::new(Cursor::new(buffer)).unwrap();
        archive.file_names().map(String::from).collect::<Vec<_>>()
    }

    #[test]
    fn zips_folder_relative() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("6-3-2024");
        fs::create_dir_all(dump.join("shop")).unwrap();
        fs::write(dump.join("shop/orders.bson"), b"orders").unwrap();
        fs::write(dump.join("shop/orders.metadata.json"), b"{}").unwrap();
        fs::write(dump.join("prelude.json"), b"{}").unwrap();

        let buffer = zip_artifact(&dump).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(buffer.clone())).unwrap();
        let mut orders = String::new();
        archive
            .by_name("shop/orders.bson")
            .unwrap()
            .read_to_string(&mut orders)
            .unwrap();
        assert_eq!(orders, "orders");

        let mut entries = names(buffer);
        entries.sort();
        assert_eq!(
            entries,
            vec![
                "prelude.json",
                "shop/",
                "shop/orders.bson",
                "shop/orders.metadata.json"
            ]
        );
    }

    #[test]
    fn zips_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("6-3-2024.gz");
        fs::write(&archive, b"\x1f\x8bdata").unwrap();

        assert_eq!(names(zip_artifact(&archive).unwrap()), vec!["6-3-2024.gz"]);
    }

    #[test]
    fn missing_dump() {
        let dir = tempfile::tempdir().unwrap();
        let err = zip_artifact(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ArchiveError::Missing(_)));
    }
}
