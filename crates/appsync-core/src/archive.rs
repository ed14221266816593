//! Zip extraction onto a destination directory tree.
//!
//! Extraction is not transactional: directories and files written before a
//! failure are left in place.

use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use thiserror::Error;

const BUFFER_SIZE: usize = 8192;

/// Where an archive is read from.
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    /// Read-only archive packaged with the application binary.
    Packaged(&'static [u8]),
    /// Archive on the writable filesystem.
    File(PathBuf),
}

impl ArchiveSource {
    fn describe(&self) -> String {
        match self {
            Self::Packaged(bytes) => format!("packaged archive ({} bytes)", bytes.len()),
            Self::File(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ArchiveError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }
}

/// Extract every entry of `source` under `destination`.
///
/// Returns `false` when the archive cannot be opened or any entry fails to
/// read or write; the failure is logged.
#[must_use]
pub fn extract(source: &ArchiveSource, destination: &Path) -> bool {
    match try_extract(source, destination) {
        Ok(()) => true,
        Err(error) => {
            error!("Failed to extract {}: {error}", source.describe());
            false
        }
    }
}

/// Extract every entry of `source` under `destination`.
///
/// # Errors
/// Returns an error when the archive cannot be opened or an entry cannot be
/// read or written.
pub fn try_extract(source: &ArchiveSource, destination: &Path) -> Result<(), ArchiveError> {
    match source {
        ArchiveSource::Packaged(bytes) => extract_from(Cursor::new(*bytes), destination),
        ArchiveSource::File(path) => {
            let file = std::fs::File::open(path)
                .map_err(|error| ArchiveError::io("failed to open archive", path, error))?;
            extract_from(file, destination)
        }
    }
}

fn extract_from<R: Read + Seek>(reader: R, dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|error| ArchiveError::zip("failed to read zip archive", error))?;
    let mut buffer = [0_u8; BUFFER_SIZE];

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| ArchiveError::zip("failed to read zip entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path");
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                ArchiveError::io("failed to create directory", &out_path, error)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                ArchiveError::io("failed to create parent directory", parent, error)
            })?;
        }
        let file = std::fs::File::create(&out_path)
            .map_err(|error| ArchiveError::io("failed to create file", &out_path, error))?;
        let mut writer = std::io::BufWriter::with_capacity(BUFFER_SIZE, file);
        loop {
            let read = entry
                .read(&mut buffer)
                .map_err(|error| ArchiveError::io("failed to read entry for", &out_path, error))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|error| ArchiveError::io("failed to write", &out_path, error))?;
        }
        writer
            .flush()
            .map_err(|error| ArchiveError::io("failed to flush", &out_path, error))?;
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::path::Path;

    use super::{ArchiveSource, extract};

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let zip_file = std::fs::File::create(path).expect("zip file should be created");
        let mut writer = zip::ZipWriter::new(zip_file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, options)
                    .expect("directory entry should be written");
            } else {
                writer
                    .start_file(*name, options)
                    .expect("file entry should be started");
                writer.write_all(content).expect("file entry should be written");
            }
        }
        writer.finish().expect("zip archive should be finalized");
    }

    #[test]
    fn extract_file_creates_nested_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("core.zip");
        let dest = temp.path().join("bundle");
        write_zip(
            &zip_path,
            &[("www/", b""), ("www/js/app.js", b"console.log(1)"), ("index.html", b"<html>")],
        );

        assert!(extract(&ArchiveSource::File(zip_path), &dest));

        assert_eq!(
            std::fs::read(dest.join("www/js/app.js")).expect("entry should be extracted"),
            b"console.log(1)"
        );
        assert!(dest.join("index.html").is_file());
    }

    #[test]
    fn extract_packaged_bytes() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("baseline.zip");
        write_zip(&zip_path, &[("manifest.json", b"{}")]);
        let bytes: &'static [u8] =
            Vec::leak(std::fs::read(&zip_path).expect("zip should be readable"));
        let dest = temp.path().join("bundle");

        assert!(extract(&ArchiveSource::Packaged(bytes), &dest));
        assert!(dest.join("manifest.json").is_file());
    }

    #[test]
    fn corrupt_archive_returns_false() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("broken.zip");
        std::fs::write(&zip_path, b"definitely not a zip").expect("file should be written");

        assert!(!extract(&ArchiveSource::File(zip_path), &temp.path().join("bundle")));
    }

    #[test]
    fn missing_archive_returns_false() {
        let temp = tempfile::tempdir().expect("tempdir should be created");

        assert!(!extract(
            &ArchiveSource::File(temp.path().join("absent.zip")),
            &temp.path().join("bundle")
        ));
    }

    #[test]
    fn unsafe_entries_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("unsafe.zip");
        let dest = temp.path().join("bundle");
        write_zip(&zip_path, &[("../outside.txt", b"nope"), ("inside.txt", b"yes")]);

        assert!(extract(&ArchiveSource::File(zip_path), &dest));
        assert!(!temp.path().join("outside.txt").exists());
        assert!(dest.join("inside.txt").is_file());
    }
}
