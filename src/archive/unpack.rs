use std::io::{Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::{StorageEngine, safe_join};

/// Upper bound on the total unpacked size of one upload.
pub const MAX_UNPACKED_BYTES: u64 = 512 * 1024 * 1024;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Zip,
    TarGz,
}

impl UploadFormat {
    /// Detect the archive format from its leading magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if data.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Extract an uploaded archive into `dest`. Any entry whose normalised
/// path leaves `dest` fails the whole upload with `PathTraversal`; links are
/// skipped. Returns the number of files written.
pub fn unpack_upload(storage: &StorageEngine, data: &[u8], dest: &Path) -> Result<usize> {
    match UploadFormat::detect(data) {
        Some(UploadFormat::Zip) => unpack_zip(storage, data, dest),
        Some(UploadFormat::TarGz) => unpack_tar_gz(storage, data, dest),
        None => Err(Error::BadRequest(
            "uploaded file is not a zip or tar.gz archive".into(),
        )),
    }
}

fn unpack_zip(storage: &StorageEngine, data: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::BadRequest(format!("invalid zip archive: {e}")))?;
    let mut budget = MAX_UNPACKED_BYTES;
    let mut written = 0;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| Error::BadRequest(format!("invalid zip entry: {e}")))?;
        let name = file.name().to_string();
        let target = safe_join(dest, &[name.as_str()])?;

        if file.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            debug!("Skipping symlink {name} in upload");
            continue;
        }
        if file.is_dir() {
            storage.make_dir(&target)?;
            continue;
        }

        let content = read_limited(&mut file, &mut budget, &name)?;
        storage.write_file(&target, &content)?;
        written += 1;
    }

    Ok(written)
}

fn unpack_tar_gz(storage: &StorageEngine, data: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut budget = MAX_UNPACKED_BYTES;
    let mut written = 0;

    let entries = archive
        .entries()
        .map_err(|e| Error::BadRequest(format!("invalid tar archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::BadRequest(format!("invalid tar entry: {e}")))?;
        let name = entry
            .path()
            .map_err(|e| Error::BadRequest(format!("invalid tar entry path: {e}")))?
            .to_string_lossy()
            .into_owned();
        let target = safe_join(dest, &[name.as_str()])?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => storage.make_dir(&target)?,
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let content = read_limited(&mut entry, &mut budget, &name)?;
                storage.write_file(&target, &content)?;
                written += 1;
            }
            other => debug!("Skipping {other:?} entry {name} in upload"),
        }
    }

    Ok(written)
}

fn read_limited(reader: &mut impl Read, budget: &mut u64, name: &str) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    reader
        .take(*budget + 1)
        .read_to_end(&mut content)
        .map_err(|e| Error::BadRequest(format!("failed to read '{name}' from upload: {e}")))?;
    let len = content.len() as u64;
    if len > *budget {
        return Err(Error::BadRequest(format!(
            "upload exceeds the {MAX_UNPACKED_BYTES} byte unpacked size limit"
        )));
    }
    *budget -= len;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::storage::PathBuilder;

    fn storage(temp: &TempDir) -> StorageEngine {
        StorageEngine::new(PathBuilder::new(temp.path().join("data"), temp.path().join("tmp")))
    }

    fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_with_raw_name(name: &str, content: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        // Bypass the builder's own path validation to craft a hostile entry.
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        builder.append(&header, content).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(UploadFormat::detect(b"PK\x03\x04rest"), Some(UploadFormat::Zip));
        assert_eq!(UploadFormat::detect(&[0x1f, 0x8b, 8]), Some(UploadFormat::TarGz));
        assert_eq!(UploadFormat::detect(b"plain"), None);
    }

    #[test]
    fn test_unpack_zip() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tmp/job");
        let data = zip_of(&[
            ("main.tf", "variable \"a\" {}"),
            ("modules/private/main.tf", "output \"b\" { value = 1 }"),
        ]);

        assert_eq!(unpack_upload(&storage(&temp), &data, &dest).unwrap(), 2);
        assert!(dest.join("main.tf").is_file());
        assert!(dest.join("modules/private/main.tf").is_file());
    }

    #[test]
    fn test_zip_slip_rejected() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tmp/job");
        let data = zip_of(&[("../../evil.tf", "x")]);

        assert!(matches!(
            unpack_upload(&storage(&temp), &data, &dest),
            Err(Error::PathTraversal(_))
        ));
        assert!(!temp.path().join("evil.tf").exists());
    }

    #[test]
    fn test_tar_slip_rejected() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tmp/job");
        let data = tar_gz_with_raw_name("../escape.tf", b"x");

        assert!(matches!(
            unpack_upload(&storage(&temp), &data, &dest),
            Err(Error::PathTraversal(_))
        ));
        assert!(!temp.path().join("tmp/escape.tf").exists());
    }

    #[test]
    fn test_unpack_tar_gz() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tmp/job");
        let data = tar_gz_with_raw_name("main.tf", b"variable \"a\" {}");

        assert_eq!(unpack_upload(&storage(&temp), &data, &dest).unwrap(), 1);
        assert_eq!(std::fs::read(dest.join("main.tf")).unwrap(), b"variable \"a\" {}");
    }

    #[test]
    fn test_garbage_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            unpack_upload(&storage(&temp), b"not an archive", &temp.path().join("tmp/job")),
            Err(Error::BadRequest(_))
        ));
    }
}
