use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use flate2::{Compression, GzBuilder};
use tracing::debug;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};
use crate::storage::{StorageEngine, safe_join};

const EXCLUDED_DIRS: [&str; 1] = [".git"];

/// A regular file to be archived, addressed relative to the module root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Forward-slash path relative to the archive root.
    pub name: String,
    pub path: PathBuf,
    pub executable: bool,
}

/// Both distributable archives of one module version.
#[derive(Debug, Clone)]
pub struct BuiltArchives {
    pub tar_gz: Vec<u8>,
    pub zip: Vec<u8>,
}

/// Builds `source.tar.gz` and `source.zip` bodies from a working tree.
///
/// Output is a pure function of the file set, file contents, executable bits
/// and `mtime`, so rebuilding an unchanged tree is byte-identical.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    storage: StorageEngine,
}

impl ArchiveBuilder {
    pub fn new(storage: StorageEngine) -> Self {
        Self { storage }
    }

    /// Archive `source_root`, or `source_root/sub_path` when given.
    pub fn build(
        &self,
        source_root: &Path,
        sub_path: Option<&str>,
        mtime: DateTime<Utc>,
    ) -> Result<BuiltArchives> {
        let root = match sub_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(sub) => safe_join(source_root, &[sub])?,
            None => source_root.to_path_buf(),
        };
        if !self.storage.dir_exists(&root)? {
            return Err(Error::ArchiveFailed(format!(
                "module path '{}' does not exist in the source tree",
                sub_path.unwrap_or_default()
            )));
        }

        let entries = self.collect_entries(&root)?;
        debug!("Archiving {} files from {}", entries.len(), root.display());

        Ok(BuiltArchives {
            tar_gz: self.build_tar_gz(&entries, mtime)?,
            zip: self.build_zip(&entries, mtime)?,
        })
    }

    /// Every regular file below `root` in lexicographic name order. `.git`
    /// directories and symlinks are skipped.
    pub fn collect_entries(&self, root: &Path) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            for entry in self.storage.list_dir(&dir)? {
                if entry.is_symlink {
                    continue;
                }
                let name = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                if entry.is_dir {
                    if !EXCLUDED_DIRS.contains(&entry.name.as_str()) {
                        pending.push((entry.path, name));
                    }
                } else {
                    entries.push(ArchiveEntry {
                        name,
                        path: entry.path,
                        executable: entry.executable,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn build_tar_gz(&self, entries: &[ArchiveEntry], mtime: DateTime<Utc>) -> Result<Vec<u8>> {
        let timestamp = mtime.timestamp().max(0) as u64;
        let encoder = GzBuilder::new()
            .mtime(u32::try_from(timestamp).unwrap_or(u32::MAX))
            .write(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);

        for entry in entries {
            let data = self.storage.read_file(&entry.path)?;
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(file_mode(entry.executable));
            header.set_mtime(timestamp);
            header.set_uid(0);
            header.set_gid(0);
            builder
                .append_data(&mut header, &entry.name, data.as_slice())
                .map_err(|e| Error::ArchiveFailed(format!("tar entry '{}': {e}", entry.name)))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| Error::ArchiveFailed(format!("finishing tar stream: {e}")))?;
        encoder
            .finish()
            .map_err(|e| Error::ArchiveFailed(format!("finishing gzip stream: {e}")))
    }

    fn build_zip(&self, entries: &[ArchiveEntry], mtime: DateTime<Utc>) -> Result<Vec<u8>> {
        let modified = zip_datetime(mtime)?;
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));

        for entry in entries {
            let data = self.storage.read_file(&entry.path)?;
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(modified)
                .unix_permissions(file_mode(entry.executable));
            writer.start_file(entry.name.as_str(), options)?;
            writer
                .write_all(&data)
                .map_err(|e| Error::ArchiveFailed(format!("zip entry '{}': {e}", entry.name)))?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

fn file_mode(executable: bool) -> u32 {
    if executable { 0o755 } else { 0o644 }
}

/// Zip timestamps cannot predate 1980 or pass 2107.
fn zip_datetime(mtime: DateTime<Utc>) -> Result<zip::DateTime> {
    let year = mtime.year().clamp(1980, 2107);
    let (month, day, hour, minute, second) = if year == mtime.year() {
        (mtime.month(), mtime.day(), mtime.hour(), mtime.minute(), mtime.second())
    } else {
        (1, 1, 0, 0, 0)
    };
    zip::DateTime::from_date_and_time(
        year as u16,
        month as u8,
        day as u8,
        hour as u8,
        minute as u8,
        second.min(58) as u8,
    )
    .map_err(|_| Error::ArchiveFailed(format!("timestamp {mtime} cannot be stored in a zip")))
}
