//! Package store backed by a directory.
//!
//! Installed packages live at `<dir>/<ID><ext>`, where `ID` is the 16-digit
//! hex package id. Installs are written to a staging file and renamed into
//! place on finish, so an aborted install leaves no package behind.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use qraken_core::{PackageId, StoreError};
use tracing::debug;

use crate::install::{PackageStore, INSTALL_CHUNK};

const STAGING_NAME: &str = ".install.part";

pub struct DirectoryStore {
    dir: PathBuf,
    extension: String,
}

pub struct PendingInstall {
    file: File,
    staging: PathBuf,
}

impl DirectoryStore {
    /// `extension` includes the leading dot, e.g. `.cia`.
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self { dir: dir.into(), extension: extension.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, id: PackageId) -> PathBuf {
        self.dir.join(format!("{}{}", id, self.extension))
    }

    /// Ids of every installed package, sorted.
    pub fn installed_ids(&self) -> Result<Vec<PackageId>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(self.extension.as_str())) else {
                continue;
            };
            if let Ok(raw) = u64::from_str_radix(stem, 16) {
                ids.push(PackageId(raw));
            }
        }
        ids.sort_by_key(|id| id.0);
        Ok(ids)
    }
}

/// FNV-1a over the package header.
fn header_id(file: &mut File) -> Result<PackageId, StoreError> {
    file.seek(SeekFrom::Start(0))?;
    let mut header = Vec::with_capacity(INSTALL_CHUNK);
    file.take(INSTALL_CHUNK as u64).read_to_end(&mut header)?;
    if header.is_empty() {
        return Err(StoreError::generic("package is empty"));
    }
    let hash = header.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, &b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    Ok(PackageId(hash))
}

impl PackageStore for DirectoryStore {
    type Installed = PathBuf;
    type Pending = PendingInstall;

    fn inspect(&mut self, package: &mut File) -> Result<PackageId, StoreError> {
        header_id(package)
    }

    fn find_installed(&mut self, id: PackageId) -> Result<Option<PathBuf>, StoreError> {
        let path = self.path_of(id);
        Ok(path.is_file().then_some(path))
    }

    fn delete(&mut self, installed: PathBuf) -> Result<(), StoreError> {
        fs::remove_file(&installed)?;
        debug!("Removed {}", installed.display());
        Ok(())
    }

    fn begin_install(&mut self) -> Result<PendingInstall, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let staging = self.dir.join(STAGING_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)?;
        Ok(PendingInstall { file, staging })
    }

    fn write(&mut self, pending: &mut PendingInstall, offset: u64, bytes: &[u8]) -> Result<(), StoreError> {
        pending.file.seek(SeekFrom::Start(offset))?;
        pending.file.write_all(bytes)?;
        Ok(())
    }

    fn finish_install(&mut self, mut pending: PendingInstall) -> Result<(), StoreError> {
        pending.file.sync_all()?;
        let id = header_id(&mut pending.file)?;
        let target = self.path_of(id);
        drop(pending.file);
        fs::rename(&pending.staging, &target)?;
        debug!("Committed {}", target.display());
        Ok(())
    }
}
