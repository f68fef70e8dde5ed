//! Package installation from the downloaded file.
//!
//! The [`PackageStore`] owns atomicity and rollback. [`Installer`] only
//! sequences the calls: inspect the package, remove an installed copy with
//! the same id, then stream the file into a fresh install in 4096-byte
//! chunks. Any failing step aborts the rest.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use qraken_core::{InstallError, PackageId, StoreError};
use tracing::{debug, info};

/// Size of one install write.
pub const INSTALL_CHUNK: usize = 4096;

/// Device-local package store.
pub trait PackageStore {
    /// An installed package.
    type Installed;
    /// An install in progress.
    type Pending;

    /// Read the package id out of a package file.
    fn inspect(&mut self, package: &mut File) -> Result<PackageId, StoreError>;

    fn find_installed(&mut self, id: PackageId) -> Result<Option<Self::Installed>, StoreError>;

    fn delete(&mut self, installed: Self::Installed) -> Result<(), StoreError>;

    fn begin_install(&mut self) -> Result<Self::Pending, StoreError>;

    /// Write `bytes` at `offset` of the pending install.
    fn write(&mut self, pending: &mut Self::Pending, offset: u64, bytes: &[u8]) -> Result<(), StoreError>;

    fn finish_install(&mut self, pending: Self::Pending) -> Result<(), StoreError>;
}

pub struct Installer<S> {
    store: S,
}

impl<S: PackageStore> Installer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Install the package at `path`, replacing any installed copy.
    ///
    /// Returns the installed package id.
    pub fn install(&mut self, path: &Path) -> Result<PackageId, InstallError> {
        let mut file = File::open(path).map_err(|source| InstallError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let id = self.store.inspect(&mut file).map_err(InstallError::Inspect)?;
        if let Some(installed) = self.store.find_installed(id).map_err(InstallError::Inspect)? {
            info!("Replacing installed package {}", id);
            self.store.delete(installed).map_err(InstallError::Delete)?;
        }

        let size = file
            .metadata()
            .map_err(|source| InstallError::Read { offset: 0, source })?
            .len();
        let mut pending = self.store.begin_install().map_err(InstallError::Begin)?;

        let mut chunk = [0u8; INSTALL_CHUNK];
        let mut offset = 0u64;
        while offset < size {
            let len = (size - offset).min(INSTALL_CHUNK as u64) as usize;
            read_at(&mut file, offset, &mut chunk[..len])
                .map_err(|source| InstallError::Read { offset, source })?;
            self.store
                .write(&mut pending, offset, &chunk[..len])
                .map_err(|source| InstallError::Write { offset, source })?;
            offset += len as u64;
        }
        debug!("Streamed {} bytes to the store", size);

        self.store.finish_install(pending).map_err(InstallError::Finish)?;
        info!("Installed package {} ({} bytes)", id, size);
        Ok(id)
    }
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}
