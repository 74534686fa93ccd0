use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::Result;

/// Handle to the on-disk multi-file authentication material for the
/// transport session. Exclusively owned by the Connection Manager.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Make sure the directory exists before handing it to the transport.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Delete all persisted credential material, wholesale.
    ///
    /// The next connect starts from a clean, unauthenticated slate (fresh
    /// pairing challenge) instead of retrying corrupted credentials.
    pub fn wipe(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.dir.exists()
    }
}
