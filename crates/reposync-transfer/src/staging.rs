//! Per-transfer staging folder on disk.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::TransferError;
use crate::manifest::ManifestReader;
use crate::progress::TransferId;

const SNAPSHOT_FILE: &str = "snapshot.jsonl";
const REPORT_FILE: &str = "report.json";
const CONTENT_DIR: &str = "content";

/// Holds the manifest, content parts and report of one transfer.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Creates `<staging_root>/<transfer id>`.
    pub fn create(staging_root: &Path, transfer_id: &TransferId) -> Result<Self, TransferError> {
        let dir = staging_root.join(transfer_id.as_str());
        fs::create_dir_all(dir.join(CONTENT_DIR))?;
        debug!(transfer_id = %transfer_id, dir = %dir.display(), "staging area created");
        Ok(Self { dir })
    }

    /// The staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the staged manifest.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Path of the destination report.
    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    /// True once a manifest was staged.
    pub fn has_snapshot(&self) -> bool {
        self.snapshot_path().is_file()
    }

    /// Stores the manifest, returning its size in bytes.
    pub fn save_snapshot(&self, mut reader: impl Read) -> Result<u64, TransferError> {
        let mut file = File::create(self.snapshot_path())?;
        Ok(io::copy(&mut reader, &mut file)?)
    }

    /// Opens the staged manifest.
    pub fn open_snapshot(&self) -> Result<ManifestReader<BufReader<File>>, TransferError> {
        let file = File::open(self.snapshot_path())?;
        ManifestReader::new(BufReader::new(file))
    }

    fn part_path(&self, part_name: &str) -> Result<PathBuf, TransferError> {
        let valid = !part_name.is_empty()
            && part_name != "."
            && part_name != ".."
            && !part_name.contains(['/', '\\']);
        if !valid {
            return Err(TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid content part name '{}'", part_name),
            )));
        }
        Ok(self.dir.join(CONTENT_DIR).join(part_name))
    }

    /// Stores one content part, returning its size in bytes.
    pub fn save_content(&self, part_name: &str, mut reader: impl Read) -> Result<u64, TransferError> {
        let mut file = File::create(self.part_path(part_name)?)?;
        Ok(io::copy(&mut reader, &mut file)?)
    }

    /// Reads a staged content part, or None if it was never sent.
    pub fn read_content(&self, part_name: &str) -> Result<Option<Vec<u8>>, TransferError> {
        let path = self.part_path(part_name)?;
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the destination report.
    pub fn read_report(&self) -> Result<Vec<u8>, TransferError> {
        Ok(fs::read(self.report_path())?)
    }

    /// Deletes the staging folder.
    pub fn remove(&self) -> Result<(), TransferError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
