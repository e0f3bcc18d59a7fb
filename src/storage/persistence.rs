//! JSON snapshot file I/O and crash recovery for songqueue

use crate::core::{Record, Result, StoreError};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

// ============================================================================
// Paths
// ============================================================================

/// `data.json` -> `data.json.tmp`, in the same directory.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

// ============================================================================
// Encoding
// ============================================================================

pub fn encode_snapshot(records: &[Record]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(records)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_snapshot(path: &Path, bytes: &[u8]) -> Result<Vec<Record>> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Load / Save
// ============================================================================

/// A missing file is an empty table. Anything unreadable or unparseable is an error.
pub async fn load_snapshot(path: &Path) -> Result<Vec<Record>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot on disk, starting empty");
            return Ok(Vec::new());
        }
        Err(err) => return Err(StoreError::io(path, err)),
    };
    decode_snapshot(path, &bytes)
}

/// Writes `bytes` to the temp sibling and renames it over `path`.
///
/// The rename is the only point where the canonical file changes. If the temp
/// write fails the canonical file is never touched.
pub async fn write_snapshot(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| StoreError::io(parent, err))?;
    }

    let tmp = temp_path_for(path);
    if let Err(err) = write_temp(&tmp, bytes, sync).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }

    fs::rename(&tmp, path)
        .await
        .map_err(|err| StoreError::io(path, err))?;
    Ok(())
}

async fn write_temp(tmp: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let mut file = fs::File::create(tmp)
        .await
        .map_err(|err| StoreError::io(tmp, err))?;
    file.write_all(bytes)
        .await
        .map_err(|err| StoreError::io(tmp, err))?;
    file.flush().await.map_err(|err| StoreError::io(tmp, err))?;
    if sync {
        file.sync_all()
            .await
            .map_err(|err| StoreError::io(tmp, err))?;
    }
    Ok(())
}

// ============================================================================
// Recovery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No temp sibling was present.
    Clean,
    /// The temp sibling held a complete snapshot and now is the canonical file.
    Promoted { bytes: Vec<u8> },
    /// The temp sibling was unreadable or torn; the canonical bytes were kept
    /// and the stale temp file discarded.
    FellBack { bytes: Vec<u8> },
    /// Neither file could be read. Both were left as found.
    Unrecoverable,
}

impl RecoveryOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Clean => "no pending snapshot",
            Self::Promoted { .. } => "promoted pending snapshot",
            Self::FellBack { .. } => "kept canonical snapshot",
            Self::Unrecoverable => "no readable snapshot",
        }
    }
}

/// Reconciles an orphaned temp sibling with the canonical file.
///
/// A temp file is promoted only if it parses as a record array. One that
/// reads but does not parse is a torn write and is treated like an unreadable
/// one: the canonical file is kept byte for byte (it is not rewritten) and the
/// temp file is removed.
pub async fn recover_snapshot(path: &Path) -> Result<RecoveryOutcome> {
    let tmp = temp_path_for(path);
    let present = fs::try_exists(&tmp)
        .await
        .map_err(|err| StoreError::io(&tmp, err))?;
    if !present {
        debug!(path = %tmp.display(), "no pending snapshot");
        return Ok(RecoveryOutcome::Clean);
    }

    match fs::read(&tmp).await {
        Ok(bytes) => match decode_snapshot(&tmp, &bytes) {
            Ok(records) => {
                fs::rename(&tmp, path)
                    .await
                    .map_err(|err| StoreError::io(path, err))?;
                info!(
                    path = %path.display(),
                    records = records.len(),
                    "promoted pending snapshot"
                );
                return Ok(RecoveryOutcome::Promoted { bytes });
            }
            Err(err) => warn!(error = %err, "pending snapshot is torn, keeping canonical file"),
        },
        Err(err) => warn!(
            path = %tmp.display(),
            error = %err,
            "pending snapshot unreadable, keeping canonical file"
        ),
    }

    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(path = %path.display(), error = %err, "canonical snapshot unreadable");
            return Ok(RecoveryOutcome::Unrecoverable);
        }
    };

    if let Err(err) = fs::remove_file(&tmp).await {
        warn!(path = %tmp.display(), error = %err, "failed to discard stale snapshot");
    }
    Ok(RecoveryOutcome::FellBack { bytes })
}
