//! Versioned artifact storage with an atomic current-pointer swap.
//!
//! Layout under the store root:
//!
//! ```text
//! CURRENT                    manifest: live version + BLAKE3 digests
//! versions/<version>/scaler.json
//! versions/<version>/model.json
//! ```
//!
//! A commit writes a fresh version directory, then replaces `CURRENT` by
//! writing `CURRENT.<version>.tmp`, syncing it and renaming it over the old
//! manifest. Each commit owns its temp file, so concurrent publishers never
//! write into each other's manifest. Until the rename the previous manifest
//! (and so the previous scaler and model pair) stays live, so readers never
//! observe a half-updated pair.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lendscore_core::constants::{ARTIFACT_FORMAT_VERSION, MODEL_MAGIC, SCALER_MAGIC};
use lendscore_core::error::StorageError;
use lendscore_model::{ScalerState, ScoringModel};

const MANIFEST_MAGIC: &str = "LSMF";
const MANIFEST_FILE: &str = "CURRENT";
const MANIFEST_TMP_SUFFIX: &str = "tmp";
const VERSIONS_DIR: &str = "versions";
const SCALER_FILE: &str = "scaler.json";
const MODEL_FILE: &str = "model.json";

/// The scaler and model, always loaded and committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub scaler: ScalerState,
    pub model: ScoringModel,
}

/// Identifier of one committed artifact pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactVersion(pub String);

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistence collaborator for the artifact pair.
pub trait ArtifactStore: Send + Sync {
    /// The live pair, or `None` when nothing has been committed.
    fn load(&self) -> Result<Option<ArtifactBundle>, StorageError>;

    /// Persist a new pair and make it live atomically. On error the
    /// previously live pair is unchanged.
    fn commit(&self, bundle: &ArtifactBundle) -> Result<ArtifactVersion, StorageError>;
}

#[derive(Serialize, Deserialize)]
struct ArtifactFile<T> {
    magic: String,
    format_version: u32,
    payload: T,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Manifest {
    magic: String,
    format_version: u32,
    version: ArtifactVersion,
    scaler_blake3: String,
    model_blake3: String,
    committed_at: DateTime<Utc>,
}

/// Filesystem-backed [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

/// A version directory written to disk but not yet live.
#[derive(Debug)]
pub struct StagedCommit {
    manifest: Manifest,
}

impl StagedCommit {
    pub fn version(&self) -> &ArtifactVersion {
        &self.manifest.version
    }
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIR)
    }

    fn version_dir(&self, version: &ArtifactVersion) -> PathBuf {
        self.versions_dir().join(&version.0)
    }

    fn manifest_tmp(&self, version: &ArtifactVersion) -> PathBuf {
        self.root
            .join(format!("{MANIFEST_FILE}.{version}.{MANIFEST_TMP_SUFFIX}"))
    }

    /// Write both artifacts into a new version directory without touching
    /// the live manifest.
    pub fn stage(&self, bundle: &ArtifactBundle) -> Result<StagedCommit, StorageError> {
        let scaler_bytes = encode(SCALER_MAGIC, &bundle.scaler)?;
        let model_bytes = encode(MODEL_MAGIC, &bundle.model)?;
        let scaler_blake3 = digest(&scaler_bytes);
        let model_blake3 = digest(&model_bytes);

        let committed_at = Utc::now();
        let stem = format!(
            "{}-{}",
            committed_at.format("%Y%m%dT%H%M%S%3fZ"),
            &model_blake3[..8]
        );
        fs::create_dir_all(self.versions_dir()).map_err(io_err)?;
        let mut version = ArtifactVersion(stem.clone());
        let mut attempt = 1;
        let dir = loop {
            let dir = self.version_dir(&version);
            match fs::create_dir(&dir) {
                Ok(()) => break dir,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    version = ArtifactVersion(format!("{stem}-{attempt}"));
                }
                Err(e) => return Err(io_err(e)),
            }
        };
        write_synced(&dir.join(SCALER_FILE), &scaler_bytes)?;
        write_synced(&dir.join(MODEL_FILE), &model_bytes)?;
        sync_dir(&dir)?;
        debug!(%version, "staged artifacts");

        Ok(StagedCommit {
            manifest: Manifest {
                magic: MANIFEST_MAGIC.to_string(),
                format_version: ARTIFACT_FORMAT_VERSION,
                version,
                scaler_blake3,
                model_blake3,
                committed_at,
            },
        })
    }

    /// Make a staged version live by swapping the manifest. On error the
    /// staged version directory is removed and the previous manifest stays
    /// live.
    pub fn publish(&self, staged: StagedCommit) -> Result<ArtifactVersion, StorageError> {
        let version = staged.manifest.version.clone();
        if let Err(e) = self
            .write_manifest(&staged.manifest)
            .and_then(|tmp| self.swap_manifest(&tmp))
        {
            self.discard(&version);
            return Err(e);
        }
        if let Err(e) = sync_dir(&self.root) {
            warn!(%version, "manifest swapped but directory sync failed: {e}");
        }
        info!(%version, "artifacts committed");
        Ok(version)
    }

    /// Write the manifest to this version's own temp file.
    fn write_manifest(&self, manifest: &Manifest) -> Result<PathBuf, StorageError> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = self.manifest_tmp(&manifest.version);
        if let Err(e) = write_synced(&tmp, &bytes) {
            remove_tmp(&tmp);
            return Err(e);
        }
        Ok(tmp)
    }

    fn swap_manifest(&self, tmp: &Path) -> Result<(), StorageError> {
        fs::rename(tmp, self.root.join(MANIFEST_FILE)).map_err(|e| {
            remove_tmp(tmp);
            io_err(e)
        })
    }

    fn discard(&self, version: &ArtifactVersion) {
        match fs::remove_dir_all(self.version_dir(version)) {
            Ok(()) => debug!(%version, "discarded unpublished artifacts"),
            Err(e) => warn!(%version, "failed to discard unpublished artifacts: {e}"),
        }
    }

    /// Version the manifest currently points at.
    pub fn current_version(&self) -> Result<Option<ArtifactVersion>, StorageError> {
        Ok(self.read_manifest()?.map(|m| m.version))
    }

    /// All version directories on disk, oldest first.
    pub fn versions(&self) -> Result<Vec<ArtifactVersion>, StorageError> {
        let entries = match fs::read_dir(self.versions_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err)?;
            if entry.file_type().map_err(io_err)?.is_dir() {
                out.push(ArtifactVersion(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Delete all but the `keep` newest versions up to and including the
    /// live one. Versions newer than the live one are unpublished (or still
    /// being published) and are left alone, as is everything when nothing
    /// is live. Returns the number of versions removed.
    pub fn prune(&self, keep: usize) -> Result<usize, StorageError> {
        let Some(current) = self.current_version()? else {
            return Ok(0);
        };
        let versions: Vec<ArtifactVersion> = self
            .versions()?
            .into_iter()
            .filter(|v| *v <= current)
            .collect();
        let mut removed = 0;
        let excess = versions.len().saturating_sub(keep);
        for version in versions.into_iter().take(excess) {
            if version == current {
                continue;
            }
            fs::remove_dir_all(self.version_dir(&version)).map_err(io_err)?;
            debug!(%version, "pruned artifact version");
            removed += 1;
        }
        if removed > 0 {
            info!(removed, keep, "pruned old artifact versions");
        }
        Ok(removed)
    }

    fn read_manifest(&self) -> Result<Option<Manifest>, StorageError> {
        let bytes = match fs::read(self.root.join(MANIFEST_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::CorruptArtifact(format!("invalid manifest: {e}")))?;
        if manifest.magic != MANIFEST_MAGIC {
            return Err(StorageError::CorruptArtifact("invalid manifest magic".into()));
        }
        if manifest.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(StorageError::CorruptArtifact(format!(
                "unsupported manifest version: {}",
                manifest.format_version
            )));
        }
        Ok(Some(manifest))
    }

    fn read_verified(&self, path: &Path, expected: &str) -> Result<Vec<u8>, StorageError> {
        let bytes = fs::read(path).map_err(io_err)?;
        if digest(&bytes) != expected {
            return Err(StorageError::CorruptArtifact(format!(
                "digest mismatch for {}",
                path.display()
            )));
        }
        Ok(bytes)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn load(&self) -> Result<Option<ArtifactBundle>, StorageError> {
        let Some(manifest) = self.read_manifest()? else {
            return Ok(None);
        };
        let dir = self.version_dir(&manifest.version);
        let scaler_bytes = self.read_verified(&dir.join(SCALER_FILE), &manifest.scaler_blake3)?;
        let model_bytes = self.read_verified(&dir.join(MODEL_FILE), &manifest.model_blake3)?;

        let scaler: ScalerState = decode(SCALER_MAGIC, &scaler_bytes)?;
        let model: ScoringModel = decode(MODEL_MAGIC, &model_bytes)?;
        if !scaler.is_well_formed() {
            return Err(StorageError::CorruptArtifact("scaler parameters out of range".into()));
        }
        if !model.is_well_formed() {
            return Err(StorageError::CorruptArtifact(
                "model does not match the feature schema".into(),
            ));
        }
        debug!(version = %manifest.version, "loaded artifacts");
        Ok(Some(ArtifactBundle { scaler, model }))
    }

    fn commit(&self, bundle: &ArtifactBundle) -> Result<ArtifactVersion, StorageError> {
        let staged = self.stage(bundle)?;
        let version = staged.version().clone();
        self.publish(staged).inspect_err(|e| {
            warn!(%version, "manifest swap failed, previous artifacts remain live: {e}");
        })
    }
}

fn encode<T: Serialize>(magic: &str, payload: &T) -> Result<Vec<u8>, StorageError> {
    let file = ArtifactFile {
        magic: magic.to_string(),
        format_version: ARTIFACT_FORMAT_VERSION,
        payload,
    };
    serde_json::to_vec(&file).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(magic: &str, bytes: &[u8]) -> Result<T, StorageError> {
    let file: ArtifactFile<T> = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptArtifact(format!("invalid {magic} artifact: {e}")))?;
    if file.magic != magic {
        return Err(StorageError::CorruptArtifact(format!(
            "expected magic {magic}, found {}",
            file.magic
        )));
    }
    if file.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(StorageError::CorruptArtifact(format!(
            "unsupported {magic} version: {}",
            file.format_version
        )));
    }
    Ok(file.payload)
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    File::open(dir).and_then(|d| d.sync_all()).map_err(io_err)
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn remove_tmp(path: &Path) {
    if path.is_file() {
        let _ = fs::remove_file(path);
    }
}

fn io_err(e: io::Error) -> StorageError {
    StorageError::Io(e.to_string())
}
