// THEORY:
// The `artifacts` module is the only part of a comparison that performs I/O. The
// numeric stages hand it finished images; it encodes them as PNG in memory and
// writes them through an `ArtifactStore`, the seam between the engine and wherever
// artifacts live (a media directory, an object store, a map in a test).
//
// Key principles:
// 1.  **One namespace per comparison**: a session must be opened before anything is
//     written to it, and opening an existing session fails. Two comparisons that
//     were handed the same key can never overwrite each other's files.
// 2.  **All or nothing**: `emit` either stores every artifact of a comparison and
//     returns their references, or returns the first error. Artifacts already
//     written for a failed session are left behind but never reported.
// 3.  **Scoped handles**: files are opened, written and closed inside one call, so
//     every exit path releases them.

use crate::core_modules::change_regions::ChangeRegion;
use crate::core_modules::session::SessionKey;
use crate::core_modules::structural::DifferenceMap;
use crate::error::StorageError;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// File name of the difference visualization within a session.
pub const DIFF_ARTIFACT: &str = "diff_box.png";

/// File name of the `index`-th region snapshot within a session.
pub fn region_artifact_name(index: usize) -> String {
    format!("change_{index}.png")
}

/// A retrievable location of a stored artifact (a URL or a path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(location: impl Into<String>) -> Self {
        ArtifactRef(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where comparison artifacts are persisted.
pub trait ArtifactStore: Send + Sync {
    /// Reserves the namespace for `session`. Fails with `StorageError::Collision`
    /// if it already exists.
    fn open_session(&self, session: &SessionKey) -> Result<(), StorageError>;

    /// Stores `bytes` as `name` inside an opened session.
    fn put(
        &self,
        session: &SessionKey,
        name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError>;
}

/// Stores each session as a directory of files under `root`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    /// References become `{base}/{session}/{name}` instead of filesystem paths.
    /// `base` should point at `root` as it is served, e.g. `https://host/media`.
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    fn session_dir(&self, session: &SessionKey) -> PathBuf {
        self.root.join(session.as_str())
    }

    fn io_error(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn open_session(&self, session: &SessionKey) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|e| Self::io_error(&self.root, e))?;

        let dir = self.session_dir(session);
        match fs::create_dir(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "opened artifact session");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(session = %session, "artifact session already exists");
                Err(StorageError::Collision {
                    key: session.to_string(),
                })
            }
            Err(e) => Err(Self::io_error(&dir, e)),
        }
    }

    fn put(
        &self,
        session: &SessionKey,
        name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        let dir = self.session_dir(session);
        if !dir.is_dir() {
            return Err(StorageError::UnknownSession {
                key: session.to_string(),
            });
        }

        let path = dir.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Self::io_error(&path, e))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes).map_err(|e| Self::io_error(&path, e))?;
        writer.flush().map_err(|e| Self::io_error(&path, e))?;

        Ok(match &self.public_base {
            Some(base) => ArtifactRef::new(format!("{base}/{session}/{name}")),
            None => ArtifactRef::new(path.display().to_string()),
        })
    }
}

/// Keeps artifacts in memory. Useful for tests and for embedding the engine.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    sessions: Mutex<HashMap<SessionKey, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: &SessionKey, name: &str) -> Option<Vec<u8>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(session).and_then(|files| files.get(name).cloned())
    }

    /// Names stored in `session`, sorted.
    pub fn names(&self, session: &SessionKey) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn open_session(&self, session: &SessionKey) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(session) {
            return Err(StorageError::Collision {
                key: session.to_string(),
            });
        }
        sessions.insert(session.clone(), BTreeMap::new());
        Ok(())
    }

    fn put(
        &self,
        session: &SessionKey,
        name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let files = sessions
            .get_mut(session)
            .ok_or_else(|| StorageError::UnknownSession {
                key: session.to_string(),
            })?;
        if files.contains_key(name) {
            return Err(StorageError::Io {
                path: PathBuf::from(session.as_str()).join(name),
                source: ErrorKind::AlreadyExists.into(),
            });
        }
        files.insert(name.to_string(), bytes.to_vec());
        Ok(ArtifactRef::new(format!("memory://{session}/{name}")))
    }
}

/// References to everything one comparison stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedArtifacts {
    pub diff: ArtifactRef,
    /// One per region, in the order the regions were given.
    pub regions: Vec<ArtifactRef>,
}

/// Encodes an RGB image as PNG bytes.
pub fn encode_png(name: &str, image: &RgbImage) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    let encoder = PngEncoder::new(&mut bytes);
    encoder
        .write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
        .map_err(|source| StorageError::Encode {
            name: name.to_string(),
            source,
        })?;
    Ok(bytes)
}

/// Opens `session` and persists the difference visualization and every region crop.
pub fn emit(
    store: &dyn ArtifactStore,
    session: &SessionKey,
    diff: &DifferenceMap,
    regions: &[ChangeRegion],
) -> Result<EmittedArtifacts, StorageError> {
    store.open_session(session)?;

    let diff_ref = store.put(
        session,
        DIFF_ARTIFACT,
        &encode_png(DIFF_ARTIFACT, &diff.to_visualization())?,
    )?;

    let mut region_refs = Vec::with_capacity(regions.len());
    for (index, region) in regions.iter().enumerate() {
        let name = region_artifact_name(index);
        let bytes = encode_png(&name, &region.snapshot)?;
        region_refs.push(store.put(session, &name, &bytes)?);
    }

    Ok(EmittedArtifacts {
        diff: diff_ref,
        regions: region_refs,
    })
}
