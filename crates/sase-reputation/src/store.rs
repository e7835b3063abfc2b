//! Hash Database
//!
//! Versioned sets of hex digests, one per named block list, plus the
//! on-disk snapshot that is the only state shared between the updater and
//! the lookup side.
//!
//! Snapshots are replaced with write-temp-then-rename, so a reader always
//! sees either the old or the new file in full. Only one updater may write
//! a given snapshot at a time; scheduling has to guarantee that.

use crate::error::{ProtocolError, StoreError};
use crate::protocol::{ListUpdate, UpdateKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Major version a client announces before it ever received data
pub const INITIAL_MAJOR: u32 = 1;

/// Current snapshot encoding
const SNAPSHOT_FORMAT: u32 = 1;

/// Version of a list as assigned by the list server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListVersion {
    pub major: u32,
    pub minor: u32,
}

impl ListVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ListVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A named, versioned set of lowercase hex digests.
///
/// `version == None` means the list never received data; such a list
/// takes no part in matching whatever it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockList {
    name: String,
    version: Option<ListVersion>,
    hashes: HashSet<String>,
}

impl BlockList {
    /// Create an empty, unloaded list
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            hashes: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<ListVersion> {
        self.version
    }

    /// Whether the list participates in matching
    pub fn is_usable(&self) -> bool {
        self.version.is_some()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Version as announced to the list server, `major:minor`.
    /// An unloaded list announces `1:-1`, which asks for a full snapshot.
    pub fn request_version(&self) -> String {
        match self.version {
            Some(v) => format!("{}:{}", v.major, v.minor),
            None => format!("{}:-1", INITIAL_MAJOR),
        }
    }

    /// Human readable version for logs
    pub fn version_label(&self) -> String {
        match self.version {
            Some(v) => v.to_string(),
            None => "unloaded".to_string(),
        }
    }

    /// Membership test for a lowercase hex digest
    #[inline]
    pub fn contains(&self, digest_hex: &str) -> bool {
        self.version.is_some() && self.hashes.contains(digest_hex)
    }

    /// Replace the whole content
    pub fn apply_full_snapshot<I>(&mut self, version: ListVersion, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.hashes.clear();
        self.hashes
            .extend(entries.into_iter().map(|h| h.to_ascii_lowercase()));
        self.version = Some(version);
    }

    /// Patch the content: drop `removes` that are present, then insert `adds`
    pub fn apply_delta<A, R>(&mut self, version: ListVersion, adds: A, removes: R)
    where
        A: IntoIterator<Item = String>,
        R: IntoIterator<Item = String>,
    {
        for hash in removes {
            self.hashes.remove(&hash.to_ascii_lowercase());
        }
        self.hashes
            .extend(adds.into_iter().map(|h| h.to_ascii_lowercase()));
        self.version = Some(version);
    }

    /// Apply a parsed server update.
    ///
    /// Rejects updates for another list and updates older than the
    /// version held. A delta against an unloaded list is applied anyway.
    pub fn apply(&mut self, update: ListUpdate) -> Result<(), ProtocolError> {
        if update.name != self.name {
            return Err(ProtocolError::NameMismatch {
                expected: self.name.clone(),
                found: update.name,
            });
        }

        if let Some(current) = self.version {
            if update.version < current {
                return Err(ProtocolError::VersionRegression {
                    name: self.name.clone(),
                    current: current.to_string(),
                    offered: update.version.to_string(),
                });
            }
        }

        match update.kind {
            UpdateKind::Full => {
                if !update.removes.is_empty() {
                    debug!(
                        "Ignoring {} removals in full snapshot of {}",
                        update.removes.len(),
                        self.name
                    );
                }
                self.apply_full_snapshot(update.version, update.adds);
            }
            UpdateKind::Delta => {
                if self.version.is_none() {
                    warn!("Delta for {} received without a base version", self.name);
                }
                self.apply_delta(update.version, update.adds, update.removes);
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format: u32,
    name: &'a str,
    version: Option<ListVersion>,
    hashes: Vec<&'a str>,
}

#[derive(Deserialize)]
struct SnapshotIn {
    format: u32,
    #[serde(default)]
    name: Option<String>,
    version: Option<ListVersion>,
    hashes: HashSet<String>,
}

/// Read the snapshot at `path` for list `name`.
///
/// A missing file is not an error: it means no data was synced yet.
pub fn load(path: &Path, name: &str) -> Result<Option<BlockList>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let snapshot: SnapshotIn =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;

    if snapshot.format > SNAPSHOT_FORMAT {
        return Err(StoreError::UnsupportedFormat(snapshot.format));
    }

    if let Some(found) = snapshot.name {
        if found != name {
            return Err(StoreError::NameMismatch {
                path: path.to_path_buf(),
                expected: name.to_string(),
                found,
            });
        }
    }

    Ok(Some(BlockList {
        name: name.to_string(),
        version: snapshot.version,
        hashes: snapshot.hashes,
    }))
}

/// Atomically replace the snapshot at `path` with `list`
pub fn save(path: &Path, list: &BlockList) -> Result<(), StoreError> {
    let tmp = temp_path(path);

    let result = write_snapshot(&tmp, list).and_then(|()| {
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    });

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_snapshot(tmp: &Path, list: &BlockList) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: tmp.to_path_buf(),
        source,
    };

    let mut hashes: Vec<&str> = list.hashes.iter().map(String::as_str).collect();
    hashes.sort_unstable();
    let snapshot = SnapshotOut {
        format: SNAPSHOT_FORMAT,
        name: &list.name,
        version: list.version,
        hashes,
    };

    let mut writer = BufWriter::new(File::create(tmp).map_err(io_err)?);
    serde_json::to_writer(&mut writer, &snapshot).map_err(|source| StoreError::Encoding {
        path: tmp.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    let file = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.sync_all().map_err(io_err)
}

/// Sibling temp file, same directory so the rename stays on one filesystem
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Modification time of the snapshot, if it exists
pub fn snapshot_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether the snapshot changed since it was last loaded
pub fn is_stale(path: &Path, last_loaded: Option<SystemTime>) -> bool {
    match (snapshot_mtime(path), last_loaded) {
        (Some(current), Some(seen)) => current > seen,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// A block list bound to its snapshot file, reloaded when the file changes
#[derive(Debug)]
pub struct WatchedList {
    list: BlockList,
    path: PathBuf,
    loaded_mtime: Option<SystemTime>,
}

impl WatchedList {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            list: BlockList::new(name),
            path: path.into(),
            loaded_mtime: None,
        }
    }

    pub fn list(&self) -> &BlockList {
        &self.list
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_stale(&self) -> bool {
        is_stale(&self.path, self.loaded_mtime)
    }

    /// Reload from disk if the snapshot changed.
    ///
    /// Returns whether a reload happened. On error the previous content
    /// stays in place.
    pub fn refresh(&mut self) -> Result<bool, StoreError> {
        let Some(mtime) = snapshot_mtime(&self.path) else {
            debug!("{} doesn't exist", self.path.display());
            return Ok(false);
        };
        if self.loaded_mtime.is_some_and(|seen| mtime <= seen) {
            return Ok(false);
        }

        debug!("Going to read {}", self.path.display());
        match load(&self.path, self.list.name())? {
            Some(list) => {
                info!(
                    "Loaded {} version {} ({} hashes)",
                    list.name(),
                    list.version_label(),
                    list.len()
                );
                self.list = list;
                self.loaded_mtime = Some(mtime);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
