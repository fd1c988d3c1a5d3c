//! Storage layer for settings and on-disk accounting
//!
//! Settings live as a JSON file in the data directory (download records are
//! in SQLite). Downloaded tracks are laid out as
//! `<download dir>/<show>/<recording>/<track file>`.

use crate::error::ShowDownloadError;
use showdl_types::{GroupTag, Settings};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "downloads.db";

/// Storage manager for showdl data
#[derive(Clone, Debug)]
pub struct Storage {
    /// Data directory
    data_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(data_dir: PathBuf) -> Result<Self, ShowDownloadError> {
        fs::create_dir_all(&data_dir).await?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Location of the download record database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Load settings, falling back to defaults when none were saved yet
    pub async fn load_settings(&self) -> Result<Settings, ShowDownloadError> {
        let path = self.data_dir.join(SETTINGS_FILE);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                Ok(Settings::default())
            }
        }
    }

    /// Save settings to storage
    pub async fn save_settings(&self, settings: &Settings) -> Result<(), ShowDownloadError> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| ShowDownloadError::Serialization(e.to_string()))?;

        fs::write(self.data_dir.join(SETTINGS_FILE), content).await?;

        Ok(())
    }
}

// ============================================================================
// Download layout
// ============================================================================

/// Component written for an empty id; `%` never survives encoding on its own
const EMPTY_COMPONENT: &str = "%";

/// Make an id safe to use as a single path component
///
/// Ids are percent-encoded, so distinct ids always map to distinct
/// components and [`decode_component`] gives the id back. `.` and `..`
/// are encoded as well.
pub fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return EMPTY_COMPONENT.to_string();
    }
    if raw.chars().all(|ch| ch == '.') {
        return "%2E".repeat(raw.len());
    }
    urlencoding::encode(raw).into_owned()
}

/// The id a path component was encoded from, if it is one of ours
pub fn decode_component(component: &str) -> Option<String> {
    if component == EMPTY_COMPONENT {
        return Some(String::new());
    }
    urlencoding::decode(component).ok().map(|id| id.into_owned())
}

/// Directory holding every recording of a show
pub fn show_dir(download_dir: &Path, show_id: &str) -> PathBuf {
    download_dir.join(encode_component(show_id))
}

/// Directory holding the tracks of one group
pub fn recording_dir(download_dir: &Path, tag: &GroupTag) -> PathBuf {
    show_dir(download_dir, &tag.show_id).join(encode_component(&tag.recording_id))
}

/// Where a track of a group is written
pub fn track_destination(download_dir: &Path, tag: &GroupTag, track_name: &str) -> PathBuf {
    recording_dir(download_dir, tag).join(encode_component(track_name))
}

// ============================================================================
// Disk accounting
// ============================================================================

/// Size of a file on disk, 0 when it does not exist
pub async fn file_size(path: &Path) -> u64 {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

/// Total size of all files below `path`, 0 when it does not exist
pub async fn directory_size(path: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    let mut pending = vec![path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total = total.saturating_add(meta.len());
            }
        }
    }

    Ok(total)
}

/// Delete a file; a missing file counts as deleted
pub async fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Delete a directory tree; a missing directory counts as deleted
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
