//! Shared types for showdl
//!
//! This crate contains the data structures shared between the show
//! download core and the CLI: catalog facts, transfer entries reported by
//! the track transfer engine, derived per-show progress and the durable
//! download record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Catalog Types
// ============================================================================

/// One catalogued concert event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub venue: Option<String>,
    pub location: Option<String>,
    /// Every recording known for this show
    #[serde(default)]
    pub recording_ids: Vec<String>,
    /// The recommended recording, if the catalog has an opinion
    pub best_recording_id: Option<String>,
}

/// One specific taping/transfer of a show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub identifier: String,
    pub format: String,
    /// Tracks in play order
    pub tracks: Vec<Track>,
}

impl Recording {
    /// Sum of the track size estimates, `None` if any track has no estimate
    pub fn total_size(&self) -> Option<u64> {
        self.tracks.iter().map(|t| t.size).sum()
    }
}

/// A single track of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// File name in the archive (e.g. "gd77-05-08d1t01.mp3")
    pub name: String,
    pub title: String,
    pub track_number: u32,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub format: String,
    /// Size estimate in bytes as reported by the catalog
    pub size: Option<u64>,
    /// Content URI handed to the transfer engine
    pub uri: String,
}

// ============================================================================
// Transfer Types
// ============================================================================

/// Identifier the transfer engine assigns to one queued file
pub type EntryId = Uuid;

/// The (show, recording) pair a group of track transfers belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupTag {
    pub show_id: String,
    pub recording_id: String,
}

impl GroupTag {
    pub fn new(show_id: impl Into<String>, recording_id: impl Into<String>) -> Self {
        Self {
            show_id: show_id.into(),
            recording_id: recording_id.into(),
        }
    }
}

impl fmt::Display for GroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.show_id, self.recording_id)
    }
}

/// Status of a single track transfer, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// One queued file owned by the transfer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTransferEntry {
    pub id: EntryId,
    /// Opaque group metadata attached at enqueue time
    pub tag: String,
    pub uri: String,
    pub destination: PathBuf,
    pub status: TransferStatus,
    pub bytes_downloaded: u64,
    /// Total reported by the server once the transfer has started
    pub bytes_total: Option<u64>,
    /// Size estimate given at enqueue time
    pub size_hint: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackTransferEntry {
    /// Best known size of the file, `None` when neither the engine nor the
    /// catalog reported one
    pub fn expected_size(&self) -> Option<u64> {
        self.bytes_total.or(self.size_hint).filter(|size| *size > 0)
    }

    /// Rebuild the request that produced this entry
    pub fn to_request(&self) -> TransferRequest {
        TransferRequest {
            uri: self.uri.clone(),
            tag: self.tag.clone(),
            size_hint: self.size_hint,
            destination: self.destination.clone(),
        }
    }
}

/// A request to queue one file with the transfer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub uri: String,
    pub tag: String,
    pub size_hint: Option<u64>,
    pub destination: PathBuf,
}

/// Change notifications emitted by the transfer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    /// Full current state of an entry (new, progressed or status change)
    Changed { entry: TrackTransferEntry },
    /// The engine confirmed removal of an entry
    Removed { id: EntryId, tag: String },
}

// ============================================================================
// Show Progress Types
// ============================================================================

/// Aggregated status of one show's download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowDownloadStatus {
    #[default]
    NotDownloaded,
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
}

/// Show-level view of a group of track transfers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowDownloadProgress {
    pub show_id: String,
    pub recording_id: Option<String>,
    pub status: ShowDownloadStatus,
    pub tracks_completed: u32,
    pub tracks_failed: u32,
    pub tracks_total: u32,
    /// Fraction in [0, 1]
    pub overall_progress: f64,
    pub bytes_downloaded: u64,
    /// `None` when the size of at least one track is unknown
    pub bytes_total: Option<u64>,
}

impl ShowDownloadProgress {
    pub fn not_downloaded(show_id: impl Into<String>) -> Self {
        Self {
            show_id: show_id.into(),
            recording_id: None,
            status: ShowDownloadStatus::NotDownloaded,
            tracks_completed: 0,
            tracks_failed: 0,
            tracks_total: 0,
            overall_progress: 0.0,
            bytes_downloaded: 0,
            bytes_total: None,
        }
    }
}

// ============================================================================
// Persisted Record Types
// ============================================================================

/// Durable answer to "is this show downloaded, and with which recording"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub show_id: String,
    pub downloaded_recording_id: Option<String>,
    pub downloaded_format: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    pub fn new(
        show_id: impl Into<String>,
        recording_id: impl Into<String>,
        format: Option<String>,
    ) -> Self {
        Self {
            show_id: show_id.into(),
            downloaded_recording_id: Some(recording_id.into()),
            downloaded_format: format,
            updated_at: Utc::now(),
        }
    }
}

/// Result of a bulk removal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovalReport {
    pub removed: Vec<String>,
    pub failed: Vec<RemovalFailure>,
}

impl RemovalReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A show that could not be cleaned up during a bulk removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalFailure {
    pub show_id: String,
    pub error: String,
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the show download manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ShowEvent {
    DownloadQueued {
        show_id: String,
        recording_id: String,
        tracks: u32,
    },
    RecordingSwitched {
        show_id: String,
        from: String,
        to: String,
    },
    DownloadCompleted {
        show_id: String,
        recording_id: String,
    },
    DownloadCancelled {
        show_id: String,
        recording_id: String,
    },
    DownloadRemoved {
        show_id: String,
    },
    TracksRetried {
        show_id: String,
        count: u32,
    },
    Error {
        message: String,
        context: Option<String>,
    },
}

// ============================================================================
// Settings Types
// ============================================================================

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory downloaded shows are written under
    pub default_download_path: PathBuf,
    /// Capacity of the show event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_download_path: dirs::download_dir()
                .map(|p| p.join("showdl"))
                .unwrap_or_else(|| PathBuf::from("showdl")),
            event_buffer: default_event_buffer(),
        }
    }
}
