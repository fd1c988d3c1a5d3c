//! Shared fakes for the show download tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use showdl_core::{
    DownloadRecordDatabase, EngineError, ProgressMap, RecordStore, RecordingResolver,
    ShowDownloadError, ShowDownloadManager,
};
use showdl_types::{
    DownloadRecord, EntryId, Recording, Settings, ShowDownloadProgress, ShowEvent, Track,
    TrackTransferEntry, TransferEvent, TransferRequest, TransferStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const MB: u64 = 1024 * 1024;
pub const SHOW: &str = "gd77-05-08";
pub const OTHER_SHOW: &str = "gd77-05-09";
pub const EMPTY_SHOW: &str = "gd77-05-10";
pub const SBD: &str = "gd77-05-08.sbd.hicks";
pub const AUD: &str = "gd77-05-08.aud.miller";
pub const OTHER_SBD: &str = "gd77-05-09.sbd.hicks";

const WAIT: Duration = Duration::from_secs(5);

/// In-memory transfer engine that only moves when a test tells it to
pub struct FakeEngine {
    entries: Mutex<Vec<TrackTransferEntry>>,
    events: broadcast::Sender<TransferEvent>,
    failing_removals: Mutex<HashSet<String>>,
    rejecting_enqueues: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            events,
            failing_removals: Mutex::new(HashSet::new()),
            rejecting_enqueues: AtomicBool::new(false),
        })
    }

    /// Entries whose destination lies below a show directory, in enqueue order
    pub fn entries_for(&self, show_id: &str) -> Vec<TrackTransferEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.destination.iter().any(|part| part == show_id))
            .cloned()
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Report a status change for an entry, as a real engine would
    ///
    /// Completing an entry writes `downloaded` bytes to its destination.
    pub fn report(&self, id: EntryId, status: TransferStatus, downloaded: u64, total: Option<u64>) {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .expect("unknown entry");

        entry.status = status;
        entry.bytes_downloaded = downloaded;
        entry.bytes_total = total;
        entry.error = (status == TransferStatus::Failed).then(|| "connection reset".to_string());

        if status == TransferStatus::Completed {
            std::fs::create_dir_all(entry.destination.parent().unwrap()).unwrap();
            std::fs::write(&entry.destination, vec![0u8; downloaded as usize]).unwrap();
        }

        let _ = self.events.send(TransferEvent::Changed {
            entry: entry.clone(),
        });
    }

    /// Complete every entry of a show with the given file size
    pub fn complete_show(&self, show_id: &str, size: u64) {
        for entry in self.entries_for(show_id) {
            self.report(entry.id, TransferStatus::Completed, size, Some(size));
        }
    }

    /// Replay an update for an entry the engine no longer holds
    pub fn send_stale(&self, mut entry: TrackTransferEntry, status: TransferStatus) {
        entry.status = status;
        let _ = self.events.send(TransferEvent::Changed { entry });
    }

    /// Make removals of entries below `show_id` fail with a backend error
    pub fn fail_removals_for(&self, show_id: &str) {
        self.failing_removals.lock().insert(show_id.to_string());
    }

    /// Make every enqueue fail as if the engine were down
    pub fn reject_enqueues(&self, reject: bool) {
        self.rejecting_enqueues.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl showdl_core::TransferEngine for FakeEngine {
    async fn enqueue(&self, request: TransferRequest) -> Result<EntryId, EngineError> {
        if self.rejecting_enqueues.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("engine is shutting down".to_string()));
        }

        let entry = TrackTransferEntry {
            id: Uuid::new_v4(),
            tag: request.tag,
            uri: request.uri,
            destination: request.destination,
            status: TransferStatus::Queued,
            bytes_downloaded: 0,
            bytes_total: None,
            size_hint: request.size_hint,
            error: None,
            created_at: Utc::now(),
        };
        let id = entry.id;

        let mut entries = self.entries.lock();
        entries.push(entry.clone());
        let _ = self.events.send(TransferEvent::Changed { entry });

        Ok(id)
    }

    async fn pause(&self, id: EntryId) -> Result<(), EngineError> {
        self.set_status(id, TransferStatus::Paused)
    }

    async fn resume(&self, id: EntryId) -> Result<(), EngineError> {
        self.set_status(id, TransferStatus::Queued)
    }

    async fn remove(&self, id: EntryId) -> Result<(), EngineError> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(EngineError::EntryNotFound(id))?;

        let failing = self.failing_removals.lock();
        if entries[index]
            .destination
            .iter()
            .any(|part| failing.iter().any(|show| part == show.as_str()))
        {
            return Err(EngineError::Backend("disk is read-only".to_string()));
        }

        let entry = entries.remove(index);
        let _ = self.events.send(TransferEvent::Removed {
            id,
            tag: entry.tag,
        });

        Ok(())
    }

    async fn entries(&self) -> Result<Vec<TrackTransferEntry>, EngineError> {
        Ok(self.entries.lock().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }
}

impl FakeEngine {
    fn set_status(&self, id: EntryId, status: TransferStatus) -> Result<(), EngineError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(EngineError::EntryNotFound(id))?;

        entry.status = status;
        let _ = self.events.send(TransferEvent::Changed {
            entry: entry.clone(),
        });

        Ok(())
    }
}

/// Catalog with a fixed set of recordings; the first one is the best
pub struct FakeResolver {
    recordings: HashMap<String, Vec<Recording>>,
}

impl FakeResolver {
    pub fn catalog() -> Arc<Self> {
        let mut recordings = HashMap::new();
        recordings.insert(
            SHOW.to_string(),
            vec![recording(SBD, &[4 * MB, 6 * MB]), recording(AUD, &[MB, MB, MB])],
        );
        recordings.insert(OTHER_SHOW.to_string(), vec![recording(OTHER_SBD, &[MB, MB])]);
        recordings.insert(EMPTY_SHOW.to_string(), Vec::new());

        Arc::new(Self { recordings })
    }
}

#[async_trait]
impl RecordingResolver for FakeResolver {
    async fn resolve(
        &self,
        show_id: &str,
        recording_id: Option<&str>,
    ) -> Result<Recording, ShowDownloadError> {
        let candidates = self
            .recordings
            .get(show_id)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| ShowDownloadError::NoRecordingAvailable(show_id.to_string()))?;

        match recording_id {
            Some(id) => candidates
                .iter()
                .find(|r| r.identifier == id)
                .cloned()
                .ok_or_else(|| ShowDownloadError::Resolver(format!("unknown recording {}", id))),
            None => Ok(candidates[0].clone()),
        }
    }
}

pub fn recording(identifier: &str, sizes: &[u64]) -> Recording {
    let tracks = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            let name = format!("d1t{:02}.mp3", i + 1);
            Track {
                uri: format!("https://archive.example/download/{}/{}", identifier, name),
                title: format!("Track {}", i + 1),
                track_number: i as u32 + 1,
                duration: Some(300.0),
                format: "VBR MP3".to_string(),
                size: Some(*size),
                name,
            }
        })
        .collect();

    Recording {
        identifier: identifier.to_string(),
        format: "VBR MP3".to_string(),
        tracks,
    }
}

/// Record store whose first `failures` writes fail, then behaves
pub struct FlakyRecords {
    inner: DownloadRecordDatabase,
    failures: AtomicUsize,
}

impl FlakyRecords {
    pub async fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: DownloadRecordDatabase::new_in_memory().await.unwrap(),
            failures: AtomicUsize::new(failures),
        })
    }

    pub fn failures_left(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FlakyRecords {
    async fn get(&self, show_id: &str) -> Result<Option<DownloadRecord>, ShowDownloadError> {
        self.inner.get(show_id).await
    }

    async fn upsert(&self, record: &DownloadRecord) -> Result<(), ShowDownloadError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ShowDownloadError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "database is locked",
            )));
        }
        self.inner.upsert(record).await
    }

    async fn clear(&self, show_id: &str) -> Result<(), ShowDownloadError> {
        self.inner.clear(show_id).await
    }

    async fn list_downloaded(&self) -> Result<Vec<DownloadRecord>, ShowDownloadError> {
        self.inner.list_downloaded().await
    }
}

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub records: Arc<DownloadRecordDatabase>,
    pub manager: ShowDownloadManager,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = FakeEngine::new();
        let records = Arc::new(DownloadRecordDatabase::new(dir.path().join("downloads.db")).await.unwrap());
        let manager = build_manager(&engine, &records, &dir).await;

        Self {
            engine,
            records,
            manager,
            dir,
        }
    }

    pub fn download_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("shows")
    }

    pub async fn recorded(&self, show_id: &str) -> Option<String> {
        self.records.downloaded_recording(show_id).await.unwrap()
    }
}

pub async fn build_manager(
    engine: &Arc<FakeEngine>,
    records: &Arc<DownloadRecordDatabase>,
    dir: &TempDir,
) -> ShowDownloadManager {
    let settings = Settings {
        default_download_path: dir.path().join("shows"),
        event_buffer: 64,
    };

    ShowDownloadManager::new(
        Arc::clone(engine) as Arc<dyn showdl_core::TransferEngine>,
        FakeResolver::catalog(),
        Arc::clone(records) as Arc<dyn RecordStore>,
        settings,
    )
    .await
    .unwrap()
}

/// Wait until the live progress of a show satisfies `pred`
pub async fn wait_for_progress<F>(
    manager: &ShowDownloadManager,
    show_id: &str,
    mut pred: F,
) -> ShowDownloadProgress
where
    F: FnMut(&ShowDownloadProgress) -> bool,
{
    let mut rx = manager.subscribe_progress();
    let current = |map: &ProgressMap| {
        map.get(show_id)
            .cloned()
            .unwrap_or_else(|| ShowDownloadProgress::not_downloaded(show_id))
    };

    let map = tokio::time::timeout(WAIT, rx.wait_for(|map| pred(&current(map))))
        .await
        .expect("timed out waiting for progress")
        .expect("progress channel closed");

    current(&map)
}

/// Wait for the next event matching `pred`
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<ShowEvent>, pred: F) -> ShowEvent
where
    F: Fn(&ShowEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Complete a show's group and wait until its record is written
pub async fn complete_and_record(harness: &Harness, show_id: &str, size: u64) {
    let mut events = harness.manager.subscribe();
    harness.engine.complete_show(show_id, size);
    wait_for_event(&mut events, |event| {
        matches!(event, ShowEvent::DownloadCompleted { show_id: id, .. } if id == show_id)
    })
    .await;
}
