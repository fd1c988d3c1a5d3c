//! showdl Core - Show Download Manager
//!
//! Turns "download this show" into a group of track transfers on an
//! external transfer engine and folds their progress back into a single
//! status per show. Pause, resume, cancel and removal act on the whole
//! group; switching a downloaded show to another recording needs an
//! explicit confirmation.

mod aggregator;
mod engine;
mod error;
mod locks;
mod records;
mod resolver;
mod storage;
pub mod tagger;

pub use aggregator::*;
pub use engine::*;
pub use error::*;
pub use locks::*;
pub use records::*;
pub use resolver::*;
pub use storage::*;

use futures::future::join_all;
use parking_lot::Mutex;
use showdl_types::{
    DownloadRecord, EntryId, GroupTag, Recording, RemovalFailure, RemovalReport, Settings,
    ShowDownloadProgress, ShowDownloadStatus, ShowEvent, TrackTransferEntry, TransferRequest,
    TransferStatus,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type GroupMap = BTreeMap<GroupTag, Vec<TrackTransferEntry>>;

/// Backoff bounds for re-trying a record write that failed
const RECORD_RETRY_MIN: Duration = Duration::from_millis(200);
const RECORD_RETRY_MAX: Duration = Duration::from_secs(30);

/// The show download manager
pub struct ShowDownloadManager {
    engine: Arc<dyn TransferEngine>,
    resolver: Arc<dyn RecordingResolver>,
    records: Arc<dyn RecordStore>,
    aggregator: Arc<StatusAggregator>,
    /// Application settings
    settings: Arc<RwLock<Settings>>,
    /// Settings persistence, absent for managers built from parts
    storage: Option<Storage>,
    show_locks: Arc<ShowLocks>,
    /// Format of groups queued in this session, written into the record
    formats: Arc<Mutex<HashMap<GroupTag, String>>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<ShowEvent>,
    shutdown: CancellationToken,
}

impl ShowDownloadManager {
    /// Create a manager over an engine, a resolver and a record store
    ///
    /// Progress is seeded from the engine's persisted entries before this
    /// returns, so shows still in flight after a restart report their
    /// status immediately.
    pub async fn new(
        engine: Arc<dyn TransferEngine>,
        resolver: Arc<dyn RecordingResolver>,
        records: Arc<dyn RecordStore>,
        settings: Settings,
    ) -> Result<Self, ShowDownloadError> {
        Self::build(engine, resolver, records, settings, None).await
    }

    /// Open the manager over a data directory holding settings and records
    pub async fn open(
        data_dir: PathBuf,
        engine: Arc<dyn TransferEngine>,
        resolver: Arc<dyn RecordingResolver>,
    ) -> Result<Self, ShowDownloadError> {
        let storage = Storage::new(data_dir).await?;
        let settings = storage.load_settings().await?;
        let records = DownloadRecordDatabase::new(storage.database_path()).await?;

        Self::build(engine, resolver, Arc::new(records), settings, Some(storage)).await
    }

    async fn build(
        engine: Arc<dyn TransferEngine>,
        resolver: Arc<dyn RecordingResolver>,
        records: Arc<dyn RecordStore>,
        settings: Settings,
        storage: Option<Storage>,
    ) -> Result<Self, ShowDownloadError> {
        let (event_tx, _) = broadcast::channel(settings.event_buffer.max(1));
        let aggregator = Arc::new(StatusAggregator::new());
        let shutdown = CancellationToken::new();

        // Subscribe before listing so no change falls between the two
        let events = engine.subscribe();
        let entries = engine.entries().await?;
        info!("Restoring {} track transfers from the transfer engine", entries.len());
        aggregator.reset(entries);
        aggregator.spawn(Arc::clone(&engine), events, shutdown.clone());

        let manager = Self {
            engine,
            resolver,
            records,
            aggregator,
            settings: Arc::new(RwLock::new(settings)),
            storage,
            show_locks: Arc::new(ShowLocks::new()),
            formats: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            shutdown,
        };
        manager.spawn_completion_recorder();

        Ok(manager)
    }

    /// Stop the background tasks of this manager and all its clones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Subscribe to show events
    pub fn subscribe(&self) -> broadcast::Receiver<ShowEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event
    pub(crate) fn emit(&self, event: ShowEvent) {
        let _ = self.event_tx.send(event);
    }

    // ========================================================================
    // Show Operations
    // ========================================================================

    /// Start downloading a show
    ///
    /// Without an explicit recording the previously downloaded or in-flight
    /// recording is used, else the resolver picks one. Asking for another
    /// recording than the one the show already has fails with
    /// [`ShowDownloadError::RecordingConflict`] and changes nothing. Asking
    /// again for the same recording resumes paused tracks and retries
    /// failed ones instead of queueing duplicates.
    pub async fn download_show(
        &self,
        show_id: &str,
        recording_id: Option<&str>,
    ) -> Result<GroupTag, ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;
        self.download_show_locked(show_id, recording_id).await
    }

    async fn download_show_locked(
        &self,
        show_id: &str,
        recording_id: Option<&str>,
    ) -> Result<GroupTag, ShowDownloadError> {
        let recorded = self.records.downloaded_recording(show_id).await?;
        let mut groups = self.show_groups(show_id).await?;

        let requested = recording_id
            .map(str::to_string)
            .or_else(|| recorded.clone())
            .or_else(|| newest_group(&groups).map(|tag| tag.recording_id.clone()));

        if let Some(requested) = &requested {
            check_conflict(show_id, recorded.as_deref(), &groups, requested)?;

            let tag = tagger::tag_for(show_id, requested);
            if let Some(entries) = groups.remove(&tag) {
                self.revive_group(&tag, &entries).await?;
                return Ok(tag);
            }
        }

        let recording = self.resolver.resolve(show_id, requested.as_deref()).await?;
        if requested.as_deref() != Some(recording.identifier.as_str()) {
            check_conflict(show_id, recorded.as_deref(), &groups, &recording.identifier)?;
        }

        let tag = tagger::tag_for(show_id, &recording.identifier);
        self.enqueue_recording(&tag, &recording).await?;

        Ok(tag)
    }

    /// Replace whatever recording a show has with `recording_id`
    ///
    /// The target recording is resolved first; when it can't be resolved or
    /// has no tracks nothing is touched. Otherwise entries and files of
    /// other recordings are removed and the record is cleared before the
    /// new group is queued, all under the show's lock.
    pub async fn confirm_recording_switch(
        &self,
        show_id: &str,
        recording_id: &str,
    ) -> Result<GroupTag, ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;

        let recording = self.resolver.resolve(show_id, Some(recording_id)).await?;
        if recording.tracks.is_empty() {
            return Err(ShowDownloadError::NoRecordingAvailable(show_id.to_string()));
        }
        let target = recording.identifier.as_str();

        let recorded = self.records.downloaded_recording(show_id).await?;
        let mut groups = self.show_groups(show_id).await?;
        let mut previous = None;

        for (tag, entries) in &groups {
            if tag.recording_id != target {
                self.discard_group(tag, entries).await?;
                previous = Some(tag.recording_id.clone());
            }
        }

        if let Some(old) = recorded.filter(|old| old != target) {
            let tag = tagger::tag_for(show_id, &old);
            let dir = recording_dir(&self.download_dir().await, &tag);
            remove_dir_if_exists(&dir)
                .await
                .map_err(|source| storage_error(show_id, source))?;
            self.records.clear(show_id).await?;
            previous = Some(old);
        }

        let tag = tagger::tag_for(show_id, target);
        match groups.remove(&tag) {
            Some(entries) => self.revive_group(&tag, &entries).await?,
            None => self.enqueue_recording(&tag, &recording).await?,
        }

        if let Some(from) = previous {
            info!("Switched show {} from recording {} to {}", show_id, from, target);
            self.emit(ShowEvent::RecordingSwitched {
                show_id: show_id.to_string(),
                from,
                to: target.to_string(),
            });
        }

        Ok(tag)
    }

    /// Pause every queued or running track of the show's current group
    pub async fn pause_show_downloads(&self, show_id: &str) -> Result<(), ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;

        let Some((tag, entries)) = self.current_group(show_id).await? else {
            debug!("Nothing to pause for show {}", show_id);
            return Ok(());
        };

        let mut paused = 0;
        for entry in entries
            .iter()
            .filter(|e| matches!(e.status, TransferStatus::Queued | TransferStatus::Downloading))
        {
            if ignore_missing(self.engine.pause(entry.id).await)? {
                paused += 1;
            }
        }

        info!("Paused {} tracks of {}", paused, tag);
        Ok(())
    }

    /// Resume every paused track of the show's current group
    pub async fn resume_show_downloads(&self, show_id: &str) -> Result<(), ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;

        let Some((tag, entries)) = self.current_group(show_id).await? else {
            debug!("Nothing to resume for show {}", show_id);
            return Ok(());
        };

        let resumed = self.resume_paused(&entries).await?;
        info!("Resumed {} tracks of {}", resumed, tag);
        Ok(())
    }

    /// Stop the show's current group and drop its entries and files
    ///
    /// The download record is only cleared when it names the cancelled
    /// recording.
    pub async fn cancel_show_downloads(&self, show_id: &str) -> Result<(), ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;

        let Some((tag, entries)) = self.current_group(show_id).await? else {
            debug!("Nothing to cancel for show {}", show_id);
            return Ok(());
        };

        self.discard_group(&tag, &entries).await?;

        if self.records.downloaded_recording(show_id).await?.as_deref()
            == Some(tag.recording_id.as_str())
        {
            self.records.clear(show_id).await?;
        }
        self.formats.lock().remove(&tag);

        info!("Cancelled download of {}", tag);
        self.emit(ShowEvent::DownloadCancelled {
            show_id: tag.show_id,
            recording_id: tag.recording_id,
        });

        Ok(())
    }

    /// Remove everything a show has on disk and in the engine
    ///
    /// Safe to call repeatedly. When files cannot be deleted the record is
    /// left in place so the removal can be retried.
    pub async fn remove_show_downloads(&self, show_id: &str) -> Result<(), ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;

        let groups = self.show_groups(show_id).await?;
        for (tag, entries) in &groups {
            self.discard_group(tag, entries).await?;
        }

        // Files can outlive engine entries, e.g. after the engine queue was wiped
        let dir = show_dir(&self.download_dir().await, show_id);
        remove_dir_if_exists(&dir)
            .await
            .map_err(|source| storage_error(show_id, source))?;

        self.records.clear(show_id).await?;
        self.formats.lock().retain(|tag, _| tag.show_id != show_id);

        info!("Removed downloads of show {}", show_id);
        self.emit(ShowEvent::DownloadRemoved {
            show_id: show_id.to_string(),
        });

        Ok(())
    }

    /// Remove the downloads of every show, reporting per-show failures
    pub async fn remove_all_downloads(&self) -> Result<RemovalReport, ShowDownloadError> {
        let mut show_ids: BTreeSet<String> = self
            .records
            .list_downloaded()
            .await?
            .into_iter()
            .map(|record| record.show_id)
            .collect();

        for entry in self.engine.entries().await? {
            if let Some(tag) = tagger::decode(&entry.tag) {
                show_ids.insert(tag.show_id);
            }
        }

        let results = join_all(show_ids.into_iter().map(|show_id| async move {
            let result = self.remove_show_downloads(&show_id).await;
            (show_id, result)
        }))
        .await;

        let mut report = RemovalReport::default();
        for (show_id, result) in results {
            match result {
                Ok(()) => report.removed.push(show_id),
                Err(e) => {
                    warn!("Failed to remove downloads of show {}: {}", show_id, e);
                    report.failed.push(RemovalFailure {
                        show_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Removed {} shows, {} failed",
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Re-queue the failed tracks of the show's current group
    ///
    /// Completed tracks are kept. Returns how many tracks were re-queued.
    pub async fn retry_failed_tracks(&self, show_id: &str) -> Result<u32, ShowDownloadError> {
        let _guard = self.show_locks.lock(show_id).await;

        let Some((tag, entries)) = self.current_group(show_id).await? else {
            return Ok(0);
        };

        let count = self.requeue_failed(&entries).await?;
        if count > 0 {
            info!("Retrying {} failed tracks of {}", count, tag);
            self.emit(ShowEvent::TracksRetried {
                show_id: show_id.to_string(),
                count,
            });
        }

        Ok(count)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current progress of a show
    pub fn progress(&self, show_id: &str) -> ShowDownloadProgress {
        self.aggregator.progress(show_id)
    }

    /// Progress of every show with entries in the engine
    pub fn progress_snapshot(&self) -> ProgressMap {
        self.aggregator.snapshot()
    }

    /// Subscribe to the live `show_id -> progress` map
    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressMap> {
        self.aggregator.subscribe()
    }

    /// Records of every show with a downloaded recording
    pub async fn downloaded_shows(&self) -> Result<Vec<DownloadRecord>, ShowDownloadError> {
        self.records.list_downloaded().await
    }

    /// The recording a show has, downloaded or still in flight
    pub async fn get_recording_id_for_show(
        &self,
        show_id: &str,
    ) -> Result<Option<String>, ShowDownloadError> {
        if let Some(recording_id) = self.records.downloaded_recording(show_id).await? {
            return Ok(Some(recording_id));
        }

        let groups = self.show_groups(show_id).await?;
        Ok(newest_group(&groups).map(|tag| tag.recording_id.clone()))
    }

    /// Bytes on disk for every completed track this manager queued
    pub async fn get_total_storage_used(&self) -> Result<u64, ShowDownloadError> {
        let entries: Vec<_> = self
            .engine
            .entries()
            .await?
            .into_iter()
            .filter(|entry| tagger::decode(&entry.tag).is_some())
            .collect();

        Ok(completed_size(&entries).await)
    }

    /// Bytes on disk for the completed tracks of a show's current group
    pub async fn get_show_storage_used(&self, show_id: &str) -> Result<u64, ShowDownloadError> {
        match self.current_group(show_id).await? {
            Some((_, entries)) => Ok(completed_size(&entries).await),
            None => Ok(0),
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Get current settings
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Update settings; new downloads use the new download path
    pub async fn update_settings(&self, settings: Settings) -> Result<(), ShowDownloadError> {
        if let Some(storage) = &self.storage {
            storage.save_settings(&settings).await?;
        }
        *self.settings.write().await = settings;
        Ok(())
    }

    async fn download_dir(&self) -> PathBuf {
        self.settings.read().await.default_download_path.clone()
    }

    // ========================================================================
    // Group helpers
    // ========================================================================

    /// Engine entries of a show, grouped by tag
    async fn show_groups(&self, show_id: &str) -> Result<GroupMap, ShowDownloadError> {
        let mut groups = GroupMap::new();

        for entry in self.engine.entries().await? {
            let Some(tag) = tagger::decode(&entry.tag) else {
                continue;
            };
            if tag.show_id == show_id {
                groups.entry(tag).or_default().push(entry);
            }
        }

        Ok(groups)
    }

    async fn group_entries(
        &self,
        tag: &GroupTag,
    ) -> Result<Vec<TrackTransferEntry>, ShowDownloadError> {
        Ok(self
            .show_groups(&tag.show_id)
            .await?
            .remove(tag)
            .unwrap_or_default())
    }

    /// The group operations act on: the recorded recording's group when it
    /// has entries, else the most recently created one
    async fn current_group(
        &self,
        show_id: &str,
    ) -> Result<Option<(GroupTag, Vec<TrackTransferEntry>)>, ShowDownloadError> {
        let mut groups = self.show_groups(show_id).await?;

        if let Some(recording_id) = self.records.downloaded_recording(show_id).await? {
            let tag = tagger::tag_for(show_id, &recording_id);
            if let Some(entries) = groups.remove(&tag) {
                return Ok(Some((tag, entries)));
            }
        }

        let Some(tag) = newest_group(&groups).cloned() else {
            return Ok(None);
        };
        let entries = groups.remove(&tag).unwrap_or_default();

        Ok(Some((tag, entries)))
    }

    async fn enqueue_recording(
        &self,
        tag: &GroupTag,
        recording: &Recording,
    ) -> Result<(), ShowDownloadError> {
        if recording.tracks.is_empty() {
            return Err(ShowDownloadError::NoRecordingAvailable(tag.show_id.clone()));
        }

        let download_dir = self.download_dir().await;
        tokio::fs::create_dir_all(recording_dir(&download_dir, tag))
            .await
            .map_err(|source| storage_error(&tag.show_id, source))?;

        self.formats
            .lock()
            .insert(tag.clone(), recording.format.clone());

        let encoded = tagger::encode(tag);
        let mut enqueued: Vec<EntryId> = Vec::with_capacity(recording.tracks.len());

        for track in &recording.tracks {
            let request = TransferRequest {
                uri: track.uri.clone(),
                tag: encoded.clone(),
                size_hint: track.size,
                destination: track_destination(&download_dir, tag, &track.name),
            };

            match self.engine.enqueue(request).await {
                Ok(id) => enqueued.push(id),
                Err(e) => {
                    warn!("Failed to queue {} of {}: {}", track.name, tag, e);
                    // Leave no partial group behind
                    for id in enqueued {
                        if let Err(e) = ignore_missing(self.engine.remove(id).await) {
                            warn!("Failed to roll back entry {}: {}", id, e);
                        }
                    }
                    self.formats.lock().remove(tag);
                    return Err(e.into());
                }
            }
        }

        match recording.total_size() {
            Some(bytes) => info!("Queued {} tracks of {} ({} bytes)", enqueued.len(), tag, bytes),
            None => info!("Queued {} tracks of {}", enqueued.len(), tag),
        }
        self.emit(ShowEvent::DownloadQueued {
            show_id: tag.show_id.clone(),
            recording_id: tag.recording_id.clone(),
            tracks: enqueued.len() as u32,
        });

        Ok(())
    }

    /// Pick an existing group back up without queueing duplicates
    async fn revive_group(
        &self,
        tag: &GroupTag,
        entries: &[TrackTransferEntry],
    ) -> Result<(), ShowDownloadError> {
        let resumed = self.resume_paused(entries).await?;
        let retried = self.requeue_failed(entries).await?;

        debug!("{} already queued: resumed {}, retried {}", tag, resumed, retried);
        Ok(())
    }

    async fn resume_paused(&self, entries: &[TrackTransferEntry]) -> Result<u32, ShowDownloadError> {
        let mut resumed = 0;
        for entry in entries.iter().filter(|e| e.status == TransferStatus::Paused) {
            if ignore_missing(self.engine.resume(entry.id).await)? {
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Replace each failed entry with a fresh one for the same track
    ///
    /// The replacement is queued before the failed entry goes away, so a
    /// rejected enqueue leaves the track Failed and the group never looks
    /// complete without it.
    async fn requeue_failed(&self, entries: &[TrackTransferEntry]) -> Result<u32, ShowDownloadError> {
        let mut count = 0;
        for entry in entries.iter().filter(|e| e.status == TransferStatus::Failed) {
            self.engine.enqueue(entry.to_request()).await?;
            ignore_missing(self.engine.remove(entry.id).await)?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove a group's entries from the engine, then its files from disk
    async fn discard_group(
        &self,
        tag: &GroupTag,
        entries: &[TrackTransferEntry],
    ) -> Result<(), ShowDownloadError> {
        for entry in entries {
            ignore_missing(self.engine.remove(entry.id).await)?;
        }

        for entry in entries {
            remove_file_if_exists(&entry.destination)
                .await
                .map_err(|source| storage_error(&tag.show_id, source))?;
        }

        let dir = recording_dir(&self.download_dir().await, tag);
        remove_dir_if_exists(&dir)
            .await
            .map_err(|source| storage_error(&tag.show_id, source))?;

        debug!("Discarded {} entries of {}", entries.len(), tag);
        Ok(())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Write the download record once a group has fully completed
    fn spawn_completion_recorder(&self) {
        let manager = self.clone();
        let mut progress_rx = self.aggregator.subscribe();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut recorded: HashSet<GroupTag> = HashSet::new();
            // Groups whose record write failed: next attempt and current delay
            let mut backoff: HashMap<GroupTag, (Instant, Duration)> = HashMap::new();

            loop {
                let completed: Vec<GroupTag> = {
                    let map = progress_rx.borrow_and_update();
                    recorded.retain(|tag| is_completed(map.get(&tag.show_id), tag));
                    backoff.retain(|tag, _| is_completed(map.get(&tag.show_id), tag));

                    map.values()
                        .filter(|p| p.status == ShowDownloadStatus::Completed)
                        .filter_map(|p| {
                            p.recording_id
                                .as_deref()
                                .map(|recording_id| tagger::tag_for(&p.show_id, recording_id))
                        })
                        .filter(|tag| !recorded.contains(tag))
                        .collect()
                };

                let now = Instant::now();
                for tag in completed {
                    if backoff.get(&tag).is_some_and(|(at, _)| *at > now) {
                        continue;
                    }

                    match manager.record_completion(&tag).await {
                        Ok(true) => {
                            backoff.remove(&tag);
                            recorded.insert(tag);
                        }
                        Ok(false) => {
                            backoff.remove(&tag);
                        }
                        Err(e) => {
                            let delay = match backoff.get(&tag) {
                                Some((_, last)) => (*last * 2).min(RECORD_RETRY_MAX),
                                None => RECORD_RETRY_MIN,
                            };
                            warn!(
                                "Failed to record completed download of {}, retrying in {:?}: {}",
                                tag, delay, e
                            );
                            manager.emit(ShowEvent::Error {
                                message: e.to_string(),
                                context: Some(tag.to_string()),
                            });
                            backoff.insert(tag, (Instant::now() + delay, delay));
                        }
                    }
                }

                let next_retry = backoff.values().map(|(at, _)| *at).min();

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = progress_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep_until_retry(next_retry), if next_retry.is_some() => {}
                }
            }

            debug!("Completion recorder stopped");
        });
    }

    /// Returns `Ok(false)` when the group is no longer complete
    async fn record_completion(&self, tag: &GroupTag) -> Result<bool, ShowDownloadError> {
        let _guard = self.show_locks.lock(&tag.show_id).await;

        // Re-read under the lock: a cancel or switch may have won the race
        let entries: Vec<_> = self
            .group_entries(tag)
            .await?
            .into_iter()
            .filter(|entry| entry.status != TransferStatus::Cancelled)
            .collect();
        if entries.is_empty() || entries.iter().any(|e| e.status != TransferStatus::Completed) {
            return Ok(false);
        }

        if self.records.downloaded_recording(&tag.show_id).await?.as_deref()
            == Some(tag.recording_id.as_str())
        {
            return Ok(true);
        }

        let format = self
            .formats
            .lock()
            .remove(tag)
            .or_else(|| format_from_entries(&entries));
        self.records
            .upsert(&DownloadRecord::new(&tag.show_id, &tag.recording_id, format))
            .await?;

        info!("Show {} downloaded with recording {}", tag.show_id, tag.recording_id);
        self.emit(ShowEvent::DownloadCompleted {
            show_id: tag.show_id.clone(),
            recording_id: tag.recording_id.clone(),
        });

        Ok(true)
    }
}

impl Clone for ShowDownloadManager {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            resolver: Arc::clone(&self.resolver),
            records: Arc::clone(&self.records),
            aggregator: Arc::clone(&self.aggregator),
            settings: Arc::clone(&self.settings),
            storage: self.storage.clone(),
            show_locks: Arc::clone(&self.show_locks),
            formats: Arc::clone(&self.formats),
            event_tx: self.event_tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Fail when the show already has a recording other than `requested`
fn check_conflict(
    show_id: &str,
    recorded: Option<&str>,
    groups: &GroupMap,
    requested: &str,
) -> Result<(), ShowDownloadError> {
    let existing = recorded.filter(|r| *r != requested).or_else(|| {
        groups
            .keys()
            .map(|tag| tag.recording_id.as_str())
            .find(|r| *r != requested)
    });

    match existing {
        Some(existing) => Err(ShowDownloadError::RecordingConflict {
            show_id: show_id.to_string(),
            existing: existing.to_string(),
            requested: requested.to_string(),
        }),
        None => Ok(()),
    }
}

fn newest_group(groups: &GroupMap) -> Option<&GroupTag> {
    groups
        .iter()
        .max_by_key(|(_, entries)| entries.iter().map(|e| e.created_at).max())
        .map(|(tag, _)| tag)
}

fn is_completed(progress: Option<&ShowDownloadProgress>, tag: &GroupTag) -> bool {
    progress.is_some_and(|p| {
        p.status == ShowDownloadStatus::Completed
            && p.recording_id.as_deref() == Some(tag.recording_id.as_str())
    })
}

/// The engine reports an entry that is already gone as not found
fn ignore_missing(result: Result<(), EngineError>) -> Result<bool, EngineError> {
    match result {
        Ok(()) => Ok(true),
        Err(EngineError::EntryNotFound(id)) => {
            debug!("Entry {} already gone", id);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn storage_error(show_id: &str, source: std::io::Error) -> ShowDownloadError {
    ShowDownloadError::StorageIo {
        show_id: show_id.to_string(),
        source,
    }
}

fn format_from_entries(entries: &[TrackTransferEntry]) -> Option<String> {
    entries
        .first()
        .and_then(|entry| entry.destination.extension())
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

async fn completed_size(entries: &[TrackTransferEntry]) -> u64 {
    let mut total = 0u64;
    for entry in entries
        .iter()
        .filter(|entry| entry.status == TransferStatus::Completed)
    {
        total = total.saturating_add(file_size(&entry.destination).await);
    }
    total
}

async fn sleep_until_retry(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
