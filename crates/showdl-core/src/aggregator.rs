//! Status aggregation
//!
//! Folds the track transfer entries sharing a group tag into one
//! show-level progress value and publishes a live `show_id -> progress`
//! map. Recomputation is a pure in-memory fold; the only engine call made
//! from the event loop is a full resync after the stream lagged.

use crate::engine::TransferEngine;
use crate::tagger;
use parking_lot::Mutex;
use showdl_types::{
    EntryId, GroupTag, ShowDownloadProgress, ShowDownloadStatus, TrackTransferEntry,
    TransferEvent, TransferStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Live per-show progress, keyed by show id
pub type ProgressMap = HashMap<String, ShowDownloadProgress>;

/// Removed entry ids remembered for dropping late updates
const TOMBSTONE_LIMIT: usize = 4096;

/// Fold the entries of one group into its show-level progress
///
/// Cancelled entries are on their way out and do not count. A group with
/// no countable entries is reported as not downloaded.
pub fn aggregate<'a, I>(tag: &GroupTag, entries: I) -> ShowDownloadProgress
where
    I: IntoIterator<Item = &'a TrackTransferEntry>,
{
    let mut progress = ShowDownloadProgress::not_downloaded(&tag.show_id);

    let (mut queued, mut downloading, mut paused) = (0u32, 0u32, 0u32);
    let mut bytes_downloaded = 0u64;
    let mut bytes_total = Some(0u64);

    for entry in entries {
        match entry.status {
            TransferStatus::Cancelled => continue,
            TransferStatus::Queued => queued += 1,
            TransferStatus::Downloading => downloading += 1,
            TransferStatus::Paused => paused += 1,
            TransferStatus::Completed => progress.tracks_completed += 1,
            TransferStatus::Failed => progress.tracks_failed += 1,
        }
        progress.tracks_total += 1;

        let size = entry.expected_size();
        bytes_downloaded += match (entry.status, size) {
            (TransferStatus::Completed, Some(size)) => size,
            (_, Some(size)) => entry.bytes_downloaded.min(size),
            (_, None) => entry.bytes_downloaded,
        };
        bytes_total = bytes_total.zip(size).map(|(sum, size)| sum + size);
    }

    if progress.tracks_total == 0 {
        return progress;
    }

    progress.recording_id = Some(tag.recording_id.clone());
    progress.bytes_downloaded = bytes_downloaded;
    progress.bytes_total = bytes_total;

    // Forward progress dominates; Failed only once nothing can move
    progress.status = if progress.tracks_completed == progress.tracks_total {
        ShowDownloadStatus::Completed
    } else if downloading > 0 {
        ShowDownloadStatus::Downloading
    } else if paused > 0 {
        ShowDownloadStatus::Paused
    } else if queued > 0 {
        ShowDownloadStatus::Queued
    } else {
        ShowDownloadStatus::Failed
    };

    progress.overall_progress = if progress.status == ShowDownloadStatus::Completed {
        1.0
    } else {
        match bytes_total {
            Some(total) if total > 0 => bytes_downloaded as f64 / total as f64,
            _ => progress.tracks_completed as f64 / progress.tracks_total as f64,
        }
    }
    .clamp(0.0, 1.0);

    progress
}

/// Removed entry ids, oldest evicted first once the limit is reached
#[derive(Debug, Default)]
struct Tombstones {
    ids: HashSet<EntryId>,
    order: VecDeque<EntryId>,
}

impl Tombstones {
    fn insert(&mut self, id: EntryId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &EntryId) -> bool {
        self.ids.contains(id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// An update older than what we already hold for the same entry
///
/// Completed is final for an entry, and within one status the byte count
/// only grows. Such updates show up when buffered events are replayed
/// after a resync.
fn is_stale(known: &TrackTransferEntry, incoming: &TrackTransferEntry) -> bool {
    if known.status == TransferStatus::Completed {
        return incoming.status != TransferStatus::Completed;
    }
    known.status == incoming.status && incoming.bytes_downloaded < known.bytes_downloaded
}

#[derive(Debug, Default)]
struct AggregatorState {
    /// Entries we own a tag for, with the decoded tag
    entries: HashMap<EntryId, (GroupTag, TrackTransferEntry)>,
    /// Entries the engine confirmed removed; late updates for them are dropped
    tombstones: Tombstones,
}

impl AggregatorState {
    /// Recompute the progress of one show from its current group
    ///
    /// When two groups of the same show coexist (only transiently, during a
    /// recording switch) the one with the most recently created entry wins.
    /// Entries of different groups are never folded together.
    fn progress_for(&self, show_id: &str) -> Option<ShowDownloadProgress> {
        let mut groups: BTreeMap<&GroupTag, Vec<&TrackTransferEntry>> = BTreeMap::new();
        for (tag, entry) in self.entries.values() {
            if tag.show_id == show_id && entry.status != TransferStatus::Cancelled {
                groups.entry(tag).or_default().push(entry);
            }
        }

        groups
            .into_iter()
            .max_by_key(|(_, entries)| entries.iter().map(|e| e.created_at).max())
            .map(|(tag, entries)| aggregate(tag, entries))
    }

    fn full_map(&self) -> ProgressMap {
        let shows: HashSet<&str> = self
            .entries
            .values()
            .map(|(tag, _)| tag.show_id.as_str())
            .collect();

        shows
            .into_iter()
            .filter_map(|show_id| {
                self.progress_for(show_id)
                    .map(|progress| (show_id.to_string(), progress))
            })
            .collect()
    }
}

/// Reduces engine entries into live per-show progress
#[derive(Debug)]
pub struct StatusAggregator {
    state: Mutex<AggregatorState>,
    progress_tx: watch::Sender<ProgressMap>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusAggregator {
    pub fn new() -> Self {
        let (progress_tx, _) = watch::channel(ProgressMap::new());
        Self {
            state: Mutex::new(AggregatorState::default()),
            progress_tx,
        }
    }

    /// Subscribe to the live progress map
    ///
    /// Every borrowed value is a complete snapshot: a show is never seen
    /// half-updated.
    pub fn subscribe(&self) -> watch::Receiver<ProgressMap> {
        self.progress_tx.subscribe()
    }

    /// Copy of the current progress map
    pub fn snapshot(&self) -> ProgressMap {
        self.progress_tx.borrow().clone()
    }

    /// Current progress of a show, `NotDownloaded` when it has no entries
    pub fn progress(&self, show_id: &str) -> ShowDownloadProgress {
        self.progress_tx
            .borrow()
            .get(show_id)
            .cloned()
            .unwrap_or_else(|| ShowDownloadProgress::not_downloaded(show_id))
    }

    /// Fold one engine notification into the live map
    pub fn apply(&self, event: TransferEvent) {
        let mut state = self.state.lock();

        let show_id = match event {
            TransferEvent::Changed { entry } => {
                if state.tombstones.contains(&entry.id) {
                    debug!("Dropping late update for removed entry {}", entry.id);
                    return;
                }
                if let Some((_, known)) = state.entries.get(&entry.id) {
                    if is_stale(known, &entry) {
                        debug!("Dropping stale update for entry {}", entry.id);
                        return;
                    }
                }
                let Some(tag) = tagger::decode(&entry.tag) else {
                    return;
                };
                let show_id = tag.show_id.clone();
                state.entries.insert(entry.id, (tag, entry));
                show_id
            }
            TransferEvent::Removed { id, tag } => {
                state.tombstones.insert(id);
                let removed = state.entries.remove(&id).map(|(tag, _)| tag);
                match removed.or_else(|| tagger::decode(&tag)) {
                    Some(tag) => tag.show_id,
                    None => return,
                }
            }
        };

        let progress = state.progress_for(&show_id);

        // Published while holding the state lock so snapshots stay ordered
        self.progress_tx.send_if_modified(|map| match progress {
            Some(progress) => {
                if map.get(&show_id) == Some(&progress) {
                    false
                } else {
                    map.insert(show_id, progress);
                    true
                }
            }
            None => map.remove(&show_id).is_some(),
        });
    }

    /// Replace all known entries with a fresh listing from the engine
    pub fn reset(&self, entries: Vec<TrackTransferEntry>) {
        let mut state = self.state.lock();

        let fresh: HashMap<_, _> = entries
            .into_iter()
            .filter(|entry| !state.tombstones.contains(&entry.id))
            .filter_map(|entry| tagger::decode(&entry.tag).map(|tag| (entry.id, (tag, entry))))
            .collect();
        state.entries = fresh;

        let map = state.full_map();
        self.progress_tx.send_replace(map);
    }

    /// Number of entries currently tracked
    pub fn tracked_entries(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Run the aggregation loop over the engine's change stream
    ///
    /// `events` must be subscribed before the engine was listed for seeding,
    /// so no change is missed between the listing and the loop. After the
    /// receiver lags, the buffered backlog is dropped and the map is rebuilt
    /// from a fresh listing.
    pub fn spawn(
        self: &Arc<Self>,
        engine: Arc<dyn TransferEngine>,
        mut events: broadcast::Receiver<TransferEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Status aggregator stopped");
                        break;
                    }
                    received = events.recv() => match received {
                        Ok(event) => aggregator.apply(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Status aggregator lagged by {} events, resyncing", skipped);
                            // The backlog predates the listing below
                            events = events.resubscribe();
                            match engine.entries().await {
                                Ok(entries) => aggregator.reset(entries),
                                Err(e) => warn!("Failed to resync from transfer engine: {}", e),
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Transfer engine stream closed, status aggregator exiting");
                            break;
                        }
                    }
                }
            }
        })
    }
}
