//! Track transfer engine seam
//!
//! The engine is the durable single-file download queue this crate
//! orchestrates. It owns retries, backoff and its own persistence; the
//! show download manager only enqueues, pauses, resumes and removes
//! entries, and listens to its change stream.

use crate::error::EngineError;
use async_trait::async_trait;
use showdl_types::{EntryId, TrackTransferEntry, TransferEvent, TransferRequest};
use tokio::sync::broadcast;

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Queue one file, returning the id the engine assigned to it
    async fn enqueue(&self, request: TransferRequest) -> Result<EntryId, EngineError>;

    async fn pause(&self, id: EntryId) -> Result<(), EngineError>;

    async fn resume(&self, id: EntryId) -> Result<(), EngineError>;

    /// Cancel and remove an entry. Returns once the engine has confirmed
    /// removal, including entries waiting in retry backoff.
    async fn remove(&self, id: EntryId) -> Result<(), EngineError>;

    /// Every entry currently held by the engine (its persisted queue)
    async fn entries(&self) -> Result<Vec<TrackTransferEntry>, EngineError>;

    /// Subscribe to entry change notifications
    fn subscribe(&self) -> broadcast::Receiver<TransferEvent>;
}
