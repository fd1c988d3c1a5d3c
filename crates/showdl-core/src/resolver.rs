//! Recording resolver seam

use crate::error::ShowDownloadError;
use async_trait::async_trait;
use showdl_types::Recording;

/// Resolves a show to the recording to download and its track list
#[async_trait]
pub trait RecordingResolver: Send + Sync {
    /// Pick the recording for `show_id`.
    ///
    /// An explicit `recording_id` wins; otherwise the implementation falls
    /// back to the previously downloaded, then the preferred, then the best
    /// available recording. Fails with
    /// [`ShowDownloadError::NoRecordingAvailable`] when the show has none.
    async fn resolve(
        &self,
        show_id: &str,
        recording_id: Option<&str>,
    ) -> Result<Recording, ShowDownloadError>;
}
