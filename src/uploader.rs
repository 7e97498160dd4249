use crate::records::{AccidentStatus, RecordStore, RecordUpdate};
use crate::storage::ClipStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Dispatch a clip upload as a detached background task. The coordinator
/// never waits on the returned handle during normal operation: upload
/// latency must not gate detection throughput, and the camera's state has
/// already been reset by the time this runs.
pub fn spawn_upload(
    storage: Arc<dyn ClipStorage>,
    records: Arc<dyn RecordStore>,
    clip_path: PathBuf,
    record_id: String,
) -> JoinHandle<()> {
    tokio::spawn(upload_and_record(storage, records, clip_path, record_id))
}

/// Upload one clip and reflect the outcome on its record. Used directly
/// (awaited) during shutdown, when background workers are being torn down.
pub async fn upload_and_record(
    storage: Arc<dyn ClipStorage>,
    records: Arc<dyn RecordStore>,
    clip_path: PathBuf,
    record_id: String,
) {
    let update = match storage.upload_clip(&clip_path).await {
        Ok(url) => {
            info!(record = %record_id, url = %url, "clip uploaded");
            RecordUpdate::status(AccidentStatus::Uploaded).with_video_url(url)
        }
        Err(e) => {
            // Local artifact is retained by the storage contract; the
            // record points back at it for a later retry.
            warn!(record = %record_id, path = %clip_path.display(), "upload failed: {}", e);
            RecordUpdate::status(AccidentStatus::UploadFailed)
                .with_clip_path(clip_path.to_string_lossy().into_owned())
        }
    };

    if let Err(e) = records.update_accident_record(&record_id, update).await {
        error!(record = %record_id, "failed to update record after upload: {}", e);
    }
}
