use crate::error::{CrashwatchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle status of a persisted accident record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccidentStatus {
    Detected,
    Trimmed,
    Uploaded,
    UploadFailed,
    Failed,
}

/// Partial update applied to an accident record. Only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccidentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_by: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: AccidentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_clip_path(mut self, clip_path: impl Into<String>) -> Self {
        self.clip_path = Some(clip_path.into());
        self
    }

    pub fn with_video_url(mut self, video_url: impl Into<String>) -> Self {
        self.video_url = Some(video_url.into());
        self
    }
}

/// A camera known to the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecord {
    pub camera_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "cctv_url")]
    pub url: String,
}

/// Contract for the durable accident record store. The coordinator creates
/// records and mutates their status; everything else about persistence is
/// the collaborator's concern.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record in DETECTED status, returning its id.
    async fn create_accident_record(
        &self,
        camera_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<String>;

    async fn update_accident_record(&self, record_id: &str, update: RecordUpdate) -> Result<()>;

    /// Ids of records still in DETECTED status, used at startup to sweep
    /// leftovers from a previous run.
    async fn list_detected_records(&self) -> Result<Vec<String>>;

    /// Camera inventory, used when the configuration does not pin one.
    async fn list_cameras(&self) -> Result<Vec<CameraRecord>>;
}

#[derive(Serialize)]
struct CreateRecordRequest<'a> {
    camera_id: &'a str,
    latitude: f64,
    longitude: f64,
    status: AccidentStatus,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    id: String,
}

#[derive(Deserialize)]
struct RecordIdRow {
    id: String,
}

/// Record store backed by a JSON-over-HTTP API.
pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecordStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn create_accident_record(
        &self,
        camera_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.url("/accidents"))
            .json(&CreateRecordRequest {
                camera_id,
                latitude,
                longitude,
                status: AccidentStatus::Detected,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrashwatchError::record_store(format!(
                "create returned {}",
                response.status()
            )));
        }

        let body: CreateRecordResponse = response
            .json()
            .await
            .map_err(|e| CrashwatchError::record_store(format!("malformed create response: {}", e)))?;

        debug!(record = %body.id, camera = %camera_id, "accident record created");
        Ok(body.id)
    }

    async fn update_accident_record(&self, record_id: &str, update: RecordUpdate) -> Result<()> {
        let response = self
            .client
            .patch(self.url(&format!("/accidents/{}", record_id)))
            .json(&update)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrashwatchError::record_store(format!(
                "update of {} returned {}",
                record_id,
                response.status()
            )));
        }

        debug!(record = %record_id, ?update, "accident record updated");
        Ok(())
    }

    async fn list_detected_records(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/accidents?status=DETECTED"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrashwatchError::record_store(format!(
                "list returned {}",
                response.status()
            )));
        }

        let rows: Vec<RecordIdRow> = response
            .json()
            .await
            .map_err(|e| CrashwatchError::record_store(format!("malformed list response: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn list_cameras(&self) -> Result<Vec<CameraRecord>> {
        let response = self.client.get(self.url("/cameras")).send().await?;

        if !response.status().is_success() {
            return Err(CrashwatchError::record_store(format!(
                "camera list returned {}",
                response.status()
            )));
        }

        let cameras: Vec<CameraRecord> = response.json().await.map_err(|e| {
            CrashwatchError::record_store(format!("malformed camera response: {}", e))
        })?;

        Ok(cameras)
    }
}
