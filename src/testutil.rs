//! In-memory collaborator doubles shared by unit tests.

use crate::classifier::{Detection, FrameClassifier};
use crate::error::{CrashwatchError, Result};
use crate::frame::FrameData;
use crate::records::{AccidentStatus, CameraRecord, RecordStore, RecordUpdate};
use crate::storage::ClipStorage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Classifier replaying a fixed script of per-frame confidences. Frames
/// past the end of the script yield no detections.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Vec<f32>>>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Vec<f32>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }

    /// Classifier that never detects anything.
    pub fn silent() -> Arc<Self> {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl FrameClassifier for ScriptedClassifier {
    async fn infer(&self, _frame: &FrameData) -> Result<Vec<Detection>> {
        let confidences = self.script.lock().unwrap().pop_front().unwrap_or_default();
        Ok(confidences
            .into_iter()
            .map(|confidence| Detection {
                label: "accident".to_string(),
                confidence,
                bbox: None,
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub id: String,
    pub camera_id: String,
    pub status: AccidentStatus,
    pub clip_path: Option<String>,
    pub video_url: Option<String>,
}

/// Record store keeping everything in memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    pub records: Mutex<Vec<RecordEntry>>,
    pub cameras: Mutex<Vec<CameraRecord>>,
    next_id: AtomicU64,
    pub fail_create: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, id: &str) -> Option<RecordEntry> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_accident_record(
        &self,
        camera_id: &str,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<String> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(CrashwatchError::record_store("create disabled"));
        }
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.records.lock().unwrap().push(RecordEntry {
            id: id.clone(),
            camera_id: camera_id.to_string(),
            status: AccidentStatus::Detected,
            clip_path: None,
            video_url: None,
        });
        Ok(id)
    }

    async fn update_accident_record(&self, record_id: &str, update: RecordUpdate) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let entry = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| CrashwatchError::record_store("unknown record"))?;
        if let Some(status) = update.status {
            entry.status = status;
        }
        if let Some(clip_path) = update.clip_path {
            entry.clip_path = Some(clip_path);
        }
        if let Some(video_url) = update.video_url {
            entry.video_url = Some(video_url);
        }
        Ok(())
    }

    async fn list_detected_records(&self) -> Result<Vec<String>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == AccidentStatus::Detected)
            .map(|r| r.id.clone())
            .collect())
    }

    async fn list_cameras(&self) -> Result<Vec<CameraRecord>> {
        Ok(self.cameras.lock().unwrap().clone())
    }
}

/// Clip storage remembering what was uploaded.
#[derive(Default)]
pub struct MemoryClipStorage {
    pub uploads: Mutex<Vec<PathBuf>>,
    pub fail: AtomicBool,
}

impl MemoryClipStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl ClipStorage for MemoryClipStorage {
    async fn upload_clip(&self, path: &Path) -> Result<String> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CrashwatchError::storage("upload disabled"));
        }
        self.uploads.lock().unwrap().push(path.to_path_buf());
        let _ = std::fs::remove_file(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("http://storage.local/videos/{}", name))
    }
}
