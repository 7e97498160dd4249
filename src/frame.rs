use std::sync::Arc;
use std::time::SystemTime;

/// A single captured frame. The pixel payload is an opaque encoded buffer
/// (JPEG for every source this system ships with) shared cheaply between the
/// ring buffer and the clip encoder.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Encoded frame bytes (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels, 0 when the source does not report it
    pub width: u32,
    /// Frame height in pixels, 0 when the source does not report it
    pub height: u32,
    /// Wall-clock time the frame was captured
    pub timestamp: SystemTime,
}

impl FrameData {
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp: SystemTime) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            timestamp,
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A frame tagged with the camera it came from, as carried on the frame
/// channel from an ingestor to the session coordinator. Consumed exactly
/// once; never persisted.
#[derive(Debug, Clone)]
pub struct FrameMessage {
    /// Identifier of the producing camera
    pub source_id: String,
    pub frame: FrameData,
}

impl FrameMessage {
    pub fn new(source_id: impl Into<String>, frame: FrameData) -> Self {
        Self {
            source_id: source_id.into(),
            frame,
        }
    }
}
