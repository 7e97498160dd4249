pub mod channel;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod records;
pub mod ring;
pub mod storage;
pub mod uploader;

#[cfg(test)]
pub mod testutil;

pub use channel::{frame_channel, ChannelStatsSnapshot, FrameReceiver, FrameSender};
pub use classifier::{Detection, FrameClassifier, HttpClassifier};
pub use config::{CameraSourceConfig, CrashwatchConfig};
pub use coordinator::SessionCoordinator;
pub use detector::{AccidentDetector, ClipReady, DetectorEvent};
pub use encoder::ClipEncoder;
pub use error::{CrashwatchError, Result};
pub use frame::{FrameData, FrameMessage};
pub use ingest::{FfmpegOpener, FrameSource, IngestorPool, SourceOpener};
pub use records::{AccidentStatus, CameraRecord, HttpRecordStore, RecordStore, RecordUpdate};
pub use ring::FrameRing;
pub use storage::{ClipStorage, HttpClipStorage};
