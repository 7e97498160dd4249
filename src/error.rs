use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrashwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to open source {url}: {details}")]
    SourceOpen { url: String, details: String },

    #[error("Model reference '{model}' cannot be resolved: {details}")]
    ModelUnresolved { model: String, details: String },

    #[error("Inference failed: {details}")]
    Inference { details: String },

    #[error("Clip encoding failed: {details}")]
    Encode { details: String },

    #[error("Record store error: {details}")]
    RecordStore { details: String },

    #[error("Clip storage error: {details}")]
    Storage { details: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl CrashwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn encode<S: Into<String>>(details: S) -> Self {
        Self::Encode {
            details: details.into(),
        }
    }

    pub fn record_store<S: Into<String>>(details: S) -> Self {
        Self::RecordStore {
            details: details.into(),
        }
    }

    pub fn storage<S: Into<String>>(details: S) -> Self {
        Self::Storage {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CrashwatchError>;
