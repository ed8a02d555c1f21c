use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Registry storage error: {0}")]
    Storage(String),

    #[error("Master client not found: {0}")]
    MasterNotFound(Uuid),

    #[error("Workbook could not be read: {0}")]
    Workbook(String),

    #[error("Required column '{column}' missing from {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("Unsupported report schema version {0}")]
    UnsupportedSchemaVersion(u64),

    #[error("Malformed report payload: {0}")]
    MalformedReport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Workbook export failed: {0}")]
    Export(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DashboardError>;
