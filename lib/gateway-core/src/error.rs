use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metadata store rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("Invalid seed document: {0}")]
    InvalidSeed(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
