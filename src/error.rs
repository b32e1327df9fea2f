use std::path::PathBuf;

use thiserror::Error;

use crate::datasets::table::Attribute;

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset directory: '{}' does not exist", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Not implemented for labels: {0:?}")]
    UnsupportedLabels(Vec<Attribute>),

    #[error("at least one label must be configured")]
    NoLabels,

    #[error("invalid image shape {height}x{width}x{channels}, channels must be 1 or 3")]
    InvalidShape {
        height: usize,
        width: usize,
        channels: usize,
    },

    #[error("train fraction must lie in [0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("table has no {0} column")]
    MissingColumn(Attribute),

    #[error("batch size cannot be zero")]
    InvalidBatchSize,

    #[error("{file} is not inside: {}", .dir.display())]
    MissingCache { file: &'static str, dir: PathBuf },

    #[error("dataset has not been loaded")]
    NotLoaded,

    #[error("annotation line {line}: {reason}")]
    Annotation { line: usize, reason: String },

    #[error("annotation header does not match the attribute list: {0}")]
    HeaderMismatch(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize table: {0}")]
    Serialize(#[from] ron::Error),

    #[error("corrupt table {}, row {row}: {reason}", .path.display())]
    CorruptCache {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("failed to deserialize {}: {source}", .path.display())]
    Deserialize {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io { path: path.into(), source }
    }
}
