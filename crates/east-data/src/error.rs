use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{path}:{line}: {reason}")]
    Annotation {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no annotation file for image '{0}'")]
    MissingAnnotation(PathBuf),

    #[error("no usable text in '{0}' after cropping")]
    NoTextInCrop(PathBuf),

    #[error("background crop of '{0}' still contains text")]
    TextInBackgroundCrop(PathBuf),

    #[error("no images found in '{0}'")]
    EmptyDataset(PathBuf),

    #[error("{failures} consecutive samples failed in '{dir}'")]
    NoUsableSamples { dir: PathBuf, failures: usize },

    #[error("batch queue closed: every worker has stopped")]
    QueueClosed,

    #[error("cannot spawn batch worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
