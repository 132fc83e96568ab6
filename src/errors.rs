//! Errors that can happen while downloading or reworking webtoons.

use std::path::PathBuf;
use thiserror::Error;

#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    RangeError(#[from] RangeError),
    #[error(transparent)]
    DirectoryStateError(#[from] DirectoryStateError),
    #[error(transparent)]
    ScraperError(#[from] ScraperError),
    #[error(transparent)]
    DownloadError(#[from] DownloadError),
    #[error(transparent)]
    UnshuffleError(#[from] UnshuffleError),
    #[error(transparent)]
    MergeError(#[from] MergeError),
}

/// Errors from parsing an episode range expression.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("`{bound}` is not a valid episode number in range expression `{expression}`")]
    InvalidBound { bound: String, expression: String },
}

/// Errors from directory-state preconditions.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DirectoryStateError {
    #[error("`{path}` is not an unmerged webtoon directory")]
    NotUnmergedWebtoonDirectory { path: PathBuf },
    #[error("`{path}` is not a merged webtoon directory")]
    NotMergedWebtoonDirectory { path: PathBuf },
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Errors from interacting with a webtoon platform.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("`{0}` is not a known platform")]
    InvalidPlatform(String),
    #[error("{0}")]
    InvalidUrl(&'static str),
    #[error(transparent)]
    MalformedUrl(#[from] url::ParseError),
    #[error("`{id}` is not a valid webtoon id for {platform}")]
    InvalidWebtoonId { id: String, platform: &'static str },
    #[error("{0}")]
    Authentication(String),
    #[error("webtoon information has not been fetched yet")]
    NotFetched,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ScraperError {
    fn from(error: reqwest::Error) -> Self {
        Self::Unexpected(anyhow::Error::from(error))
    }
}

/// Errors from a download run.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("`{path}` already exists and would be overwritten")]
    Conflict { path: PathBuf },
    #[error("download was canceled")]
    Canceled,
    #[error(transparent)]
    ScraperError(#[from] ScraperError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        Self::Unexpected(anyhow::Error::from(error))
    }
}

/// Errors from unshuffling tiled images.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum UnshuffleError {
    #[error(transparent)]
    DirectoryStateError(#[from] DirectoryStateError),
    #[error("episode ids are not provided and could not be recovered from `information.json`")]
    MissingEpisodeIds,
    #[error(transparent)]
    ImageError(#[from] image::ImageError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Errors from merging or restoring episode directories.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    DirectoryStateError(#[from] DirectoryStateError),
    #[error("`{0}` is not a valid merge number, must be at least 1")]
    InvalidMergeNumber(u32),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}
