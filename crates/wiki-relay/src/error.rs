use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlackError {
    #[error("Slack request failed: {0}")]
    Client(#[from] slack_morphism::errors::SlackClientError),

    #[error("Slack unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of an encyclopedia lookup that produced no summary.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("'{0}' matches several pages")]
    Disambiguation(String),

    #[error("No page found for '{0}'")]
    PageNotFound(String),

    #[error("Lookup failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        LookupError::Other(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Image folder {0} does not exist")]
    MissingFolder(PathBuf),

    #[error("Cannot list image folder {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
