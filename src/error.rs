use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, HomologyError>;

#[derive(Debug, thiserror::Error)]
pub enum HomologyError {
    #[error("arbor invalid: {0}")]
    InvalidArbor(&'static str),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no skeleton with id {0}")]
    UnknownSkeleton(u64),

    #[error("score table invalid: {0}")]
    ScoreTable(String),

    #[error("could not parse name-number label {0:?}")]
    NameNumber(String),

    #[error("distribution parameters invalid: {0}")]
    Distribution(#[from] statrs::StatsError),

    #[error("bad connectivity table: {0}")]
    ConnTable(String),

    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("fit failed: {0}")]
    Fit(String),

    #[error("config invalid: {0}")]
    Config(#[from] toml::de::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HomologyError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HomologyError::Io {
            path: path.into(),
            source,
        }
    }
}
