use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid character preset: {0}")]
    InvalidCharacter(String),

    #[error("speech backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("pronunciation dictionary unavailable: {0}")]
    DictionaryUnavailable(String),

    #[error("could not measure duration of {}: {reason}", path.display())]
    DurationUnmeasurable { path: PathBuf, reason: String },

    #[error("failed to write artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project definition error: {0}")]
    ProjectDefinition(String),

    #[error("scene not found: {0}")]
    SceneNotFound(String),

    #[error("no project metadata at {}; run a full generation first", .0.display())]
    MetadataMissing(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl PipelineError {
    pub fn artifact_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::ArtifactWrite {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
