use crate::error::{PipelineError, Result};
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

/// Settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_url: String,
    pub output_dir: PathBuf,
    pub dictionary_dir: PathBuf,
    pub dictionary_cache: PathBuf,
    pub voice_id: Option<String>,
    pub model: String,
    /// Project-level default character.
    pub character: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let dictionary_dir = get("SCENEVOICE_DICTIONARY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./dictionaries"));
        let dictionary_cache = get("SCENEVOICE_DICTIONARY_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|| dictionary_dir.join(".dictionary_cache.json"));

        Self {
            api_key: get("ELEVENLABS_API_KEY"),
            api_url: get("SCENEVOICE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            output_dir: get("SCENEVOICE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./output")),
            dictionary_dir,
            dictionary_cache,
            voice_id: get("SCENEVOICE_VOICE_ID"),
            model: get("SCENEVOICE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            character: get("SCENEVOICE_CHARACTER"),
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            PipelineError::Config("ELEVENLABS_API_KEY is not set".to_string())
        })
    }
}
