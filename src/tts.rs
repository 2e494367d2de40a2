use crate::error::{PipelineError, Result};
use crate::settings::{SpeechModel, VoiceSettings};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, warn};

const XI_API_KEY_HEADER: &str = "xi-api-key";
const REQUEST_ID_HEADER: &str = "request-id";

/// A remote pronunciation dictionary pinned to one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryRef {
    pub id: String,
    pub version_id: String,
}

#[derive(Debug, Clone)]
pub struct RemoteDictionary {
    pub name: String,
    pub id: String,
    pub latest_version_id: String,
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub voice_id: &'a str,
    pub model: &'a SpeechModel,
    pub settings: VoiceSettings,
    pub previous_request_ids: &'a [String],
    pub dictionary: Option<&'a DictionaryRef>,
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub audio: Vec<u8>,
    pub request_id: Option<String>,
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Synthesis>;
}

#[async_trait]
pub trait DictionaryBackend: Send + Sync {
    async fn list_dictionaries(&self) -> Result<Vec<RemoteDictionary>>;
    async fn upload_dictionary(&self, path: &Path, name: &str) -> Result<DictionaryRef>;
}

#[derive(Serialize)]
struct TtsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: TtsVoiceSettings,
    #[serde(skip_serializing_if = "is_empty_window")]
    previous_request_ids: &'a [String],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pronunciation_dictionary_locators: Vec<DictionaryLocator<'a>>,
}

fn is_empty_window(ids: &&[String]) -> bool {
    ids.is_empty()
}

#[derive(Serialize)]
struct TtsVoiceSettings {
    stability: f64,
    similarity_boost: f64,
    style: f64,
}

#[derive(Serialize)]
struct DictionaryLocator<'a> {
    pronunciation_dictionary_id: &'a str,
    version_id: &'a str,
}

#[derive(Deserialize)]
struct DictionaryListing {
    pronunciation_dictionaries: Vec<DictionaryListingEntry>,
}

#[derive(Deserialize)]
struct DictionaryListingEntry {
    id: String,
    name: String,
    latest_version_id: String,
}

#[derive(Deserialize)]
struct DictionaryCreated {
    id: String,
    version_id: String,
}

#[derive(Clone)]
pub struct ElevenLabsClient {
    inner: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ElevenLabsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not read error body for status {}: {}", status, e);
                String::new()
            }
        };
        error!("Backend request failed with {}: {}", status, body);
        Err(PipelineError::Backend {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SpeechBackend for ElevenLabsClient {
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<Synthesis> {
        let url = format!("{}/v1/text-to-speech/{}", self.base_url, request.voice_id);
        let body = TtsBody {
            text: request.text,
            model_id: request.model.id(),
            voice_settings: TtsVoiceSettings {
                stability: request.settings.stability,
                similarity_boost: request.settings.similarity,
                style: request.settings.style,
            },
            previous_request_ids: request.previous_request_ids,
            pronunciation_dictionary_locators: request
                .dictionary
                .map(|d| {
                    vec![DictionaryLocator {
                        pronunciation_dictionary_id: &d.id,
                        version_id: &d.version_id,
                    }]
                })
                .unwrap_or_default(),
        };
        debug!(
            "POST {} ({} chars, {} previous ids)",
            url,
            request.text.chars().count(),
            request.previous_request_ids.len()
        );

        let resp = self
            .inner
            .post(&url)
            .header(XI_API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp).await?;

        let request_id = resp
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let audio = resp.bytes().await?.to_vec();
        Ok(Synthesis { audio, request_id })
    }
}

#[async_trait]
impl DictionaryBackend for ElevenLabsClient {
    async fn list_dictionaries(&self) -> Result<Vec<RemoteDictionary>> {
        let url = format!("{}/v1/pronunciation-dictionaries", self.base_url);
        let resp = self
            .inner
            .get(&url)
            .header(XI_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let listing: DictionaryListing = Self::check(resp).await?.json().await?;
        Ok(listing
            .pronunciation_dictionaries
            .into_iter()
            .map(|d| RemoteDictionary {
                name: d.name,
                id: d.id,
                latest_version_id: d.latest_version_id,
            })
            .collect())
    }

    async fn upload_dictionary(&self, path: &Path, name: &str) -> Result<DictionaryRef> {
        let url = format!(
            "{}/v1/pronunciation-dictionaries/add-from-file",
            self.base_url
        );
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dictionary.pls")
            .to_string();
        let form = Form::new()
            .text("name", name.to_string())
            .part("file", Part::bytes(data).file_name(file_name));

        let resp = self
            .inner
            .post(&url)
            .header(XI_API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await?;
        let created: DictionaryCreated = Self::check(resp).await?.json().await?;
        Ok(DictionaryRef {
            id: created.id,
            version_id: created.version_id,
        })
    }
}
