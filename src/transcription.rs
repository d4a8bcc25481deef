use crate::auth::AuthGate;
use crate::error::{ChefError, IntoChefError};
use crate::llm::{build_endpoint, error_message, http_client};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use url::Url;

/// Edge function that forwards audio to the speech-to-text provider
const TRANSCRIBE_FUNCTION_PATH: &str = "functions/v1/openai-whisper";

/// Recorder formats in order of preference
pub const MIME_PREFERENCE: [&str; 3] = ["audio/webm;codecs=opus", "audio/mp4", "audio/ogg;codecs=opus"];

/// Used when the recorder supports none of the preferred formats
pub const FALLBACK_MIME: &str = "audio/webm";

/// Pick the recording format: first supported preference, else `audio/webm`
pub fn select_mime_type<F>(is_supported: F) -> &'static str
where
    F: Fn(&str) -> bool,
{
    MIME_PREFERENCE
        .iter()
        .copied()
        .find(|mime| is_supported(mime))
        .unwrap_or(FALLBACK_MIME)
}

pub fn file_extension(mime_type: &str) -> &'static str {
    if mime_type.contains("mp4") {
        "mp4"
    } else if mime_type.contains("ogg") {
        "ogg"
    } else {
        "webm"
    }
}

/// A finished recording ready for upload
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Read a recording from disk, guessing the format from its extension
    pub fn from_file(path: &Path) -> Result<Self, ChefError> {
        let bytes = std::fs::read(path)?;
        let mime_type = match path.extension().and_then(|e| e.to_str()) {
            Some("mp4") | Some("m4a") => "audio/mp4",
            Some("ogg") | Some("oga") => "audio/ogg;codecs=opus",
            _ => FALLBACK_MIME,
        };
        Ok(Self::new(bytes, mime_type))
    }

    pub fn file_name(&self) -> String {
        format!("voice.{}", file_extension(&self.mime_type))
    }
}

/// Speech-to-text seam
///
/// An empty string means nothing was recognised; it is not an error.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, ChefError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Transcriber that uploads through the authenticated edge-function proxy
pub struct ProxyTranscriber {
    client: Client,
    endpoint: Url,
    anon_key: String,
    auth: AuthGate,
}

impl ProxyTranscriber {
    pub fn new(api_base_url: &str, anon_key: String, auth: AuthGate) -> Result<Self, ChefError> {
        let endpoint = build_endpoint(api_base_url, TRANSCRIBE_FUNCTION_PATH)?;
        log::info!("Transcription endpoint: {}", endpoint);

        Ok(Self {
            client: http_client()?,
            endpoint,
            anon_key,
            auth,
        })
    }
}

#[async_trait]
impl Transcriber for ProxyTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, ChefError> {
        let session = self.auth.current()?;
        log::info!(
            "Uploading {} bytes of {} for transcription (user {})",
            clip.bytes.len(),
            clip.mime_type,
            session.user_id
        );

        let part = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name())
            .mime_str(&clip.mime_type)
            .map_chef_err(|e| ChefError::Validation(format!("Unsupported audio type: {}", e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.anon_key)
            .multipart(form)
            .send()
            .await
            .map_chef_err(|e| ChefError::Upstream(format!("Failed to reach transcription proxy: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            log::warn!("Transcription proxy returned {}: {}", status, text);
            return Err(ChefError::Upstream(error_message(&text, "Transcription failed")));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_chef_err(ChefError::MalformedResponse)?;

        let text = body.text.unwrap_or_default();
        log::info!("Transcription result: {} characters", text.len());
        Ok(text)
    }
}
