//! Speech-to-text client.
//!
//! Uses the OpenAI-compatible `/audio/transcriptions` endpoint with
//! `verbose_json` output, which carries the detected language.

use std::time::Duration;

use async_trait::async_trait;
use heritix_shared::{AgentError, LlmConfig};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::llm::{build_client, retry_after, status_error, transport_error};

/// Transcript plus the ISO-639-1 code of the spoken language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub language: String,
}

/// External speech-to-text capability.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// `file_name` carries the extension the service uses to detect the codec.
    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<Transcription, AgentError>;
}

/// Whisper over the OpenAI-compatible audio API.
#[derive(Debug, Clone)]
pub struct WhisperClient {
    api_key: String,
    base_url: String,
    model: String,
    http: Client,
}

impl WhisperClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> heritix_shared::Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http: build_client(timeout)?,
        })
    }

    pub fn from_config(config: &LlmConfig, api_key: impl Into<String>) -> heritix_shared::Result<Self> {
        Self::new(
            api_key,
            config.base_url.clone(),
            config.transcription_model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[async_trait]
impl SpeechToText for WhisperClient {
    #[instrument(skip_all, fields(model = %self.model, bytes = audio.len()))]
    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<Transcription, AgentError> {
        let part = Part::bytes(audio.to_vec()).file_name(file_name.to_string());
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &text));
        }

        let body: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| AgentError::transient(format!("unreadable transcription: {e}")))?;

        let language = normalize_language(body.language.as_deref().unwrap_or_default());
        debug!(%language, chars = body.text.len(), "transcription received");
        Ok(Transcription {
            text: body.text.trim().to_string(),
            language,
        })
    }
}

/// Code used when the service does not report a language.
const UNDETERMINED: &str = "und";

/// Reduce a language label to a lowercase ISO-639-1 code.
///
/// Whisper reports full English names (`"english"`); other services report
/// codes, sometimes with a region (`"pt-BR"`). Unknown names are passed
/// through lowercased.
pub fn normalize_language(label: &str) -> String {
    let label = label.trim().to_lowercase();
    if label.is_empty() {
        return UNDETERMINED.to_string();
    }

    let primary = label
        .split(['-', '_'])
        .next()
        .unwrap_or(label.as_str());
    if primary.len() == 2 && primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return primary.to_string();
    }

    let code = match label.as_str() {
        "english" => Some("en"),
        "french" => Some("fr"),
        "spanish" => Some("es"),
        "portuguese" => Some("pt"),
        "german" => Some("de"),
        "italian" => Some("it"),
        "dutch" => Some("nl"),
        "arabic" => Some("ar"),
        "hindi" => Some("hi"),
        "bengali" => Some("bn"),
        "tamil" => Some("ta"),
        "telugu" => Some("te"),
        "marathi" => Some("mr"),
        "urdu" => Some("ur"),
        "punjabi" => Some("pa"),
        "gujarati" => Some("gu"),
        "kannada" => Some("kn"),
        "malayalam" => Some("ml"),
        "nepali" => Some("ne"),
        "swahili" => Some("sw"),
        "yoruba" => Some("yo"),
        "hausa" => Some("ha"),
        "amharic" => Some("am"),
        "somali" => Some("so"),
        "chinese" | "mandarin" => Some("zh"),
        "japanese" => Some("ja"),
        "korean" => Some("ko"),
        "vietnamese" => Some("vi"),
        "thai" => Some("th"),
        "indonesian" => Some("id"),
        "malay" => Some("ms"),
        "tagalog" => Some("tl"),
        "turkish" => Some("tr"),
        "persian" => Some("fa"),
        "russian" => Some("ru"),
        "ukrainian" => Some("uk"),
        "polish" => Some("pl"),
        "greek" => Some("el"),
        "hebrew" => Some("he"),
        "maori" => Some("mi"),
        _ => None,
    };
    code.map(String::from).unwrap_or(label)
}
