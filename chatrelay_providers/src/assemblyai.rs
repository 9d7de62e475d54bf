use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatrelay_core::{Transcriber, redact_url, scrub_url};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com/v2";

/// Map a language name or code to the code the transcription API accepts.
/// Unknown languages fall back to `en`.
#[must_use]
pub fn language_code(language: &str) -> &'static str {
    match language.trim().to_lowercase().as_str() {
        "en-us" | "en_us" => "en_us",
        "en-gb" | "en_gb" => "en_gb",
        "es" | "spanish" => "es",
        "fr" | "french" => "fr",
        "de" | "german" => "de",
        "it" | "italian" => "it",
        "pt" | "portuguese" => "pt",
        "nl" | "dutch" => "nl",
        "ja" | "japanese" => "ja",
        "hi" | "hindi" => "hi",
        _ => "en",
    }
}

#[derive(Debug, Deserialize)]
struct Transcript {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// AssemblyAI transcription: submit the media URL, then poll until the
/// transcript completes or the poll timeout runs out.
pub struct AssemblyAiTranscriber {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl AssemblyAiTranscriber {
    pub fn new(api_key: String) -> Self {
        info!("Creating AssemblyAiTranscriber");
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn submit(&self, media_url: &str, language_hint: Option<&str>) -> anyhow::Result<Transcript> {
        let body = language_hint.map_or_else(
            || json!({"audio_url": media_url, "language_detection": true}),
            |lang| {
                json!({
                    "audio_url": media_url,
                    "language_detection": false,
                    "language_code": language_code(lang),
                })
            },
        );
        debug!(
            "Submitting transcription of {} (language={})",
            redact_url(media_url),
            language_hint.map_or("auto", language_code)
        );
        Ok(self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Transcript>()
            .await?)
    }

    /// Errors never include `media_url` verbatim.
    async fn poll(&self, id: &str, media_url: &str) -> anyhow::Result<Transcript> {
        loop {
            let transcript = self
                .client
                .get(format!("{}/transcript/{id}", self.base_url))
                .header("authorization", &self.api_key)
                .send()
                .await?
                .error_for_status()?
                .json::<Transcript>()
                .await?;
            match transcript.status.to_lowercase().as_str() {
                "completed" => return Ok(transcript),
                "error" => anyhow::bail!(
                    "Transcription {id} failed: {}",
                    scrub_url(&transcript.error.unwrap_or_default(), media_url)
                ),
                status => debug!("Transcription {id} is {status}"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    async fn transcribe(
        &self,
        media_url: &str,
        language_hint: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        let started = Instant::now();
        let submitted = self.submit(media_url, language_hint).await?;

        let Ok(polled) = tokio::time::timeout(self.poll_timeout, self.poll(&submitted.id, media_url)).await
        else {
            warn!(
                "Timed out after {}s waiting for transcription {}",
                self.poll_timeout.as_secs(),
                submitted.id
            );
            return Ok(None);
        };
        let transcript = polled?;

        info!(
            "Transcription took {:.2} seconds",
            started.elapsed().as_secs_f64()
        );
        Ok(transcript.text.filter(|t| !t.trim().is_empty()))
    }
}
