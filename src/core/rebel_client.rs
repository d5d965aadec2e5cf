use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ExtractionSettings;

/// Parameters of one seq2seq generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub text: String,
    pub source_language: String,
    pub target_token: String,
    pub decoder_start_token_id: u32,
    pub max_length: usize,
}

impl GenerationRequest {
    /// Request with the model defaults; the output is capped at the
    /// character length of the input.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let max_length = text.chars().count();
        Self {
            text,
            source_language: "en_XX".to_string(),
            target_token: "<triplet>".to_string(),
            decoder_start_token_id: 250058,
            max_length,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.source_language = language.into();
        self
    }

    pub fn with_target_token(mut self, token: impl Into<String>) -> Self {
        self.target_token = token.into();
        self
    }

    pub fn with_decoder_start_token_id(mut self, id: u32) -> Self {
        self.decoder_start_token_id = id;
        self
    }
}

/// A model that turns text into a decoded triplet token stream, special
/// tokens included.
#[async_trait]
pub trait TripletGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub src_lang: String,
    pub tgt_lang: String,
    pub decoder_start_token_id: u32,
    pub max_length: usize,
    pub skip_special_tokens: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequestBody {
    pub model: String,
    pub inputs: String,
    pub parameters: GenerationParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    #[serde(alias = "translation_text")]
    pub generated_text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Batch(Vec<Generation>),
    Single(Generation),
}

pub struct RebelClient {
    client: reqwest::Client,
    base_url: String,
    pub model: String,
}

impl RebelClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        if let Some(key) = api_key {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", key))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_settings(settings: &ExtractionSettings) -> Result<Self> {
        Self::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
            settings.timeout,
        )
    }

    pub async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl TripletGenerator for RebelClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let start_time = Instant::now();

        let body = GenerateRequestBody {
            model: self.model.clone(),
            inputs: request.text.clone(),
            parameters: GenerationParameters {
                src_lang: request.source_language.clone(),
                tgt_lang: request.target_token.clone(),
                decoder_start_token_id: request.decoder_start_token_id,
                max_length: request.max_length,
                skip_special_tokens: false,
            },
        };

        debug!("Sending generation request: {:?}", body.parameters);

        let url = format!("{}/generate", self.base_url);
        let response = self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to extraction model")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Extraction model error {}: {}", status, error_text);
        }

        let parsed: GenerateResponse = response.json().await
            .context("Failed to parse generation response")?;

        let generation = match parsed {
            GenerateResponse::Single(generation) => generation,
            GenerateResponse::Batch(batch) => batch
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("No generations in response"))?,
        };

        debug!(
            "Generated {} chars in {:.2}s",
            generation.generated_text.len(),
            start_time.elapsed().as_secs_f64()
        );

        Ok(generation.generated_text)
    }
}
