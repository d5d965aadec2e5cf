use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use regex::Regex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base URL for minted entity, property, class and activity IRIs
    pub lod_prefix: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_depot: Option<PathBuf>,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Turtle,
    NTriples,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tesseract_path: Option<String>,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    /// Tesseract page segmentation mode
    #[serde(default = "default_psm")]
    pub psm: u8,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    /// Words at or below this confidence are dropped
    #[serde(default)]
    pub min_confidence: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            language: default_ocr_language(),
            psm: default_psm(),
            scale_factor: default_scale_factor(),
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default = "default_target_token")]
    pub target_token: String,
    #[serde(default = "default_decoder_start_token_id")]
    pub decoder_start_token_id: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Entity type tag -> class IRI, layered over the built-in table
    #[serde(default)]
    pub type_mappings: HashMap<String, String>,
    /// Relation local name -> property IRI, layered over the built-in table
    #[serde(default)]
    pub property_mappings: HashMap<String, String>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            model: default_model(),
            source_language: default_source_language(),
            target_token: default_target_token(),
            decoder_start_token_id: default_decoder_start_token_id(),
            timeout: default_timeout(),
            type_mappings: HashMap::new(),
            property_mappings: HashMap::new(),
        }
    }
}

fn default_http_timeout() -> u64 { 30 }
fn default_user_agent() -> String { concat!("knowledge_agents/", env!("CARGO_PKG_VERSION")).to_string() }
fn default_ocr_language() -> String { "eng".to_string() }
fn default_psm() -> u8 { 4 }
fn default_scale_factor() -> f32 { 4.0 }
fn default_model() -> String { "Babelscape/mrebel-large".to_string() }
fn default_source_language() -> String { "en_XX".to_string() }
fn default_target_token() -> String { "<triplet>".to_string() }
fn default_decoder_start_token_id() -> u32 { 250058 }
fn default_timeout() -> u64 { 120 }

/// mBART-style language codes such as `en_XX` or `fr_XX`.
pub fn is_valid_language_code(code: &str) -> bool {
    Regex::new(r"^[a-z]{2}_[A-Z]{2}$")
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

impl Configuration {
    /// Load configuration from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.lod_prefix.is_empty() {
            anyhow::bail!("No LOD prefix defined");
        }

        let prefix = url::Url::parse(&self.lod_prefix)
            .with_context(|| format!("LOD prefix is not a valid URL: {}", self.lod_prefix))?;
        if prefix.scheme() != "http" && prefix.scheme() != "https" {
            anyhow::bail!("LOD prefix must be an http(s) URL: {}", self.lod_prefix);
        }

        if !(self.ocr.scale_factor > 0.0) {
            anyhow::bail!("OCR scale factor must be positive, got {}", self.ocr.scale_factor);
        }

        if self.extraction.base_url.is_empty() {
            anyhow::bail!("No extraction model base URL defined");
        }

        if !is_valid_language_code(&self.extraction.source_language) {
            anyhow::bail!(
                "Invalid source language code: {} (expected e.g. en_XX)",
                self.extraction.source_language
            );
        }

        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Configuration {
            name: "Example knowledge agents".to_string(),
            description: "Caption images with OCR and extract typed triples from text".to_string(),
            lod_prefix: "http://localhost".to_string(),
            output_format: OutputFormat::Turtle,
            file_depot: Some(PathBuf::from("files")),
            http: HttpSettings::default(),
            ocr: OcrSettings::default(),
            extraction: ExtractionSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_is_valid() {
        Configuration::example().validate().unwrap();
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = "name: test\nlod_prefix: http://example.org\nextraction:\n  base_url: http://model:8080\n";
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.output_format, OutputFormat::Turtle);
        assert_eq!(config.ocr.psm, 4);
        assert_eq!(config.ocr.scale_factor, 4.0);
        assert_eq!(config.extraction.source_language, "en_XX");
        assert_eq!(config.extraction.decoder_start_token_id, 250058);
        assert!(config.file_depot.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let mut config = Configuration::example();
        config.lod_prefix = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        config.lod_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_language_and_scale() {
        let mut config = Configuration::example();
        config.extraction.source_language = "english".to_string();
        assert!(config.validate().is_err());

        let mut config = Configuration::example();
        config.ocr.scale_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, serde_json::to_string_pretty(&Configuration::example()).unwrap()).unwrap();

        let loaded = Configuration::from_file(&path).unwrap();
        assert_eq!(loaded.lod_prefix, "http://localhost");
        assert_eq!(loaded.extraction.model, "Babelscape/mrebel-large");
    }

    #[test]
    fn test_language_codes() {
        assert!(is_valid_language_code("en_XX"));
        assert!(is_valid_language_code("zh_CN"));
        assert!(!is_valid_language_code("en"));
        assert!(!is_valid_language_code("EN_xx"));
    }
}
