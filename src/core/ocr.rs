//! OCR captioning: turn the text visible in an image into a `schema:caption`.
//!
//! Recognition is delegated to an [`OcrEngine`]; the default engine runs the
//! Tesseract CLI with TSV output so words can be grouped by layout block.

use anyhow::Context;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::OcrSettings;
use crate::core::agent::{OutputResource, Resource, UpdateChangeAgent};
use crate::handlers::ImageLoader;
use crate::knowledge_graph::namespace::{self, schema, whyis};
use crate::knowledge_graph::{Graph, Node};

/// Wikidata: optical character recognition
const ACTIVITY_CLASS: &str = "Q167555";

const QUERY: &str = "select distinct ?resource where { ?resource a <http://schema.org/ImageObject>. }";

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("Image processing failed: {0}")]
    ImageProcessingFailed(String),

    #[error("OCR execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Malformed OCR output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OcrError>;

/// One recognized box from the engine's layout analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub block_num: u32,
    pub par_num: u32,
    pub line_num: u32,
    pub word_num: u32,
    /// Engine confidence, negative for non-word layout boxes
    pub conf: f32,
    pub text: String,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<OcrWord>>;

    async fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    /// Language code(s), e.g. "eng" or "eng+deu"
    pub language: String,
    /// Page segmentation mode
    pub psm: Option<u8>,
    /// OCR engine mode
    pub oem: Option<u8>,
    pub executable_path: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            psm: Some(4),
            oem: None,
            executable_path: None,
            extra_args: Vec::new(),
        }
    }
}

impl TesseractConfig {
    pub fn from_settings(settings: &OcrSettings) -> Self {
        Self {
            language: settings.language.clone(),
            psm: Some(settings.psm),
            oem: None,
            executable_path: settings.tesseract_path.clone(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_oem(mut self, oem: u8) -> Self {
        self.oem = Some(oem);
        self
    }
}

pub struct TesseractEngine {
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::with_config(TesseractConfig::default())
    }

    pub fn with_config(config: TesseractConfig) -> Self {
        Self { config }
    }

    fn executable(&self) -> &str {
        self.config.executable_path.as_deref().unwrap_or("tesseract")
    }

    /// Image on stdin, TSV on stdout.
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.config.language.clone(),
        ];

        if let Some(psm) = self.config.psm {
            args.push("--psm".to_string());
            args.push(psm.to_string());
        }

        if let Some(oem) = self.config.oem {
            args.push("--oem".to_string());
            args.push(oem.to_string());
        }

        args.extend(self.config.extra_args.iter().cloned());
        args.push("tsv".to_string());
        args
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<OcrWord>> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| OcrError::ImageProcessingFailed(e.to_string()))?;
        let png = png.into_inner();

        let mut child = Command::new(self.executable())
            .args(self.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::EngineNotAvailable(format!(
                    "{} is not installed or not in PATH",
                    self.executable()
                )),
                _ => OcrError::ExecutionFailed(e.to_string()),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::ExecutionFailed("stdin not captured".to_string()))?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&png).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        let written = writer.await;

        // A rejected image closes stdin early; the exit status explains why.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ExecutionFailed(format!("Tesseract failed: {stderr}")));
        }

        written.map_err(|e| OcrError::ExecutionFailed(e.to_string()))??;

        parse_tsv(&String::from_utf8_lossy(&output.stdout))
    }

    async fn is_available(&self) -> bool {
        Command::new(self.executable())
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Parse Tesseract's TSV output, locating columns by header name.
pub fn parse_tsv(output: &str) -> Result<Vec<OcrWord>> {
    let mut lines = output.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.is_empty());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| OcrError::MalformedOutput("empty output".to_string()))?
        .split('\t')
        .collect();

    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| OcrError::MalformedOutput(format!("missing column {}", name)))
    };
    let block = column("block_num")?;
    let par = column("par_num")?;
    let line = column("line_num")?;
    let word = column("word_num")?;
    let conf = column("conf")?;
    let text = column("text")?;

    let mut words = Vec::new();
    for row in lines {
        let fields: Vec<&str> = row.split('\t').collect();
        let int = |i: usize| -> Result<u32> {
            fields
                .get(i)
                .and_then(|f| f.trim().parse().ok())
                .ok_or_else(|| OcrError::MalformedOutput(format!("bad row: {}", row)))
        };

        words.push(OcrWord {
            block_num: int(block)?,
            par_num: int(par)?,
            line_num: int(line)?,
            word_num: int(word)?,
            conf: fields
                .get(conf)
                .and_then(|f| f.trim().parse().ok())
                .ok_or_else(|| OcrError::MalformedOutput(format!("bad confidence: {}", row)))?,
            text: fields.get(text).copied().unwrap_or("").to_string(),
        });
    }

    Ok(words)
}

/// Keep words above `min_conf`, group them by block in ascending block
/// order, and join words with spaces and blocks with newlines.
pub fn group_blocks(words: &[OcrWord], min_conf: f32) -> String {
    let mut blocks: BTreeMap<u32, Vec<&str>> = BTreeMap::new();

    for word in words.iter().filter(|w| w.conf > min_conf) {
        let text = word.text.trim();
        if !text.is_empty() {
            blocks.entry(word.block_num).or_default().push(text);
        }
    }

    blocks
        .values()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Upscale with a Lanczos filter, then drop color.
pub fn preprocess(image: &DynamicImage, scale: f32) -> DynamicImage {
    let width = ((image.width() as f32) * scale).round().max(1.0) as u32;
    let height = ((image.height() as f32) * scale).round().max(1.0) as u32;

    image.resize_exact(width, height, FilterType::Lanczos3).grayscale()
}

pub struct OcrCaptioner {
    loader: ImageLoader,
    engine: Box<dyn OcrEngine>,
    scale_factor: f32,
    min_confidence: f32,
}

impl OcrCaptioner {
    pub fn new(loader: ImageLoader, engine: Box<dyn OcrEngine>) -> Self {
        Self {
            loader,
            engine,
            scale_factor: 4.0,
            min_confidence: 0.0,
        }
    }

    pub fn from_settings(loader: ImageLoader, settings: &OcrSettings) -> Self {
        let engine = TesseractEngine::with_config(TesseractConfig::from_settings(settings));
        Self::new(loader, Box::new(engine))
            .with_scale_factor(settings.scale_factor)
            .with_min_confidence(settings.min_confidence)
    }

    pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn engine(&self) -> &dyn OcrEngine {
        self.engine.as_ref()
    }

    pub async fn load_image(&self, resource: &Resource) -> anyhow::Result<DynamicImage> {
        let file_id = resource
            .value(whyis::HAS_FILE_ID)
            .and_then(|n| n.as_literal())
            .map(|l| l.value.as_str());

        self.loader
            .load_image(&resource.identifier, file_id)
            .await
            .with_context(|| format!("Failed to load image: {}", resource.identifier))
    }

    pub async fn extract_text(&self, image: &DynamicImage) -> anyhow::Result<String> {
        let prepared = preprocess(image, self.scale_factor);
        debug!(
            "Running {} on {}x{} image",
            self.engine.name(),
            prepared.width(),
            prepared.height()
        );

        let words = self.engine.recognize(&prepared).await?;
        Ok(group_blocks(&words, self.min_confidence))
    }

    /// OCR a single image location and return the trimmed text.
    pub async fn caption_image(&self, location: &str) -> anyhow::Result<String> {
        let image = self.loader
            .load_image(location, None)
            .await
            .with_context(|| format!("Failed to load image: {}", location))?;
        Ok(self.extract_text(&image).await?.trim().to_string())
    }
}

#[async_trait]
impl UpdateChangeAgent for OcrCaptioner {
    fn name(&self) -> &str {
        "ocr"
    }

    fn activity_class(&self) -> String {
        namespace::wd(ACTIVITY_CLASS)
    }

    fn input_class(&self) -> String {
        schema::IMAGE_OBJECT.to_string()
    }

    fn output_class(&self) -> String {
        whyis::CAPTIONED_IMAGE.to_string()
    }

    fn query(&self) -> &str {
        QUERY
    }

    fn select_inputs(&self, graph: &Graph) -> Vec<Node> {
        graph.subjects_of_type(schema::IMAGE_OBJECT)
    }

    async fn process(&self, input: &Resource, output: &mut OutputResource) -> anyhow::Result<()> {
        let image = self.load_image(input).await?;
        let text = self.extract_text(&image).await?.trim().to_string();

        info!("Captioned {} with {} characters", input.identifier, text.len());
        output.add(schema::CAPTION, Node::literal(text));
        Ok(())
    }
}
