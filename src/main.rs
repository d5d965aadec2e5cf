use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use knowledge_agents::{
    config::{Configuration, OutputFormat},
    core::{
        parse_typed_triples, AgentRunner, OcrCaptioner, OpenKnowledgeExtractor,
        RebelClient, UpdateChangeAgent,
    },
    handlers::{read_text_file, ImageLoader, LocalFileDepot},
    knowledge_graph::{Graph, RdfInputFormat},
    utils::{validate_graph, RdfSerializer},
};

const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "webp", "gif", "tif", "tiff", "bmp"];

#[derive(Parser)]
#[command(
    name = "knowledge_agents",
    about = "Caption images with OCR and extract typed knowledge triples from text",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent over every matching resource of an RDF graph
    Run {
        /// Agent to run
        #[arg(short, long, value_enum)]
        agent: AgentArg,

        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Input graph (Turtle or N-Triples)
        #[arg(short, long)]
        input: PathBuf,

        /// Input graph format (guessed from the extension by default)
        #[arg(long, value_enum)]
        input_format: Option<InputFormatArg>,

        /// Write the added statements here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (overrides config)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormatArg>,

        /// Reprocess resources already marked as processed
        #[arg(long)]
        force: bool,
    },

    /// OCR images or directories of images and print their captions
    Caption {
        /// Image paths, directories or URLs
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Upscaling factor applied before recognition (overrides config)
        #[arg(long)]
        scale: Option<f32>,
    },

    /// Extract typed triples from text with the extraction model
    Extract {
        /// Text to extract from
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Text file to extract from
        #[arg(short, long)]
        file: Option<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Source language code, e.g. en_XX (overrides config)
        #[arg(short, long)]
        language: Option<String>,

        /// Extraction model server URL (overrides config)
        #[arg(long)]
        server_url: Option<String>,

        /// API key for the extraction model server
        #[arg(long, env = "KNOWLEDGE_AGENTS_API_KEY")]
        api_key: Option<String>,
    },

    /// Parse a decoded model output into typed triples
    Parse {
        /// Decoded token stream
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// File holding the decoded token stream
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Check the extraction model server and the OCR engine
    CheckServer {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extraction model server URL (overrides config)
        #[arg(long)]
        server_url: Option<String>,

        /// API key for the extraction model server
        #[arg(long, env = "KNOWLEDGE_AGENTS_API_KEY")]
        api_key: Option<String>,
    },

    /// Generate example configuration file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,

        /// Configuration format
        #[arg(short, long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum AgentArg {
    Ocr,
    Extract,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum InputFormatArg {
    Turtle,
    NTriples,
}

impl From<InputFormatArg> for RdfInputFormat {
    fn from(format: InputFormatArg) -> Self {
        match format {
            InputFormatArg::Turtle => Self::Turtle,
            InputFormatArg::NTriples => Self::NTriples,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum OutputFormatArg {
    Turtle,
    NTriples,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(format: OutputFormatArg) -> Self {
        match format {
            OutputFormatArg::Turtle => Self::Turtle,
            OutputFormatArg::NTriples => Self::NTriples,
            OutputFormatArg::Json => Self::Json,
        }
    }
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            agent,
            config,
            input,
            input_format,
            output,
            format,
            force,
        } => run_command(agent, config, input, input_format, output, format, force).await,
        Commands::Caption { inputs, config, scale } => caption_command(inputs, config, scale).await,
        Commands::Extract {
            text,
            file,
            config,
            language,
            server_url,
            api_key,
        } => extract_command(text, file, config, language, server_url, api_key).await,
        Commands::Parse { text, file } => parse_command(text, file).await,
        Commands::Validate { config } => validate_command(config).await,
        Commands::CheckServer { config, server_url, api_key } => {
            check_server_command(config, server_url, api_key).await
        }
        Commands::GenerateConfig { output, format } => generate_config_command(output, format).await,
    }
}

/// Load and validate a configuration, falling back to the example defaults.
fn load_config(path: Option<&Path>) -> Result<Configuration> {
    let config = match path {
        Some(path) => Configuration::from_file(path)?,
        None => Configuration::example(),
    };
    config.validate()?;
    Ok(config)
}

fn image_loader(config: &Configuration) -> Result<ImageLoader> {
    let mut loader = ImageLoader::new(&config.http)?;
    if let Some(depot) = &config.file_depot {
        info!("Using file depot at {}", depot.display());
        loader = loader.with_file_store(Arc::new(LocalFileDepot::new(depot)));
    }
    Ok(loader)
}

fn rebel_client(
    config: &mut Configuration,
    server_url: Option<String>,
    api_key: Option<String>,
) -> Result<RebelClient> {
    if let Some(url) = server_url {
        config.extraction.base_url = url;
    }
    if let Some(key) = api_key {
        config.extraction.api_key = Some(key);
    }
    RebelClient::from_settings(&config.extraction)
}

async fn read_input_text(text: Option<String>, file: Option<String>) -> Result<String> {
    match (text, file) {
        (Some(text), _) => Ok(text),
        (None, Some(file)) => read_text_file(&file).await,
        (None, None) => anyhow::bail!("Either --text or --file is required"),
    }
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.blue} {msg} [{elapsed}]")?);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

async fn run_command(
    agent: AgentArg,
    config_path: PathBuf,
    input: PathBuf,
    input_format: Option<InputFormatArg>,
    output: Option<PathBuf>,
    format: Option<OutputFormatArg>,
    force: bool,
) -> Result<()> {
    eprintln!("{}", "Running agent...".bright_blue().bold());

    let config = load_config(Some(config_path.as_path()))?;
    let input_format = input_format
        .map(RdfInputFormat::from)
        .unwrap_or_else(|| RdfInputFormat::from_path(&input));
    let graph = Graph::from_file(&input, Some(input_format))?;

    eprintln!(" Configuration: {}", config.name.bright_green());
    eprintln!(" Input graph: {} ({} statements)", input.display(), graph.len());

    let agent: Box<dyn UpdateChangeAgent> = match agent {
        AgentArg::Ocr => {
            let captioner = OcrCaptioner::from_settings(image_loader(&config)?, &config.ocr);
            if !captioner.engine().is_available().await {
                error!(" {} is not available", captioner.engine().name());
                anyhow::bail!("OCR engine check failed");
            }
            Box::new(captioner)
        }
        AgentArg::Extract => {
            let client = RebelClient::from_settings(&config.extraction)?;
            if !client.check_health().await? {
                error!(" Extraction model is not responding at {}", config.extraction.base_url);
                anyhow::bail!("Extraction model health check failed");
            }
            Box::new(OpenKnowledgeExtractor::from_settings(
                Box::new(client),
                &config.lod_prefix,
                &config.extraction,
            ))
        }
    };

    let start_time = Instant::now();
    let progress = spinner(&format!("{} agent", agent.name()))?;
    let report = AgentRunner::new(config.lod_prefix.clone())
        .with_force(force)
        .run(agent.as_ref(), &graph)
        .await;
    progress.finish_and_clear();

    for failure in report.failures() {
        warn!(" Errors in {}: {}", failure.input, failure.errors.join(", "));
    }

    for issue in validate_graph(&report.output) {
        warn!(" Validation issue: {}", issue);
    }

    let format = format.map(OutputFormat::from).unwrap_or(config.output_format);
    let serialized = RdfSerializer::new().serialize(&report.output, &format)?;
    match &output {
        Some(path) => {
            tokio::fs::write(path, &serialized)
                .await
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            eprintln!(" Output written to: {}", path.display().to_string().bright_green());
        }
        None => print!("{}", serialized),
    }

    let failed = report.failures().count();
    eprintln!("\n{}", " Run Summary".bright_green().bold());
    eprintln!(" Processed: {}", report.activities.len().to_string().bright_cyan());
    eprintln!(" Skipped: {}", report.skipped.len());
    eprintln!(" Statements added: {}", report.output.len().to_string().bright_cyan());
    eprintln!("{}", report.output.get_statistics());
    eprintln!(" Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    if failed > 0 {
        eprintln!(" {} completed with {} failures", agent.name().bright_yellow(), failed);
    } else {
        eprintln!(" {} completed successfully!", agent.name().bright_green());
    }

    Ok(())
}

/// Expand directories into the image files beneath them.
fn collect_images(inputs: &[String]) -> Vec<String> {
    let mut images = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if !path.is_dir() {
            images.push(input.clone());
            continue;
        }

        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let is_image = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);

            if entry.file_type().is_file() && is_image {
                images.push(entry.path().display().to_string());
            }
        }
    }
    images
}

async fn caption_command(inputs: Vec<String>, config_path: Option<PathBuf>, scale: Option<f32>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let mut captioner = OcrCaptioner::from_settings(image_loader(&config)?, &config.ocr);
    if let Some(scale) = scale {
        anyhow::ensure!(scale > 0.0, "Scale factor must be positive, got {}", scale);
        captioner = captioner.with_scale_factor(scale);
    }

    if !captioner.engine().is_available().await {
        anyhow::bail!("{} is not available", captioner.engine().name());
    }

    let images = collect_images(&inputs);
    eprintln!("{} {} images", "Captioning".bright_blue().bold(), images.len());

    let progress = ProgressBar::new(images.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")?.progress_chars("=> "),
    );

    let mut failures = 0usize;
    for image in &images {
        progress.set_message(image.clone());
        match captioner.caption_image(image).await {
            Ok(caption) => {
                progress.println(format!("{}", image.bright_green()));
                progress.println(caption);
            }
            Err(e) => {
                failures += 1;
                progress.println(format!("{}: {:#}", image.bright_red(), e));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    if failures > 0 {
        eprintln!(" {} of {} images failed", failures.to_string().bright_yellow(), images.len());
    }

    Ok(())
}

async fn extract_command(
    text: Option<String>,
    file: Option<String>,
    config_path: Option<PathBuf>,
    language: Option<String>,
    server_url: Option<String>,
    api_key: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path.as_deref())?;
    let text = read_input_text(text, file).await?;
    let client = rebel_client(&mut config, server_url, api_key)?;

    let extractor = OpenKnowledgeExtractor::from_settings(Box::new(client), &config.lod_prefix, &config.extraction);
    let language = language.unwrap_or_else(|| extractor.language().to_string());

    let progress = spinner("Extracting triples")?;
    let triples = extractor.extract(&text, &language).await;
    progress.finish_and_clear();

    let triples = triples?;
    eprintln!(" Extracted {} triples", triples.len().to_string().bright_cyan());
    println!("{}", serde_json::to_string_pretty(&triples)?);
    Ok(())
}

async fn parse_command(text: Option<String>, file: Option<String>) -> Result<()> {
    let text = read_input_text(text, file).await?;
    let triples = parse_typed_triples(&text);
    println!("{}", serde_json::to_string_pretty(&triples)?);
    Ok(())
}

async fn validate_command(config_path: PathBuf) -> Result<()> {
    println!("{}", " Validating configuration...".bright_blue().bold());

    match Configuration::from_file(&config_path) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                println!(" Configuration is valid!");
                println!(" Name: {}", config.name.bright_green());
                println!(" LOD prefix: {}", config.lod_prefix);
                println!(" Output format: {:?}", config.output_format);
                println!(" OCR language: {}", config.ocr.language);
                println!(" Model: {}", config.extraction.model);
                println!(" Source language: {}", config.extraction.source_language);
                Ok(())
            }
            Err(e) => {
                error!(" Configuration validation failed: {}", e);
                Err(e)
            }
        },
        Err(e) => {
            error!(" Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

async fn check_server_command(
    config_path: Option<PathBuf>,
    server_url: Option<String>,
    api_key: Option<String>,
) -> Result<()> {
    println!("{}", " Checking services...".bright_blue().bold());

    let mut config = load_config(config_path.as_deref())?;
    let client = rebel_client(&mut config, server_url, api_key)?;

    if client.check_health().await? {
        println!(" Extraction model is healthy at {}", config.extraction.base_url.bright_green());
    } else {
        println!(" Extraction model is not responding at {}", config.extraction.base_url.bright_red());
    }

    let captioner = OcrCaptioner::from_settings(image_loader(&config)?, &config.ocr);
    let engine = captioner.engine();
    if engine.is_available().await {
        println!(" OCR engine {} is available", engine.name().bright_green());
    } else {
        println!(" OCR engine {} is not available", engine.name().bright_red());
    }

    Ok(())
}

async fn generate_config_command(output_path: PathBuf, format: ConfigFormat) -> Result<()> {
    println!("{}", " Generating example configuration...".bright_blue().bold());

    let config = Configuration::example();

    let content = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };

    tokio::fs::write(&output_path, content).await?;

    println!(" Example configuration generated at: {}", output_path.display().to_string().bright_green());
    println!(" Edit the file to customize for your use case");

    Ok(())
}
