//! Zentinel SOAP codec binary.
//!
//! Run with: `zentinel-soap-codec --config codec.yaml encode --message getPrice --input data.yaml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_soap_codec::{Definitions, MessageCatalog, SoapCodecConfig, Value};

/// SOAP 1.1 envelope codec.
///
/// Encodes message data into SOAP envelopes and decodes envelopes back
/// into data, using the messages and schemas named in the configuration.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "codec.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode YAML or JSON data into an envelope
    Encode {
        /// Outbound message name
        #[arg(short, long)]
        message: String,

        /// Data file (.json is read as JSON, anything else as YAML)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Decode an envelope into YAML or JSON data
    Decode {
        /// Inbound message name
        #[arg(short, long)]
        message: String,

        /// Envelope file
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout carries the codec output
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel SOAP codec v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    // Load configuration
    let config = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        SoapCodecConfig::from_yaml(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        SoapCodecConfig::default()
    };

    let base = args.config.parent().unwrap_or_else(|| Path::new("."));
    let mut definitions = Vec::with_capacity(config.schema_files.len());
    for file in &config.schema_files {
        let path = base.join(file);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        definitions.push(
            Definitions::from_yaml(&content)
                .with_context(|| format!("Failed to parse schema file {}", path.display()))?,
        );
    }

    info!(
        version = ?config.version,
        schemas = config.schemas.len() + definitions.len(),
        messages = config.messages.len(),
        "Configuration loaded"
    );

    let catalog = MessageCatalog::new(config, definitions).context("Failed to build message catalog")?;

    match args.command {
        Command::Encode { message, input } => {
            let content = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let data = parse_data(&input, &content)?;
            let xml = catalog
                .encode(&message, &data)
                .with_context(|| format!("Failed to encode message '{}'", message))?;
            println!("{}", xml);
        }
        Command::Decode {
            message,
            input,
            format,
        } => {
            let body = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let value = catalog
                .decode(&message, &body)
                .with_context(|| format!("Failed to decode message '{}'", message))?;
            let output = match format {
                Format::Yaml => serde_yaml::to_string(&value).context("Failed to render YAML")?,
                Format::Json => {
                    serde_json::to_string_pretty(&value).context("Failed to render JSON")?
                }
            };
            println!("{}", output);
        }
    }

    let stats = catalog.stats();
    info!(encoded = stats.encoded, decoded = stats.decoded, "Done");
    Ok(())
}

fn parse_data(path: &Path, content: &str) -> Result<Value> {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(content).context("Failed to parse JSON data")
    } else {
        serde_yaml::from_str(content).context("Failed to parse YAML data")
    }
}
