//! bfbridge - command-line client for the Bio-Formats bridge.
//!
//! Detects proprietary microscopy files, prints their metadata and converts
//! them to pyramidal tiled TIFF.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bioformats_bridge::{
    config::{Cli, Command, ConvertConfig, DetectConfig, PropertiesConfig, TileConfig},
    detect_format, BioFormatsFormat, BridgeClient, Convertor, MetadataCache, MetadataError,
    MetadataParser, TilePreview,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.into_command() {
        Command::Detect(config) => run_detect(config),
        Command::Properties(config) => run_properties(config),
        Command::Convert(config) => run_convert(config),
        Command::Tile(config) => run_tile(config),
    }
}

/// Initialize the tracing/logging subsystem.
///
/// Logs go to stderr; stdout carries command output.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "bioformats_bridge=debug"
    } else {
        "bioformats_bridge=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Pretty-print a JSON document on stdout.
fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Detect Command
// =============================================================================

fn run_detect(config: DetectConfig) -> ExitCode {
    match detect_format(&config.path) {
        Ok(entry) => print_json(&serde_json::json!({
            "path": config.path,
            "format": entry.format,
            "name": entry.name,
            "identifier": entry.identifier,
            "is_spatial": entry.is_spatial,
            "need_conversion": entry.need_conversion,
        })),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Properties Command
// =============================================================================

fn run_properties(config: PropertiesConfig) -> ExitCode {
    if let Err(e) = config.bridge.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let client = BridgeClient::from_config(&config.bridge);
    let cache = MetadataCache::from_config(&config.bridge);
    let format = match BioFormatsFormat::open(&config.path, &client, &cache) {
        Ok(format) => format,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match collect_properties(&format, &config) {
        Ok(document) => print_json(&document),
        Err(e) => {
            error!("Failed to read metadata of {}: {}", config.path.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn collect_properties(
    format: &BioFormatsFormat<'_>,
    config: &PropertiesConfig,
) -> Result<serde_json::Value, MetadataError> {
    let to_json = |value: serde_json::Result<serde_json::Value>| {
        value.map_err(|e| MetadataError::InvalidValue {
            key: "output".to_string(),
            message: e.to_string(),
        })
    };

    let mut document = serde_json::Map::new();
    document.insert("format".into(), format.entry().name.into());
    document.insert(
        "metadata".into(),
        to_json(serde_json::to_value(format.parse_known_metadata()?))?,
    );
    if config.pyramid {
        document.insert(
            "pyramid".into(),
            to_json(serde_json::to_value(format.parse_pyramid()?))?,
        );
    }
    if config.planes {
        document.insert(
            "planes".into(),
            to_json(serde_json::to_value(format.parse_planes()?))?,
        );
    }
    if config.raw {
        document.insert(
            "raw".into(),
            to_json(serde_json::to_value(format.parse_raw_metadata()?))?,
        );
    }
    Ok(serde_json::Value::Object(document))
}

// =============================================================================
// Convert Command
// =============================================================================

fn run_convert(config: ConvertConfig) -> ExitCode {
    if let Err(e) = config.bridge.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Bridge: {}", config.bridge.address());

    let client = BridgeClient::from_config(&config.bridge);
    let cache = MetadataCache::from_config(&config.bridge);
    let format = match BioFormatsFormat::open(&config.source, &client, &cache) {
        Ok(format) => format.with_tile_options(config.bridge.tile_options()),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match format.convert(&config.destination) {
        Ok(outcome) => {
            info!(
                "Wrote {} ({}, {} page(s), {} level(s))",
                config.destination.display(),
                outcome.format.name(),
                outcome.pages,
                outcome.levels
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Conversion of {} failed: {}", config.source.display(), e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Tile Command
// =============================================================================

fn run_tile(config: TileConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let jpeg = TilePreview::open(&config.path).and_then(|preview| {
        preview.jpeg_tile(config.page, config.level, config.index, config.quality)
    });
    let jpeg = match jpeg {
        Ok(jpeg) => jpeg,
        Err(e) => {
            error!("Failed to read tile: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(&config.output, &jpeg) {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        "Wrote tile {} of page {} level {} to {} ({} bytes)",
        config.index,
        config.page,
        config.level,
        config.output.display(),
        jpeg.len()
    );
    ExitCode::SUCCESS
}
