use anyhow::{Context, Result};
use bdelin::commons::logging::init_logging;
use bdelin::{Pipeline, Settings};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "bdelin",
    version,
    about = "Boundary delineation: segment attributes and boundary classification"
)]
struct Cli {
    /// JSON settings file, defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Segment a raster with the configured external tool
    Segment {
        /// Raster to segment (default: rgb_raster_file)
        raster: Option<PathBuf>,
    },
    /// Extract candidate boundary lines from segmentation polygons
    Edges {
        /// Polygon layer (default: raw_segments_file)
        segments: Option<PathBuf>,
    },
    /// Calculate geometric and radiometric line attributes
    Attributes {
        /// Line layer (default: segment_file)
        edges: Option<PathBuf>,
    },
    /// Train and store a boundary classifier
    Train {
        /// Labelled line layer (default: training_layer)
        training: Option<PathBuf>,
    },
    /// Predict boundaries with the stored classifier
    Predict {
        /// Line layer with attributes (default: validation_layer)
        layer: Option<PathBuf>,
    },
    /// Run segmentation, boundaries, attributes and classification
    Run,
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    match path {
        Some(path) => {
            Settings::load(path).with_context(|| format!("Failed to load settings from {:?}", path))
        }
        None => Ok(Settings::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref())?;
    let log_file = init_logging(&settings, cli.verbose).context("Failed to set up logging")?;
    if let Some(log_file) = log_file {
        info!("Logging to {:?}", log_file);
    }

    let pipeline = Pipeline::new(&settings);
    match cli.command {
        Commands::Segment { raster } => {
            let artifact = pipeline.segment(raster.as_deref())?;
            println!("{}", artifact.path.display());
        }
        Commands::Edges { segments } => {
            let artifact = pipeline.extract_boundaries(segments.as_deref())?;
            println!("{}", artifact.path.display());
        }
        Commands::Attributes { edges } => {
            let artifact = pipeline.calculate_attributes(edges.as_deref())?;
            println!("{}", artifact.path.display());
        }
        Commands::Train { training } => {
            let name = pipeline.train_classifier(training.as_deref())?;
            println!("{}", name);
        }
        Commands::Predict { layer } => {
            let artifact = pipeline.apply_classifier(layer.as_deref())?;
            println!("{}", artifact.path.display());
        }
        Commands::Run => {
            let summary = pipeline.run()?;
            let last = summary.classified.as_ref().unwrap_or(&summary.attributes);
            println!("{}", last.path.display());
        }
    }
    Ok(())
}
