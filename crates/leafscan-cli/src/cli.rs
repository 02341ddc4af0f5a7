use clap::{Parser, Subcommand};
use leafscan_classifiers::LeafscanConfig;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "leafscan.yaml";

#[derive(Parser, Debug)]
#[command(name = "leafscan")]
#[command(author, version, about = "Offline plant disease detection from leaf photos")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL serving model.json, classes.json and metadata.json
    #[arg(long, global = true, env = "LEAFSCAN_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory holding a bundled copy of the model
    #[arg(long, global = true)]
    pub bundled_dir: Option<PathBuf>,

    /// Persistent model store directory
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a leaf photograph
    Classify {
        /// Image file (JPEG, PNG, WebP or BMP)
        image: PathBuf,

        /// Expected plant type, e.g. "tomato"
        #[arg(short, long)]
        plant: Option<String>,

        /// Confidence threshold override (0.0-1.0)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Number of ranked predictions to show
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Discard cached copies and fetch the model again
    Reload {
        /// Suppress progress output
        #[arg(short, long)]
        silent: bool,
    },

    /// Load the model and check it against the label table
    Verify,

    /// List class labels
    Labels,

    /// Inspect or clear the local model caches
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List stored models
    List,

    /// Remove stored models and cached model responses
    Clear,
}

impl Cli {
    /// Load the configuration file and apply command line overrides.
    ///
    /// An explicit `--config` must exist; the default file is optional.
    pub fn load_config(&self) -> anyhow::Result<LeafscanConfig> {
        let mut config = match &self.config {
            Some(path) => LeafscanConfig::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => LeafscanConfig::from_file(DEFAULT_CONFIG_FILE)?,
            None => LeafscanConfig::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.model.base_url = Some(base_url.clone());
        }
        if let Some(dir) = &self.bundled_dir {
            config.model.bundled_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.store_dir {
            config.cache.store_dir = dir.clone();
        }

        if let Commands::Classify { threshold, top_k, .. } = &self.command {
            if threshold.is_some() {
                config.inference.confidence_threshold = *threshold;
            }
            if top_k.is_some() {
                config.inference.top_k = *top_k;
            }
        }

        config.validate()?;
        Ok(config)
    }
}
