//! Subcommand implementations

use crate::cli::{CacheCommands, Commands};
use anyhow::{bail, Context, Result};
use leafscan_classifiers::response_cache::purge_matching;
use leafscan_classifiers::store::remove_with_prefix;
use leafscan_classifiers::{
    ClassifyOptions, FsModelStore, FsResponseCache, ImageInput, InferencePipeline, LeafscanConfig,
    ModelStore,
};
use leafscan_core::{display_label, Outcome, ProgressFn};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Run one subcommand
pub async fn run(command: Commands, config: &LeafscanConfig, json: bool) -> Result<()> {
    match command {
        Commands::Classify { image, plant, .. } => classify(config, image, plant, json).await,
        Commands::Reload { silent } => reload(config, silent, json).await,
        Commands::Verify => verify(config, json).await,
        Commands::Labels => labels(config, json).await,
        Commands::Cache { command } => match command {
            CacheCommands::List => cache_list(config, json).await,
            CacheCommands::Clear => cache_clear(config, json).await,
        },
    }
}

async fn classify(config: &LeafscanConfig, image: PathBuf, plant: Option<String>, json: bool) -> Result<()> {
    let manager = config.build_manager()?;
    let pipeline = InferencePipeline::for_manager(&manager).await;

    let progress: Option<&ProgressFn> = if json { None } else { Some(&print_progress) };
    manager
        .ensure_ready(progress)
        .await
        .context("Failed to load the plant disease model")?;
    finish_progress(json);

    let options = ClassifyOptions {
        plant_hint: plant,
        ..config.classify_options()
    };
    let outcome = pipeline
        .classify_with_recovery(&manager, ImageInput::Path(image.clone()), &options)
        .await
        .with_context(|| format!("Failed to classify {}", image.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    manager.shutdown().await;
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Detected(result) => {
            println!("{} ({:.2}%)", result.display_label, result.confidence * 100.0);
            if result.hint_applied {
                println!("  (matched to the requested plant type)");
            }
            if result.top_k.len() > 1 {
                println!();
                for (rank, prediction) in result.top_k.iter().enumerate() {
                    println!(
                        "  {}. {:<45} {:>6.2}%",
                        rank + 1,
                        prediction.display_label(),
                        prediction.confidence * 100.0
                    );
                }
            }
        }
        Outcome::LowConfidence(low) => {
            println!(
                "Low confidence ({:.2}%, threshold {:.0}%)",
                low.confidence * 100.0,
                low.threshold * 100.0
            );
            println!("  Best guess: {}", low.best.display_label());
            println!("  Try a clearer, well lit photo of a single leaf.");
        }
    }
}

async fn reload(config: &LeafscanConfig, silent: bool, json: bool) -> Result<()> {
    let manager = config.build_manager()?;

    let quiet = silent || json;
    let progress: Option<&ProgressFn> = if quiet { None } else { Some(&print_progress) };
    let handle = manager
        .force_reload(silent, progress)
        .await
        .context("Failed to reload the plant disease model")?;
    finish_progress(quiet);

    if json {
        let summary = serde_json::json!({
            "source": handle.source(),
            "storage_key": handle.storage_key(),
            "input_shape": [handle.input_height(), handle.input_width(), handle.input_channels()],
            "classes": handle.num_classes(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !silent {
        println!("Reloaded model from {} ({} classes)", handle.source(), handle.num_classes());
    }

    manager.shutdown().await;
    Ok(())
}

async fn verify(config: &LeafscanConfig, json: bool) -> Result<()> {
    let manager = config.build_manager()?;
    let handle = manager
        .ensure_ready(None)
        .await
        .context("Failed to load the plant disease model")?;
    let labels = manager.labels().await;
    let compatible = manager.verify_compatibility(&handle).await;

    if json {
        let summary = serde_json::json!({
            "compatible": compatible,
            "source": handle.source(),
            "input_shape": [handle.input_height(), handle.input_width(), handle.input_channels()],
            "classes": handle.num_classes(),
            "labels": labels.len(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Model from {}: input {}x{}x{}, {} classes, {} labels",
            handle.source(),
            handle.input_height(),
            handle.input_width(),
            handle.input_channels(),
            handle.num_classes(),
            labels.len()
        );
    }

    manager.shutdown().await;
    if !compatible {
        bail!("Model output does not match the label table");
    }
    Ok(())
}

async fn labels(config: &LeafscanConfig, json: bool) -> Result<()> {
    let manager = config.build_manager()?;
    let labels = manager.labels().await;

    if json {
        let labels: Vec<&str> = labels.iter().collect();
        println!("{}", serde_json::to_string_pretty(&labels)?);
    } else {
        for (index, label) in labels.iter().enumerate() {
            println!("{:>3}  {}", index, display_label(label));
        }
    }
    Ok(())
}

async fn cache_list(config: &LeafscanConfig, json: bool) -> Result<()> {
    let store = FsModelStore::new(config.cache.store_dir.clone());
    let entries = store.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No stored models in {}", store.root().display());
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:<55} {:>10}  {}",
            entry.key,
            format_size(entry.size_bytes),
            entry.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

async fn cache_clear(config: &LeafscanConfig, json: bool) -> Result<()> {
    let store = FsModelStore::new(config.cache.store_dir.clone());
    let removed = remove_with_prefix(&store, &config.model.cache_key_prefix).await?;

    let response_cache = FsResponseCache::new(config.cache.response_cache_dir.clone());
    let purged = purge_matching(&response_cache, &config.cache.purge_markers).await?;
    info!("Cleared {} stored model(s) and {} response cache entries", removed.len(), purged.len());

    if json {
        let summary = serde_json::json!({ "removed": removed, "purged": purged });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Removed {} stored model(s) and {} cached response(s)",
            removed.len(),
            purged.len()
        );
    }
    Ok(())
}

fn print_progress(fraction: f32) {
    eprint!("\rDownloading model... {:>3.0}%", fraction * 100.0);
    let _ = std::io::stderr().flush();
}

fn finish_progress(quiet: bool) {
    if !quiet {
        eprintln!();
    }
}

/// Human readable byte size
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
