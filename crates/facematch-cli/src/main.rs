use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{Matcher, Region};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod gallery;

use config::Config;
use engine::EngineHandle;
use gallery::Gallery;

#[derive(Parser)]
#[command(name = "facematch", about = "Face embedding extraction and matching")]
struct Cli {
    /// TOML config file (overrides FACEMATCH_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of one or more images as JSON lines
    Embed {
        images: Vec<PathBuf>,
        /// Face region as x,y,width,height (default: centered 60% box)
        #[arg(short, long, value_parser = parse_region)]
        region: Option<Region>,
    },
    /// Enroll a face into the gallery
    Enroll {
        image: PathBuf,
        /// Label for this face (e.g., a person's name)
        #[arg(short, long)]
        label: String,
        #[arg(short, long, value_parser = parse_region)]
        region: Option<Region>,
    },
    /// Match a face against the gallery
    Verify {
        image: PathBuf,
        #[arg(short, long, value_parser = parse_region)]
        region: Option<Region>,
    },
    /// Compare the faces in two images
    Compare { first: PathBuf, second: PathBuf },
    /// List enrolled faces
    List,
    /// Remove an enrolled face
    Remove {
        /// Model ID to remove
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Embed { images, region } => {
            if images.is_empty() {
                bail!("no images given");
            }
            let engine = start_engine(&config)?;
            // Queue every image up front; the engine works through them in order.
            let pending: Vec<_> = images
                .into_iter()
                .map(|path| {
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.embed(path, region).await })
                })
                .collect();
            for task in pending {
                let result = task.await??;
                let embedding = &result.extraction.embedding;
                println!(
                    "{}",
                    serde_json::json!({
                        "step": result.extraction.path,
                        "seed": result.seed,
                        "provenance": embedding.provenance(),
                        "values": embedding.values(),
                    })
                );
            }
        }
        Commands::Enroll {
            image,
            label,
            region,
        } => {
            let engine = start_engine(&config)?;
            let result = engine.embed(image.clone(), region).await?;
            let embedding = result.extraction.embedding;
            if embedding.is_fallback() && !config.store_fallback {
                bail!(
                    "could not extract a real embedding from {}; refusing to enroll a placeholder \
                     (set FACEMATCH_STORE_FALLBACK=1 to override)",
                    image.display()
                );
            }

            let mut gallery = Gallery::load(&config.gallery_path)?;
            let model = gallery.add(&label, embedding);
            let id = model.id.clone();
            gallery.save(&config.gallery_path)?;
            tracing::info!(id = %id, label = %label, "enrolled");
            println!("{id}");
        }
        Commands::Verify { image, region } => {
            let matcher = config.build_matcher()?;
            let gallery = Gallery::load(&config.gallery_path)?;
            let engine = start_engine(&config)?;
            let result = engine.embed(image, region).await?;

            let outcome = matcher.best_match(&result.extraction.embedding, &gallery.records())?;
            let label = outcome
                .candidate_id
                .as_deref()
                .and_then(|id| gallery.get(id))
                .map(|m| m.label.clone());
            println!(
                "{}",
                serde_json::json!({
                    "matched": outcome.is_match,
                    "similarity": outcome.similarity,
                    "convention": matcher.policy().convention,
                    "model_id": outcome.candidate_id,
                    "label": label,
                    "degraded": outcome.degraded,
                })
            );
        }
        Commands::Compare { first, second } => {
            let matcher = config.build_matcher()?;
            let engine = start_engine(&config)?;
            let a = engine.embed(first, None).await?.extraction.embedding;
            let b = engine.embed(second, None).await?.extraction.embedding;

            let score = matcher.score(&a, &b);
            let degraded = a.is_fallback() || b.is_fallback();
            println!(
                "{}",
                serde_json::json!({
                    "similarity": score,
                    "convention": matcher.policy().convention,
                    "same_person": matcher.is_match(score) && !degraded,
                    "degraded": degraded,
                })
            );
        }
        Commands::List => {
            let gallery = Gallery::load(&config.gallery_path)?;
            if gallery.models.is_empty() {
                println!("No faces enrolled");
            }
            for m in &gallery.models {
                println!(
                    "{}  {}  {}  {:?}",
                    m.id,
                    m.label,
                    m.created_at,
                    m.embedding.provenance()
                );
            }
        }
        Commands::Remove { id } => {
            let mut gallery = Gallery::load(&config.gallery_path)?;
            if !gallery.remove(&id) {
                bail!("no enrolled face with id {id}");
            }
            gallery.save(&config.gallery_path)?;
            println!("Removed {id}");
        }
    }

    Ok(())
}

fn start_engine(config: &Config) -> Result<EngineHandle> {
    let pipeline = config.build_pipeline()?;
    Ok(engine::spawn_engine(pipeline, config.queue_depth)?)
}

/// Parse `x,y,width,height` into a region.
fn parse_region(s: &str) -> Result<Region, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid region {s:?}: {e}"))?;
    match parts[..] {
        [x, y, width, height] => Ok(Region::new(x, y, width, height)),
        _ => Err(format!("region needs 4 comma-separated values, got {}", parts.len())),
    }
}
