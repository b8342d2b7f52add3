mod logger;
mod scan;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use thumbnail_cache::{
    cache_key, resolve_concurrency, PipelineConfig, PipelineEvent, ThumbnailPipeline,
};

#[derive(Parser)]
#[command(name = "thumbgrid")]
#[command(about = "Generate and cache grid thumbnails for a photo collection")]
struct Cli {
    /// Debug logging for thumbgrid crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// TOML config file (cache_root, memory_capacity, concurrency_limit, ...)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the thumbnail cache directory
    #[arg(long)]
    cache_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve thumbnails for every image under a collection folder
    Load {
        /// Collection root folder
        path: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Long-edge bound for generated thumbnails
        #[arg(long)]
        max_dimension: Option<u32>,

        /// Maximum images processed at once (clamped to the CPU-derived ceiling)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Delete every cached thumbnail
    ClearCache {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Print the cache key for a file
    Key {
        /// Directory containing the file
        collection_path: String,
        file_name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::setup_logging(cli.verbose);

    match cli.command {
        Commands::Load {
            path,
            pipeline,
            max_dimension,
            concurrency,
        } => {
            let mut config = build_config(&pipeline)?;
            if let Some(max_dimension) = max_dimension {
                config.max_dimension = max_dimension;
            }
            if concurrency.is_some() {
                config.concurrency_limit = concurrency;
            }
            load_collection(path, config)
        }
        Commands::ClearCache { pipeline } => {
            let config = build_config(&pipeline)?;
            let pipeline = ThumbnailPipeline::new(config)?;
            pipeline.clear_disk_cache()?;
            println!("Cleared {}", pipeline.cache_root().display());
            Ok(())
        }
        Commands::Key {
            collection_path,
            file_name,
        } => {
            println!("{}", cache_key(&collection_path, &file_name));
            Ok(())
        }
    }
}

fn build_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = &args.cache_root {
        config.cache_root = root.clone();
    }
    Ok(config)
}

fn load_collection(path: PathBuf, config: PipelineConfig) -> Result<()> {
    if !path.is_dir() {
        bail!("Not a directory: {}", path.display());
    }
    let root = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?;

    let files = scan::scan_folder(&root)?;
    if files.is_empty() {
        bail!("No supported image files found in {}", root.display());
    }
    let items = scan::items_for(&root, &files);

    log::info!(
        "Found {} images; using up to {} workers",
        items.len(),
        resolve_concurrency(config.concurrency_limit)
    );

    let pipeline = ThumbnailPipeline::new(config)?;
    pipeline.set_listener(|event| match event {
        PipelineEvent::Progress { progress, .. } => {
            log::debug!(
                "{}/{} ({:.0}%)",
                progress.current,
                progress.total,
                progress.completion_percentage()
            );
        }
        PipelineEvent::Finished { summary, .. } => {
            if summary.failed > 0 {
                log::warn!("{} images have no thumbnail", summary.failed);
            }
            println!(
                "{} thumbnails: {} from cache, {} generated, {} failed",
                summary.total, summary.cached, summary.generated, summary.failed
            );
        }
        _ => {}
    });

    let started = Instant::now();
    pipeline.load_thumbnails(&root, items);
    pipeline.wait_idle();

    log::info!(
        "Done in {:?}; cache at {}",
        started.elapsed(),
        pipeline.cache_root().display()
    );
    Ok(())
}
