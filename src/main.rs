use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use glimpse::cache::Cache;
use glimpse::config::Config;
use log::info;

#[derive(Parser)]
#[command(name = "glimpse")]
#[command(about = "Preview-cache generator for media directory trees")]
#[command(long_about = "\
Preview-cache generator for media directory trees

Point glimpse at a directory of videos and image galleries and it maintains
a shadow cache next to the originals, without ever touching them:

  media/
  ├── .glimpse/
  │   ├── media.json               # All cached entries, for consumers
  │   ├── problems.json            # Entries that failed to cache, with causes
  │   └── cache/
  │       ├── holiday.mp4/         # Mirrors the source path
  │       │   ├── meta.json        # Streams, chapters, duration, size
  │       │   ├── preview.webp     # Static cover
  │       │   ├── animated.webp    # Short scene montage
  │       │   ├── previews/        # One still per scene
  │       │   ├── storyboard.webp  # Seek-bar thumbnail sheet + .vtt cues
  │       │   └── file-index.txt   # Everything the generator created
  │       └── comics/issue-1/      # Galleries cache the same way
  ├── holiday.mp4
  └── comics/issue-1/              # Directory of numbered images

A directory counts as a gallery when it holds more than five images with
numbered filenames. Cache entries are regenerated when the source changes
and removed when it disappears; files glimpse did not create are never
deleted.

Configuration is read from .glimpse.toml in the source root (all settings
optional). Run 'glimpse gen-config' to print the defaults as a starting
point. Requires ffmpeg and ffprobe on PATH unless [tools] overrides them.")]
#[command(version)]
struct Cli {
    /// Media directory to cache
    #[arg(long, default_value = ".", global = true)]
    source: PathBuf,

    /// Config file (default: <source>/.glimpse.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep the cache fresh, re-scanning periodically until interrupted
    Run {
        /// Seconds between scans (overrides the config)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run a single cache iteration: invalidate, then generate
    Once,
    /// Remove stale cache entries without generating anything
    Invalidate,
    /// Generate missing and stale cache entries without invalidating first
    Generate,
    /// Delete the whole shadow cache directory
    Remove {
        /// Log deletion failures instead of aborting on them
        #[arg(long)]
        ignore_errors: bool,
    },
    /// Print a config file with all options at their defaults
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref(), &cli.source)?;

    match cli.command {
        Command::Run { interval } => {
            if let Some(secs) = interval {
                config.cache.scan_interval = Some(secs);
            }
            let cache = Cache::new(&cli.source, &config)?;
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::Relaxed);
            })?;
            info!(
                "watching {} every {}s",
                cli.source.display(),
                config.cache.scan_interval_secs()
            );
            cache.run(&shutdown)?;
        }
        Command::Once => {
            let cache = Cache::new(&cli.source, &config)?;
            cache.iteration()?;
        }
        Command::Invalidate => {
            let cache = Cache::new(&cli.source, &config)?;
            cache.invalidate()?;
        }
        Command::Generate => {
            let cache = Cache::new(&cli.source, &config)?;
            cache.generate()?;
        }
        Command::Remove { ignore_errors } => {
            let cache = Cache::new(&cli.source, &config)?;
            cache.remove(ignore_errors)?;
        }
        Command::GenConfig => {
            print!("{}", Config::default().to_toml()?);
        }
    }

    Ok(())
}
