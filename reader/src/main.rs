//! Storybook reader.
//!
//! Reads a story from a JSON file and drives a reading session over a simple
//! line protocol on stdin/stdout, suitable for scripts and automated testing:
//!
//! ```bash
//! cargo run -p reader -- reader/stories/sample.json --name Wren --cache-dir .art
//! ```
//!
//! Set `GEMINI_API_KEY` (or put it in `.env`) to illustrate scenes. Without a
//! key the reader still works and pages fall back to authored art.

mod headless;

use std::sync::Arc;
use std::time::Instant;
use storybook_core::{Character, EngineConfig, Illustrator, ReadingSession, Story};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays a clean protocol stream
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storybook_core=info,reader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = match headless::parse_options(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {message}");
            print_help();
            std::process::exit(2);
        }
    };

    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = &options.cache_dir {
        config = config.with_cache_dir(dir);
    }

    let story = Arc::new(Story::load(&options.story_path).await?);
    let character = match &options.character_path {
        Some(path) => {
            let content = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<Character>(&content)?
        }
        None => Character::new(options.name.clone()),
    };

    let cache = config.build_cache(Arc::clone(&story)).await?;
    let now = Instant::now();
    let session = match &options.resume_path {
        Some(path) => {
            ReadingSession::resume(Arc::clone(&story), config.navigator.clone(), path, now).await?
        }
        None => ReadingSession::new(Arc::clone(&story), config.navigator.clone(), now),
    }
    .with_illustrator(Illustrator::new(cache, character));

    tracing::info!(title = %story.title(), session = %session.id(), "Reader ready");
    headless::run_headless(session).await?;
    Ok(())
}

fn print_help() {
    println!("Storybook reader");
    println!();
    println!("Usage: reader <story.json> [options]");
    println!();
    println!("Options:");
    println!("  --name <name>          Reader character name (default: Reader)");
    println!("  --character <file>     Character JSON from a character creator");
    println!("  --cache-dir <dir>      Persist illustrations in this directory");
    println!("  --resume <file>        Continue from a saved bookmark");
    println!("  -h, --help             Show this help");
    println!();
    println!("Environment:");
    println!("  GEMINI_API_KEY, GEMINI_MODEL, STORYBOOK_CACHE_DIR,");
    println!("  STORYBOOK_PER_CHARACTER_ART, STORYBOOK_STYLE, RUST_LOG");
}
