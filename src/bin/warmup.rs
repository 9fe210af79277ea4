//! Fetch and initialize every known model once, so that the service starts warm.
//!
//! Exits non-zero if any model failed to load.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session_lru::config::ServiceConfig;
use session_lru::{preload, FilesystemSessionFactory, SessionCache};

#[derive(Parser, Debug)]
#[command(
    name = "session-warmup",
    version,
    about = "Preload every model session in the catalog"
)]
struct Args {
    /// Directory holding one weights file per model
    #[arg(short, long, default_value = "models")]
    models_dir: PathBuf,

    /// Extension of the weights files
    #[arg(long, default_value = "onnx")]
    extension: String,

    /// Sessions kept alive during the pass (overrides MAX_SESSIONS)
    #[arg(long)]
    max_sessions: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_lru=info,session_warmup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match ServiceConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };
    if let Some(n) = args.max_sessions {
        if n == 0 {
            error!("--max-sessions must be at least 1");
            return ExitCode::from(2);
        }
        config.max_sessions = n;
    }
    let catalog = match config.catalog() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid catalog");
            return ExitCode::from(2);
        }
    };

    let factory = FilesystemSessionFactory::with_extension(&args.models_dir, &args.extension);
    info!(models_dir = %factory.root_path().display(), "Loading weights");
    let cache = SessionCache::new(factory, catalog, config.cache_config());
    let report = preload(&cache);

    println!("\n=== SUMMARY ===");
    println!("OK: {:?}", report.succeeded().collect::<Vec<_>>());
    println!(
        "FAILED: {:?}",
        report.failed().map(|(name, _)| name).collect::<Vec<_>>()
    );
    if !report.is_clean() {
        println!("\nDetails:");
        for (name, why) in report.failed() {
            println!("- {}: {}", name, why);
        }
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
