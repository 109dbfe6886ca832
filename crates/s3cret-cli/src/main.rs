//! s3cret: client-side encrypted copies into S3
//!
//! Commands:
//!   cp <local> <s3://bucket/key>   - encrypt a local file and upload it
//!
//! Credentials and region come from the standard AWS provider chain
//! (AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY, AWS_PROFILE, instance role).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use s3cret_core::{S3cretConfig, StorageLocator};
use s3cret_storage::{MemoryStore, MultipartStore};
use s3cret_transfer::{CopyOutcome, ProgressFn, UploadMethod};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "s3cret",
    version,
    about = "Client-side encrypted uploads to S3",
    long_about = "s3cret: encrypt files locally with XChaCha20-Poly1305 and store them as S3 multipart uploads"
)]
struct Cli {
    /// Path to s3cret.toml configuration file
    #[arg(long, short = 'c', env = "S3CRET_CONFIG", default_value = "s3cret.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "S3CRET_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "S3CRET_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a local file and copy it to s3://bucket/key
    Cp {
        /// Local file to upload
        local: PathBuf,
        /// Destination, e.g. s3://my-bucket/backups/db.dump
        dest: String,
        /// Run the full pipeline against an in-memory store instead of S3
        #[arg(long)]
        dry_run: bool,
        /// Fail instead of using a single PutObject when the file is too small for multipart
        #[arg(long)]
        no_fallback: bool,
        /// Plaintext bytes per encrypted chunk (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Minimum bytes per non-final part (overrides config)
        #[arg(long)]
        min_part_size: Option<usize>,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "s3cret starting"
    );

    match cli.command {
        Commands::Cp {
            local,
            dest,
            dry_run,
            no_fallback,
            chunk_size,
            min_part_size,
        } => {
            if let Some(n) = chunk_size {
                config.transfer.chunk_size = n;
            }
            if let Some(n) = min_part_size {
                config.transfer.min_part_size = n;
            }
            if no_fallback {
                config.transfer.single_shot_fallback = false;
            }
            cmd_cp(&config, &local, &dest, dry_run).await
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout carries only the copy summary.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Returns the parsed config and whether the file existed.
async fn load_config(path: &Path) -> Result<(S3cretConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((S3cretConfig::default(), false))
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .context("progress bar template")?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

// ── `s3cret cp` ───────────────────────────────────────────────────────────────

async fn cmd_cp(config: &S3cretConfig, local: &Path, dest: &str, dry_run: bool) -> Result<()> {
    let locator: StorageLocator = dest.parse()?;

    let store: Arc<dyn MultipartStore> = if dry_run {
        Arc::new(MemoryStore::with_min_part_size(config.transfer.min_part_size))
    } else {
        Arc::new(
            s3cret_storage::build_store(&config.storage)
                .await
                .context("building S3 client")?,
        )
    };

    println!(
        "Copying {} → {}{}",
        local.display(),
        locator,
        if dry_run { " (dry run)" } else { "" }
    );

    let pb = make_progress_bar(0, "cp")?;
    pb.set_message(local.display().to_string());

    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let result =
        s3cret_transfer::copy(store, local, &locator, &config.transfer, Some(&progress)).await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            pb.abandon_with_message("failed");
            let kind = e.kind();
            return Err(e).with_context(|| format!("copy to {locator} failed ({kind})"));
        }
    };
    pb.finish_with_message("done");

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &CopyOutcome) {
    match &outcome.method {
        UploadMethod::Multipart { upload_id, parts } => {
            println!("  method:  multipart ({parts} parts, upload {upload_id})");
        }
        UploadMethod::SingleShot => println!("  method:  single request"),
    }
    println!(
        "  hash:    {}",
        &outcome.content_hash[..16.min(outcome.content_hash.len())]
    );
    println!("  chunks:  {}", outcome.chunks);
    println!("  bytes:   {}", fmt_bytes(outcome.plaintext_bytes));
    println!("  stored:  {}", fmt_bytes(outcome.stored_bytes));
    println!("  session: {}", outcome.session_id);
    if let Some(e_tag) = &outcome.e_tag {
        println!("  etag:    {e_tag}");
    }
    println!("  remote:  s3://{}/{}", outcome.bucket, outcome.key);
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
