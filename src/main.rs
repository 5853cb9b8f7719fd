use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixfetch::domain::entities::{PrefetchPriority, TargetSize};
use pixfetch::infrastructure::config::Command;
use pixfetch::infrastructure::{CliArgs, ConfigStore, ImageLoader, LoaderConfig, Prefetcher};

fn init_logging(config: &LoaderConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<LoaderConfig> {
    let store = ConfigStore::new().wrap_err("Failed to locate config directory")?;
    let mut config = store
        .load_config(args.config.as_deref())
        .wrap_err("Failed to load configuration")?;
    config.merge_with_args(args);
    Ok(config)
}

async fn run(command: Command, loader: Arc<ImageLoader>, config: &LoaderConfig) -> Result<()> {
    match command {
        Command::Load {
            url,
            width,
            height,
            scale,
            policy,
            priority,
            retries,
            output,
        } => {
            let mut options = loader.default_options();
            if let (Some(width), Some(height)) = (width, height) {
                options = options.with_target_size(TargetSize::new(width, height));
            }
            if let Some(policy) = policy {
                options = options.with_cache_policy(policy);
            }
            if let Some(priority) = priority {
                options = options.with_priority(priority);
            }
            if let Some(retries) = retries {
                options = options.with_retry_count(retries);
            }

            let loaded = loader
                .load(&url, scale, &options)
                .await
                .wrap_err_with(|| format!("Failed to load {url}"))?;
            println!(
                "{}x{} {}",
                loaded.image.width(),
                loaded.image.height(),
                loaded.metrics
            );

            if let Some(path) = output {
                let image = loaded.image;
                tokio::task::spawn_blocking(move || image.as_dynamic().save(&path))
                    .await?
                    .wrap_err("Failed to write image")?;
            }
        }
        Command::Prefetch { urls, policy } => {
            let prefetcher = Prefetcher::new(Arc::clone(&loader));
            prefetcher.prefetch(&urls, policy, PrefetchPriority::Normal);
            while prefetcher.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            println!("{}", loader.memory_cache_stats());
            let usage = loader.disk_cache().usage().await?;
            println!("disk: {} entries, {} bytes", usage.entries, usage.bytes);
        }
        Command::Trim {
            max_bytes,
            max_age_secs,
        } => {
            let max_bytes = max_bytes.unwrap_or(config.disk.max_size_bytes);
            let max_age = max_age_secs.map_or(config.disk.max_age(), Duration::from_secs);
            let report = loader
                .disk_cache()
                .trim(max_bytes, max_age)
                .await
                .wrap_err("Failed to trim disk cache")?;
            println!(
                "removed {} entries ({} bytes), {} bytes remain",
                report.removed_entries, report.removed_bytes, report.remaining_bytes
            );
        }
        Command::Clear => {
            loader.clear_all_caches().await;
            println!("cleared {}", loader.disk_cache().cache_dir().display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(
        version = pixfetch::VERSION,
        config = ?config.effective_config_path(),
        "Starting pixfetch"
    );

    let loader = Arc::new(
        ImageLoader::from_config(&config)
            .await
            .wrap_err("Failed to create image loader")?,
    );

    run(args.command, loader, &config).await
}
