use clap::Parser;
use comixed_batch::adapters::TracingPublisher;
use comixed_batch::domain::model::Marker;
use comixed_batch::domain::ports::{ComicStore, Storage};
use comixed_batch::utils::error::ErrorSeverity;
use comixed_batch::utils::{logger, validation::Validate};
use comixed_batch::{
    app, BatchConfig, BatchEngine, BatchError, CheckOutRegistry, CliArgs, InMemoryComicStore,
    LocalStorage,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("🚀 Starting comixed-batch");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    let mut config = match BatchConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    args.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }
    if args.verbose {
        tracing::debug!("Batch config: {:?}", config);
    }

    let storage = LocalStorage::new(config.library.root.clone());
    let store = Arc::new(InMemoryComicStore::from_json(
        &storage.read_file(&config.library.database).await?,
    )?);
    tracing::info!("📚 Library loaded with {} comics", store.len().await);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No actual processing will occur");
        perform_dry_run(&config, store.as_ref()).await?;
        return Ok(());
    }

    let registry = CheckOutRegistry::new(Arc::new(config.feature_flags()));
    if !registry.exclusive_lock_enabled() {
        tracing::warn!("⚠️  Exclusive check-out is disabled; steps may touch the same comic");
    }

    let publisher = Arc::new(TracingPublisher);
    let steps = app::build_steps(&config, store.clone(), publisher.clone(), storage.clone()).await?;

    let monitor_enabled = args.monitoring_enabled(&config);
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let mut engine = BatchEngine::new_with_monitoring(
        store.clone(),
        publisher,
        registry,
        config.runner_options(),
        monitor_enabled,
    );
    for step in steps {
        engine.add_step(step);
    }
    tracing::info!("🧩 Steps: {}", engine.step_names().join(", "));

    let outcome = engine.run().await;

    // 即使有步驟失敗，也保存已完成的變更
    storage
        .write_file(&config.library.database, &store.to_json().await?)
        .await?;

    match outcome {
        Ok(summaries) => {
            println!("✅ Batch completed successfully!");
            for summary in summaries {
                println!(
                    "   {:<9} read {:>4}  written {:>4}  skipped {:>4}  failed {:>4}  ({:?})",
                    summary.step,
                    summary.read,
                    summary.written,
                    summary.skipped,
                    summary.failed,
                    summary.elapsed
                );
            }
        }
        Err(e) => exit_with(e),
    }

    Ok(())
}

async fn perform_dry_run(config: &BatchConfig, store: &dyn ComicStore) -> anyhow::Result<()> {
    let planned = [
        ("organize", config.organize.enabled, Marker::Organizing),
        ("purge", config.purge.enabled, Marker::Purging),
        ("scrape", config.scrape.enabled, Marker::BatchScraping),
    ];

    for (name, enabled, marker) in planned {
        if !enabled {
            println!("   {:<9} disabled", name);
            continue;
        }
        let pending = store.find_marked(marker, usize::MAX).await?;
        println!("   {:<9} {} comics pending", name, pending.len());
        for comic in pending.iter().take(10) {
            tracing::info!("   - {} {}", comic.id, comic.filename);
        }
    }
    Ok(())
}

fn exit_with(e: BatchError) {
    tracing::error!(
        "❌ Batch failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    if exit_code > 0 {
        std::process::exit(exit_code);
    }
}
