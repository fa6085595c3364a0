use crate::config::BatchConfig;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StepKind {
    Organize,
    Purge,
    Scrape,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "comixed-batch")]
#[command(about = "Runs the organize, purge and scrape batch steps over a comic library")]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "comixed-batch.toml")]
    pub config: String,

    /// Run only these steps (they must also be enabled in the configuration)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<StepKind>,

    /// Override the exclusive check-out feature flag
    #[arg(long)]
    pub exclusive_lock: Option<bool>,

    /// Override monitoring setting from config
    #[arg(long)]
    pub monitor: Option<bool>,

    /// Show what would be processed without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// 將命令列覆蓋設定套用到配置
    pub fn apply_overrides(&self, config: &mut BatchConfig) {
        if let Some(exclusive_lock) = self.exclusive_lock {
            config.features.exclusive_lock = exclusive_lock;
            tracing::info!("🔧 Exclusive lock overridden to: {}", exclusive_lock);
        }

        if !self.only.is_empty() {
            config.organize.enabled &= self.only.contains(&StepKind::Organize);
            config.purge.enabled &= self.only.contains(&StepKind::Purge);
            config.scrape.enabled &= self.only.contains(&StepKind::Scrape);
            tracing::info!("🔧 Restricted to steps: {:?}", self.only);
        }
    }

    pub fn monitoring_enabled(&self, config: &BatchConfig) -> bool {
        self.monitor.unwrap_or_else(|| config.monitoring_enabled())
    }
}
