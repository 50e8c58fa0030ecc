use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use riskledger_config::{ConfigLoader, RiskLedgerConfig, StoreBackend, WarningSeverity};
use riskledger_core::{ExecutionContext, LedgerError, Result, RiskLevel};
use riskledger_engine::{ChannelRouter, ProfileRegistry, StaticHealth};
use std::path::PathBuf;

mod audit;
mod ledger;
mod setup;

/// Risk-budget ledger and policy engine for autonomous executions
#[derive(Parser)]
#[command(name = "riskledger", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to riskledger.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Charge risk units against a profile's buckets and print the verdict
    Charge {
        /// Profile name
        profile: String,
        /// Risk units to charge
        #[arg(allow_negative_numbers = true)]
        cost: i64,
        /// Bucket to charge, or "all"
        #[arg(short, long, default_value = "all")]
        bucket: String,
        /// Action kind, matched against the band's allow/block lists
        #[arg(short, long, default_value = "READ")]
        action: String,
        #[command(flatten)]
        context: ContextArgs,
        #[command(flatten)]
        health: HealthArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the live band of one bucket
    Band {
        profile: String,
        bucket: String,
        #[command(flatten)]
        context: ContextArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show audit records
    Audit {
        /// Only records for this execution id (oldest first)
        #[arg(short, long)]
        execution: Option<String>,
        /// Number of entries to show (default 50)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset a bucket to its initial limit
    Reset {
        profile: String,
        bucket: String,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Raise a bucket's limit (administrative, not window-bounded)
    Extend {
        profile: String,
        bucket: String,
        /// Risk units to add to limit and remaining
        amount: u64,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// List configured profiles
    Profiles {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a config value in riskledger.toml (dot-notation key)
    Set {
        /// Config key in dot notation (e.g. store.fail_mode, logging.level)
        key: String,
        /// Value to set
        value: String,
    },
    /// Initialize a new riskledger.toml in the current or home directory
    Init {
        /// Create in current directory instead of ~/.riskledger/
        #[arg(long)]
        local: bool,
    },
    /// Check configuration, profiles, store and channels
    Doctor,
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Execution context fields used to resolve bucket keys.
#[derive(Args)]
struct ContextArgs {
    /// Execution id
    #[arg(short, long)]
    execution: String,
    /// Agent id
    #[arg(long)]
    agent: Option<String>,
    /// Group / team id
    #[arg(long)]
    group: Option<String>,
    /// Extra attributes as key=value pairs, referenced as {attr.key}
    #[arg(long = "attr", value_parser = parse_key_val)]
    attributes: Vec<(String, String)>,
}

impl ContextArgs {
    fn into_context(self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(self.execution);
        if let Some(agent) = self.agent {
            ctx = ctx.with_agent(agent);
        }
        if let Some(group) = self.group {
            ctx = ctx.with_group(group);
        }
        for (key, value) in self.attributes {
            ctx = ctx.with_attribute(key, value);
        }
        ctx
    }
}

/// Health signals reported for the execution, consulted by auto-extension.
#[derive(Args)]
struct HealthArgs {
    /// Recent error rate of the execution (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    error_rate: f64,
    /// Risk level of the execution: low, medium, high
    #[arg(long, default_value = "low")]
    risk_level: RiskLevel,
    /// Whether blocked actions were attempted recently
    #[arg(long)]
    blocked_actions: bool,
}

impl HealthArgs {
    fn into_signals(self) -> StaticHealth {
        StaticHealth {
            error_rate: self.error_rate,
            risk_level: self.risk_level,
            has_blocked_actions: self.blocked_actions,
        }
    }
}

/// Parse "key=value" CLI arguments.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };

        if config.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
                )
                .json()
                .with_target(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
                )
                .with_target(false)
                .init();
        }

        match self.command {
            Commands::Charge {
                profile,
                cost,
                bucket,
                action,
                context,
                health,
                json,
            } => {
                let request = ledger::ChargeRequest {
                    profile,
                    bucket,
                    action,
                    cost,
                };
                ledger::cmd_charge(&config, request, context.into_context(), health.into_signals(), json)
                    .await
            }
            Commands::Band {
                profile,
                bucket,
                context,
                json,
            } => ledger::cmd_band(&config, &profile, &bucket, context.into_context(), json).await,
            Commands::Audit {
                execution,
                limit,
                json,
            } => audit::cmd_audit(&config, execution.as_deref(), limit, json).await,
            Commands::Reset {
                profile,
                bucket,
                context,
            } => ledger::cmd_reset(&config, &profile, &bucket, context.into_context()).await,
            Commands::Extend {
                profile,
                bucket,
                amount,
                context,
            } => ledger::cmd_extend(&config, &profile, &bucket, amount, context.into_context()).await,
            Commands::Profiles { json } => Self::cmd_profiles(&config, json),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Set { key, value } => setup::cmd_config_set(config_loader.path(), &key, &value),
            Commands::Init { local } => setup::cmd_init(local),
            Commands::Doctor => Self::cmd_doctor(&config),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_profiles(config: &RiskLedgerConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config.profiles)?);
            return Ok(());
        }
        if config.profiles.is_empty() {
            println!("No profiles configured.");
            return Ok(());
        }
        for (name, profile) in &config.profiles {
            println!("\x1b[1m{name}\x1b[0m");
            for bucket in &profile.buckets {
                let ttl = bucket
                    .ttl_secs
                    .map(|t| format!(", ttl {t}s"))
                    .unwrap_or_default();
                println!(
                    "   {:<12} {:<10} key {:<18} limit {}{ttl}",
                    bucket.name,
                    bucket.scope.to_string(),
                    bucket.key,
                    bucket.limit
                );
            }
            if let Some(ext) = &profile.auto_extend {
                println!(
                    "   auto-extend: up to {} per {}s (error rate < {}, risk <= {})",
                    ext.max_extra, ext.window_secs, ext.max_error_rate, ext.max_risk_level
                );
            }
            for rule in &profile.notifications {
                println!("   notify '{}' on {}", rule.channel, rule.to);
            }
        }
        Ok(())
    }

    fn cmd_config(config: &RiskLedgerConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config)
                    .map_err(|e| LedgerError::Configuration(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: &RiskLedgerConfig) -> Result<()> {
        println!("🩺 riskledger doctor");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let mut ok_count = 0;
        match ProfileRegistry::from_config(config) {
            Ok(registry) => {
                println!("  ✅ {} profile(s) compile", registry.names().len());
                ok_count += 1;
            }
            Err(e) => {
                println!("  ❌ profiles: {e}");
                warn_count += 1;
            }
        }

        match config.store.backend {
            StoreBackend::Sqlite => match riskledger_store::SqliteStore::open(&config.store.db_path) {
                Ok(_) => {
                    println!("  ✅ store: sqlite at {}", config.store.db_path.display());
                    ok_count += 1;
                }
                Err(e) => {
                    println!("  ❌ store: {e}");
                    warn_count += 1;
                }
            },
            StoreBackend::Memory => {
                println!("  💡 store: memory backend, balances do not outlive the process");
                info_count += 1;
            }
        }

        match ChannelRouter::from_config(&config.channels, None) {
            Ok(router) => {
                println!("  ✅ {} notification channel(s)", router.len());
                ok_count += 1;
            }
            Err(LedgerError::Configuration(e)) if e.contains("event bus") => {
                println!("  💡 channels: event_bus channels only deliver in-process");
                info_count += 1;
            }
            Err(e) => {
                println!("  ❌ channels: {e}");
                warn_count += 1;
            }
        }

        println!();
        println!("  ✅ {ok_count} checks passed, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("riskledger v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "riskledger", &mut std::io::stdout());
        Ok(())
    }
}
