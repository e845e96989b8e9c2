use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lp_store::{
    backup::{DEFAULT_RESTORABLE_LIMIT, DEFAULT_RETENTION_DAYS},
    backup_all_encrypted, backup_user_messages, census, generate_key_pair, load_or_generate,
    BackupStore, FileKeyStore, KeyStore, OverwritePolicy, RepairEngine, SqliteMessageStore,
};

mod config;

use crate::config::MaintConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lockpost maintenance tool", long_about = None)]
struct Cli {
    /// Config file (JSON). Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Message database, overriding the config file.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan stored messages and repair broken records
    Repair {
        /// Count what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Records fetched per page
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Print a census of stored messages
    Stats,
    /// Back up message records and manage existing backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Create (or show) a user's keypair
    Keygen {
        #[arg(long)]
        user: String,

        /// Key directory, overriding the config file
        #[arg(long)]
        key_dir: Option<PathBuf>,

        /// Replace an existing keypair. Messages sealed to the old key
        /// become unreadable for this user.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BackupAction {
    /// Back up every encrypted message not yet backed up
    All,
    /// Back up every message a user sent or received
    User {
        #[arg(long)]
        user: String,
    },
    /// Print backup totals
    Stats,
    /// Delete non-restorable backups older than the given age
    Cleanup {
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: i64,
    },
    /// List a user's restorable backups, newest first
    List {
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = DEFAULT_RESTORABLE_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = MaintConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.database {
        cfg.database_path = Some(db);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Repair { dry_run, batch_size } => {
            repair_command(&cfg, dry_run, batch_size.unwrap_or(cfg.batch_size)).await
        }
        Commands::Stats => stats_command(&cfg).await,
        Commands::Backup { action } => backup_command(&cfg, action).await,
        Commands::Keygen { user, key_dir, force } => {
            keygen_command(key_dir.map_or_else(|| cfg.key_dir(), Ok)?, &user, force)
        }
    }
}

async fn open_store(cfg: &MaintConfig) -> Result<SqliteMessageStore> {
    let path = cfg.database_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    SqliteMessageStore::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

async fn repair_command(cfg: &MaintConfig, dry_run: bool, batch_size: usize) -> Result<()> {
    let store = open_store(cfg).await?;
    if dry_run {
        info!("Dry run: no records will be modified");
    }
    let report = RepairEngine::new(&store)
        .with_backup(&store)
        .with_batch_size(batch_size)
        .scan_and_repair(dry_run)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.unsupported_algorithm > 0 {
        warn!(
            count = report.unsupported_algorithm,
            "Some records use an algorithm this build does not know; upgrade before repairing them"
        );
    }
    Ok(())
}

async fn stats_command(cfg: &MaintConfig) -> Result<()> {
    let store = open_store(cfg).await?;
    let tally = census(&store, cfg.batch_size).await?;
    println!("{}", serde_json::to_string_pretty(&tally)?);
    Ok(())
}

async fn backup_command(cfg: &MaintConfig, action: BackupAction) -> Result<()> {
    let store = open_store(cfg).await?;
    match action {
        BackupAction::All => {
            let run = backup_all_encrypted(&store, &store, cfg.batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        BackupAction::User { user } => {
            let run = backup_user_messages(&store, &store, &user, cfg.batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        BackupAction::Stats => {
            let stats = store.backup_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        BackupAction::Cleanup { days } => {
            if days < 0 {
                bail!("--days must not be negative");
            }
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            let removed = store.cleanup_backups(cutoff).await?;
            info!(removed, days, "Backup cleanup finished");
            println!("{}", serde_json::json!({ "removed": removed, "cutoff": cutoff }));
        }
        BackupAction::List { user, limit } => {
            let found = store.restorable_for_user(&user, limit).await?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
    }
    Ok(())
}

fn keygen_command(key_dir: PathBuf, user: &str, force: bool) -> Result<()> {
    let keys = FileKeyStore::open(&key_dir)?;
    let key_pair = if force {
        let fresh = generate_key_pair()?;
        keys.save_key_pair(user, &fresh, OverwritePolicy::Replace)?;
        keys.load_key_pair(user)?
            .context("keypair missing right after save")?
    } else {
        let init = load_or_generate(&keys, user)?;
        if !init.newly_generated {
            println!("Existing keypair kept (use --force to replace)");
        }
        init.key_pair
    };
    println!("User:       {user}");
    println!("Public key: {}", key_pair.public.to_b64());
    println!("Key id:     {}", key_pair.public.key_id());
    println!("Version:    {}", key_pair.version());
    println!("Stored in:  {}", keys.dir().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_subcommands_parse_with_defaults() {
        let cli = Cli::try_parse_from(["lp-maint", "backup", "cleanup"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Backup { action: BackupAction::Cleanup { days: DEFAULT_RETENTION_DAYS } }
        ));

        let cli = Cli::try_parse_from(["lp-maint", "backup", "list", "--user", "alice"]).unwrap();
        match cli.command {
            Commands::Backup { action: BackupAction::List { user, limit } } => {
                assert_eq!(user, "alice");
                assert_eq!(limit, DEFAULT_RESTORABLE_LIMIT);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
