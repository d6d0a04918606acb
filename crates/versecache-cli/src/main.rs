//! versecache - command-line access to the verse cache.
//!
//! Opens the same encrypted store the app uses and exposes the TTL cache,
//! the domain reads and the legacy migration as subcommands.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use versecache_core::migration::{migrate_legacy, JsonFileLegacySource};
use versecache_core::{ApiClient, Config, KeySource, NetworkStatus, Orchestrator, Storage, Ttl};

/// Passphrase override; when unset the OS keychain holds the key.
const STORE_KEY_ENV: &str = "VERSECACHE_STORE_KEY";

const USAGE: &str = "\
Usage: versecache [--offline] <command> [args]

Commands:
  get <key>                    Show a cached value
  set <key> <json> [ttl-ms]    Cache a JSON value (no TTL = never expires)
  delete <key>                 Remove a cached value
  keys                         List cache keys
  clear-expired                Evict expired and unreadable entries
  migrate <legacy.json>        Import the legacy unencrypted store
  chapter <n> [edition]        Show a chapter
  reviews <n>                  Show reviews for a chapter
  search <term>                Search chapter names
  history                      Show recent searches
";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=versecache_core=debug).
/// Logs also go to a daily file in `log_dir` when it can be created.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let appender = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("versecache")
            .filename_suffix("log")
            .build(dir)
            .ok()
    });
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn open_storage(config: &Config) -> Result<Storage> {
    let key_source = match std::env::var(STORE_KEY_ENV) {
        Ok(passphrase) if !passphrase.is_empty() => KeySource::passphrase(passphrase),
        _ => KeySource::keychain(),
    };
    let path = config.store_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Storage::open_encrypted(path, &key_source)
        .with_context(|| format!("Failed to open the store (set {} to supply the key)", STORE_KEY_ENV))
}

/// Split `--offline` out of the arguments.
fn parse_args() -> (bool, Vec<String>) {
    let mut offline = false;
    let args = std::env::args()
        .skip(1)
        .filter(|arg| {
            if arg == "--offline" {
                offline = true;
                false
            } else {
                true
            }
        })
        .collect();
    (offline, args)
}

fn parse_chapter(arg: Option<&String>) -> Result<u16> {
    let arg = arg.context("Missing chapter number")?;
    arg.parse()
        .with_context(|| format!("Invalid chapter number: {}", arg))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {:#}; using default config", e);
        Config::default()
    });
    config.apply_env();

    let (offline, args) = parse_args();
    let Some(command) = args.first() else {
        print!("{}", USAGE);
        return Ok(());
    };
    if matches!(command.as_str(), "help" | "--help" | "-h") {
        print!("{}", USAGE);
        return Ok(());
    }

    let log_dir = config.log_dir().ok();
    let _guard = init_tracing(log_dir.as_deref());
    info!(command = %command, "versecache starting");

    let storage = open_storage(&config)?;
    let status = NetworkStatus::new(!(offline || config.offline_mode));
    let api = ApiClient::new(config.api_base_url.clone())?;
    let orch = Orchestrator::new(storage, api, Arc::new(status));

    run(command, &args[1..], &config, &orch).await
}

async fn run(command: &str, args: &[String], config: &Config, orch: &Orchestrator<ApiClient>) -> Result<()> {
    let cache = orch.cache();

    match command {
        "get" => {
            let key = args.first().context("Missing key")?;
            match cache.get_entry::<serde_json::Value>(key) {
                Some(entry) => {
                    println!("{}", serde_json::to_string_pretty(&entry.data)?);
                    println!("(cached {})", entry.age_display(cache.now()));
                }
                None => println!("Not cached: {}", key),
            }
        }
        "set" => {
            let key = args.first().context("Missing key")?;
            let raw = args.get(1).context("Missing JSON value")?;
            let value: serde_json::Value =
                serde_json::from_str(raw).with_context(|| format!("Invalid JSON: {}", raw))?;
            let ttl = match args.get(2) {
                Some(ms) => Ttl::from_millis(ms.parse().with_context(|| format!("Invalid TTL: {}", ms))?),
                None => Ttl::NEVER,
            };
            cache.set(key, &value, ttl)?;
            println!("Cached {}", key);
        }
        "delete" => {
            let key = args.first().context("Missing key")?;
            cache.delete(key)?;
            println!("Deleted {}", key);
        }
        "keys" => {
            for key in cache.keys() {
                println!("{}", key);
            }
        }
        "clear-expired" => {
            let removed = cache.clear_expired();
            println!("Removed {} expired entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
        "migrate" => {
            let path = args.first().context("Missing legacy store path")?;
            let legacy = JsonFileLegacySource::load(Path::new(path))?;
            let report = migrate_legacy(&legacy, cache.storage())?;
            if report.skipped {
                println!("Migration already complete");
            } else {
                println!(
                    "Migrated {} keys ({} already present, {} failed)",
                    report.migrated,
                    report.already_present,
                    report.failed.len()
                );
                for (key, reason) in &report.failed {
                    println!("  {}: {}", key, reason);
                }
            }
        }
        "chapter" => {
            let number = parse_chapter(args.first())?;
            let edition = args.get(1).unwrap_or(&config.default_edition);
            let chapter = orch.chapter(number, edition).await?;
            println!("{}. {} ({})", chapter.number, chapter.name, chapter.edition);
            for verse in &chapter.verses {
                println!("{:>4}  {}", verse.number, verse.text);
            }
        }
        "reviews" => {
            let number = parse_chapter(args.first())?;
            let reviews = orch.reviews(number).await?;
            if reviews.is_empty() {
                println!("No reviews yet");
            }
            for review in reviews.iter() {
                println!(
                    "{} {} - {}",
                    "*".repeat(review.rating as usize),
                    review.author,
                    review.created_at.format("%Y-%m-%d")
                );
                if !review.body.is_empty() {
                    println!("    {}", review.body);
                }
            }
        }
        "search" => {
            if args.is_empty() {
                bail!("Missing search term");
            }
            let term = args.join(" ");
            for summary in orch.search_chapters(&term).await? {
                println!("{:>3}. {} ({} verses)", summary.number, summary.name, summary.verse_count);
            }
        }
        "history" => {
            for term in orch.recent_searches().entries() {
                println!("{}", term);
            }
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}
