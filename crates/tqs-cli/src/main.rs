use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tqs_cache::{CacheLookup, ChangeFeed, FileStore, FlushRequest, LocalResultCache};
use tqs_config::{LoadedConfig, ResolvedSecrets};
use tqs_controller::{ControllerSettings, Identity, ReconciliationController, WatchIdentity};
use tqs_remote::{HttpClientSettings, HttpQuizStateClient};
use tqs_schemas::QuizResult;
use tracing::info;

#[derive(Parser)]
#[command(name = "tqs")]
#[command(about = "Travel quiz status CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (repeatable). Defaults apply when omitted.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Print the locally cached record for an account
    Status {
        #[arg(long)]
        account: String,
    },

    /// Run one reconciliation refresh and print the resulting view
    Refresh {
        #[arg(long)]
        account: String,

        /// Bypass the rate limit (a one-shot process is never rate limited anyway)
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Record a locally produced quiz result (JSON file) and queue its push
    Record {
        #[arg(long)]
        account: String,

        /// Path to a QuizResult JSON file
        #[arg(long)]
        file: String,
    },

    /// Push the account's queued result, if any
    Flush {
        #[arg(long)]
        account: String,
    },

    /// Sign-out clear: remove the account's cached result and queued sync
    Clear {
        #[arg(long)]
        account: String,
    },

    /// Attach change feed + sync worker and print view changes until Ctrl-C
    Watch {
        #[arg(long)]
        account: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    tqs_config::load_layered_yaml(&path_refs)
}

/// Cache, remote and controller wired from config for one account.
struct Session {
    cache: Arc<LocalResultCache>,
    controller: Arc<ReconciliationController>,
    identity: Arc<WatchIdentity>,
    secrets: ResolvedSecrets,
    loaded: LoadedConfig,
}

impl Session {
    fn open(loaded: LoadedConfig, account: &str) -> Result<Self> {
        let cfg = &loaded.config;
        let secrets = tqs_config::resolve_secrets(cfg)?;

        let store = FileStore::open(&cfg.cache.dir)?;
        let remote = HttpQuizStateClient::new(HttpClientSettings {
            base_url: cfg.remote.base_url.clone(),
            state_path: cfg.remote.state_path.clone(),
            request_timeout: cfg.request_timeout(),
        })?;
        let cache = Arc::new(LocalResultCache::new(
            Arc::new(store),
            ChangeFeed::default(),
            Arc::new(remote),
        ));

        let identity = Arc::new(WatchIdentity::new(Some(Identity::new(
            account,
            secrets.auth_token.clone(),
        ))));
        let controller = Arc::new(ReconciliationController::new(
            ControllerSettings::from_config(cfg),
            cache.clone(),
            identity.clone(),
        ));

        Ok(Self {
            cache,
            controller,
            identity,
            secrets,
            loaded,
        })
    }
}

fn lookup_json(account: &str, cache: &LocalResultCache) -> serde_json::Value {
    let queued = cache.queued(account);
    match cache.resolve(account) {
        CacheLookup::Missing => json!({
            "accountId": account,
            "status": "missing",
            "queued": queued.is_some(),
        }),
        CacheLookup::Found { status, record } => json!({
            "accountId": account,
            "status": status.as_str(),
            "record": record,
            "queued": queued.is_some(),
            "attempts": queued.map(|q| q.attempts).unwrap_or(0),
        }),
    }
}

fn print_json(v: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // dev-time .env.local bootstrap; absent file is fine
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let loaded = load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Status { account } => {
            let s = Session::open(load_config(&cli.config_paths)?, &account)?;
            print_json(&lookup_json(&account, &s.cache))?;
        }

        Commands::Refresh { account, force } => {
            let s = Session::open(load_config(&cli.config_paths)?, &account)?;
            let outcome = s.controller.refresh(force).await;
            print_json(&json!({
                "outcome": outcome,
                "view": s.controller.view(),
            }))?;
        }

        Commands::Record { account, file } => {
            let s = Session::open(load_config(&cli.config_paths)?, &account)?;
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("read quiz result: {file}"))?;
            let result: QuizResult =
                serde_json::from_str(&raw).context("parse quiz result json")?;
            s.controller.record_local_result(result)?;
            println!("recorded=true account_id={account}");
        }

        Commands::Flush { account } => {
            let s = Session::open(load_config(&cli.config_paths)?, &account)?;
            let out = s
                .cache
                .flush_pending(FlushRequest {
                    account_id: account.clone(),
                    auth_token: s.secrets.auth_token.clone(),
                    force: false,
                })
                .await?;
            print_json(&out)?;
        }

        Commands::Clear { account } => {
            let s = Session::open(load_config(&cli.config_paths)?, &account)?;
            s.controller.clear_quiz_data(&account)?;
            println!("cleared=true account_id={account}");
        }

        Commands::Watch { account } => {
            let s = Session::open(load_config(&cli.config_paths)?, &account)?;
            info!(
                account_id = %account,
                config_hash = %s.loaded.config_hash,
                "watching quiz status"
            );

            let feed_task = s.controller.attach_change_feed();
            let identity_task = s.controller.attach_identity_feed(s.identity.subscribe());
            let worker = s
                .controller
                .spawn_sync_worker(s.loaded.config.sync_retry_interval());

            let mut rx = s.controller.watch();
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let view = rx.borrow_and_update().clone();
                        println!("{}", serde_json::to_string(&view)?);
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down");
                        break;
                    }
                }
            }

            feed_task.abort();
            identity_task.abort();
            worker.abort();
        }
    }

    Ok(())
}
