use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stew_notifications::backend::RemoteNotificationStore;
use stew_notifications::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use stew_notifications::{ActiveView, AuthChanges, BadgeObserver, NotificationSession, UserId};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the stew backend, e.g. https://project.example.co
    #[clap(long)]
    pub backend_url: Option<String>,

    /// Public API key of the backend.
    #[clap(long)]
    pub api_key: Option<String>,

    /// Access token of the signed-in user.
    #[clap(long)]
    pub access_token: Option<String>,

    /// Id of the signed-in user. Runs signed out when absent.
    #[clap(long)]
    pub recipient_id: Option<String>,

    /// Seconds between full recounts while the feed is healthy. 0 disables them.
    #[clap(long, default_value_t = 0)]
    pub resync_interval_secs: u64,

    /// Seconds between realtime heartbeats.
    #[clap(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL_SECS)]
    pub heartbeat_interval_secs: u64,

    /// Timeout in seconds for backend requests.
    #[clap(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            backend_url: self.backend_url.clone(),
            api_key: self.api_key.clone(),
            access_token: self.access_token.clone(),
            recipient_id: self.recipient_id.clone(),
            resync_interval_secs: self.resync_interval_secs,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

const HELP: &str = "commands: view | leave | count | resync | login <user-id> | logout | quit";

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Using notification backend at {}", config.backend.base_url);
    let store = Arc::new(
        RemoteNotificationStore::new(&config.backend)
            .context("Failed to create notification store")?,
    );
    let session = Arc::new(NotificationSession::new(store, config.tracker_settings()));

    let mut header = session.header_badge();
    let header_task = tokio::spawn(async move {
        while let Some(indicator) = header.changed().await {
            match indicator {
                Some(indicator) => info!("Header badge: {}", indicator),
                None => info!("Header badge: cleared"),
            }
        }
    });
    let mut tab_bar = session.tab_bar_badge();
    let tab_bar_task = tokio::spawn(async move {
        while let Some(indicator) = tab_bar.changed().await {
            match indicator {
                Some(indicator) => info!("Tab bar badge: {}", indicator),
                None => info!("Tab bar badge: cleared"),
            }
        }
    });

    let auth = AuthChanges::spawn(Arc::clone(&session));
    if let Some(user) = config.recipient_id.clone() {
        auth.sign_in(user);
    }
    info!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };

        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (None, _) => {}
            (Some("view"), _) => session.navigate(ActiveView::Notifications),
            (Some("leave"), _) => session.navigate(ActiveView::Elsewhere),
            (Some("count"), _) => info!(
                "Unread notifications: {} ({:?})",
                session.tracker().unread_count(),
                session.tracker().state()
            ),
            (Some("resync"), _) => {
                let tracker = Arc::clone(session.tracker());
                tokio::spawn(async move {
                    if !tracker.resync().await {
                        warn!("Resync did not produce a fresh count");
                    }
                });
            }
            (Some("login"), Some(user)) => match UserId::parse_uuid(user) {
                Ok(user) => auth.sign_in(user),
                Err(e) => warn!("Not a valid user id {:?}: {}", user, e),
            },
            (Some("login"), None) => warn!("Missing user id, {}", HELP),
            (Some("logout"), _) => auth.sign_out(),
            (Some("quit"), _) => break,
            (Some(other), _) => warn!("Unknown command {:?}, {}", other, HELP),
        }
    }

    drop(auth);
    session.close();
    drop(session);
    header_task.abort();
    tab_bar_task.abort();
    info!("Bye");
    Ok(())
}
