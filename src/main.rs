mod api;
mod app;
mod cache;
mod config;
mod domain;
mod error;
mod event;
mod geo;
mod net;
mod notify;
mod store;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "storycat")]
#[command(about = "Offline-first client for the Dicoding Story API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storycat/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable; reads come from the local store
  /// and writes are queued
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List stories (cached, refreshed when stale)
  Stories {
    /// Force a remote refresh
    #[arg(long)]
    refresh: bool,
  },
  /// Post a new story
  Add {
    #[arg(long)]
    description: String,
    /// Path to the photo to upload
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    lat: Option<f64>,
    #[arg(long)]
    lon: Option<f64>,
    /// Resolve coordinates with the configured locator command
    #[arg(long)]
    locate: bool,
  },
  /// Flush queued offline writes now
  Sync,
  /// Manage favorite stories
  Favorites {
    #[command(subcommand)]
    action: FavoritesAction,
  },
  /// Log in and store the session token
  Login {
    #[arg(long)]
    email: String,
    #[arg(long, env = "STORYCAT_PASSWORD", hide_env_values = true)]
    password: String,
  },
  /// Create an account
  Register {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "STORYCAT_PASSWORD", hide_env_values = true)]
    password: String,
  },
  /// Forget the stored session
  Logout,
  /// Manage the push notification subscription
  Notify {
    #[command(subcommand)]
    action: NotifyAction,
  },
  /// Show local storage usage
  Stats,
  /// Manage the offline response cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum FavoritesAction {
  /// List saved favorites
  List,
  /// Favorite a cached story by id
  Add { id: String },
  /// Remove a story from favorites
  Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum NotifyAction {
  /// Register a push subscription with the server
  Subscribe {
    #[arg(long)]
    endpoint: String,
    #[arg(long)]
    p256dh: String,
    #[arg(long)]
    auth: String,
  },
  /// Remove the registered subscription
  Unsubscribe,
  /// Show the stored subscription
  Status,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Pre-cache story photos and configured shell assets
  Warm,
  /// Purge cache namespaces from older versions
  Activate,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_tracing()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let mut app = app::App::new(config, args.offline).await?;

  match args.command {
    Command::Stories { refresh } => app.stories(refresh).await?,
    Command::Add {
      description,
      photo,
      lat,
      lon,
      locate,
    } => app.add(description, &photo, lat, lon, locate).await?,
    Command::Sync => app.sync().await?,
    Command::Favorites { action } => match action {
      FavoritesAction::List => app.favorites_list()?,
      FavoritesAction::Add { id } => app.favorites_add(&id)?,
      FavoritesAction::Remove { id } => app.favorites_remove(&id)?,
    },
    Command::Login { email, password } => app.login(&email, &password).await?,
    Command::Register {
      name,
      email,
      password,
    } => app.register(&name, &email, &password).await?,
    Command::Logout => app.logout()?,
    Command::Notify { action } => match action {
      NotifyAction::Subscribe {
        endpoint,
        p256dh,
        auth,
      } => app.notify_subscribe(endpoint, p256dh, auth).await?,
      NotifyAction::Unsubscribe => app.notify_unsubscribe().await?,
      NotifyAction::Status => app.notify_status()?,
    },
    Command::Stats => app.stats()?,
    Command::Cache { action } => match action {
      CacheAction::Warm => app.cache_warm().await?,
      CacheAction::Activate => app.cache_activate()?,
    },
  }

  app.shutdown().await;
  Ok(())
}

/// Log to a file in the data dir so stdout stays clean for command
/// output. Filter via STORYCAT_LOG (defaults to info).
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let dir = config::Config::data_dir()?;
  std::fs::create_dir_all(&dir)?;

  let file = tracing_appender::rolling::never(&dir, "storycat.log");
  let (writer, guard) = tracing_appender::non_blocking(file);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("STORYCAT_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
