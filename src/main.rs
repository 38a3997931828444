use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wapanel_client::{
    api::{BulkSendRequest, SendMessageRequest},
    queue::{follow_progress, spawn_countdown},
    Backend, DiscoverOptions,
};
use wapanel_core::{
    config::{self, shellexpand},
    events::RealtimeEvent,
    state::{is_authenticated, load_user, MemoryStateStore},
    traits::StateStore,
};
use wapanel_store::open_store;

#[derive(Parser)]
#[command(
    name = "wapanel",
    version,
    about = "Command-line client for the WhatsApp automation panel backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Keep state in memory, overriding `[store] backend`.
    #[arg(long)]
    ephemeral: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the backend and print its address.
    Discover {
        /// Rescan even if the port is already known.
        #[arg(long)]
        force: bool,
    },
    /// Show backend health and local client state.
    Status,
    /// Stream realtime events until interrupted.
    Watch {
        /// Select this WhatsApp session before streaming.
        #[arg(long)]
        session: Option<String>,
    },
    /// List, create, delete or select WhatsApp sessions.
    Sessions {
        #[command(subcommand)]
        action: Option<SessionAction>,
    },
    /// Send a single message.
    Send {
        #[arg(long)]
        session: String,
        /// Recipient phone number.
        #[arg(long)]
        to: String,
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },
    /// Start or control a bulk send.
    Bulk {
        #[command(subcommand)]
        action: BulkAction,
    },
    /// List scheduled message jobs.
    Scheduled,
    /// List auto-reply rules.
    Rules,
    /// Print the backend's runtime configuration.
    BackendConfig,
    /// Log in and remember the user for later requests.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "WAPANEL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored user.
    Logout,
}

#[derive(Subcommand)]
enum SessionAction {
    Create { id: String },
    Delete { id: String },
    Select { id: String },
}

#[derive(Subcommand)]
enum BulkAction {
    /// Send one message to many numbers in batches.
    Start {
        #[arg(long)]
        session: String,
        /// Comma-separated recipient numbers.
        #[arg(long, value_delimiter = ',', required = true)]
        numbers: Vec<String>,
        #[arg(long)]
        batch_size: Option<u32>,
        /// Pause between batches, in minutes.
        #[arg(long)]
        delay_minutes: Option<f64>,
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },
    Pause,
    Resume,
    Cancel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _log_guard = init_logging(&cfg);

    let store: Arc<dyn StateStore> = if cli.ephemeral {
        Arc::new(MemoryStateStore::new())
    } else {
        open_store(&cfg.store).await?
    };

    let backend = Backend::new(&cfg, Arc::clone(&store))?;

    match cli.command {
        Commands::Discover { force } => {
            let mut endpoint = backend.start().await;
            if force {
                let found = backend.discovery.discover(DiscoverOptions::forced()).await;
                if found.is_none() {
                    warn!("forced discovery found nothing, keeping {endpoint}");
                }
                endpoint = backend.discovery.current();
            }
            println!("{}", endpoint.http_url());
        }
        Commands::Status => {
            let endpoint = backend.start().await;
            println!("wapanel status\n");
            println!("Config:   {}", cli.config);
            println!("Backend:  {}", endpoint.http_url());
            match backend.discovery.last_known_port() {
                Some(port) => println!("Last port: {port}"),
                None => println!("Last port: none"),
            }
            let authenticated = is_authenticated(store.as_ref()).await;
            match load_user(store.as_ref()).await? {
                Some(user) if authenticated => {
                    println!("User:     {} ({})", user.username, user.id)
                }
                _ => println!("User:     not logged in"),
            }
            println!();
            match backend.api.status().await {
                Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                Err(e) => println!("  backend unreachable: {e}"),
            }
        }
        Commands::Watch { session } => {
            backend.start().await;
            if let Some(id) = session {
                backend.select_session(&id).await?;
            }
            watch(&backend, cfg.queue.completion_grace()).await?;
        }
        Commands::Sessions { action } => {
            backend.start().await;
            match action {
                None => {
                    let selected = backend.selected_session().await?;
                    for s in backend.api.sessions().await? {
                        let marker = if selected.as_deref() == Some(s.id.as_str()) {
                            "*"
                        } else {
                            " "
                        };
                        println!(
                            "{marker} {:<16} {:<14} {}",
                            s.id,
                            s.status.as_deref().unwrap_or("-"),
                            s.name.or(s.phone).unwrap_or_default()
                        );
                    }
                }
                Some(SessionAction::Create { id }) => {
                    let created = backend.api.create_session(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&created)?);
                }
                Some(SessionAction::Delete { id }) => {
                    backend.api.destroy_session(&id).await?;
                    println!("Session {id} deleted");
                }
                Some(SessionAction::Select { id }) => {
                    backend.select_session(&id).await?;
                    println!("Session {id} selected");
                }
            }
        }
        Commands::Send {
            session,
            to,
            message,
        } => {
            backend.start().await;
            let req = SendMessageRequest {
                session_id: session,
                number: to,
                message: message.join(" "),
            };
            let resp = backend.api.send_message(&req).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        Commands::Bulk { action } => {
            backend.start().await;
            let result = match action {
                BulkAction::Start {
                    session,
                    numbers,
                    batch_size,
                    delay_minutes,
                    message,
                } => {
                    let req = BulkSendRequest {
                        session_id: session,
                        numbers,
                        message: message.join(" "),
                        batch_size,
                        delay_minutes,
                    };
                    let resp = backend.api.send_bulk(&req).await?;
                    println!("{}", serde_json::to_string_pretty(&resp)?);
                    None
                }
                BulkAction::Pause => Some(backend.queue.pause().await),
                BulkAction::Resume => Some(backend.queue.resume().await),
                BulkAction::Cancel => Some(backend.queue.cancel().await),
            };
            if let Some(result) = result {
                println!("Queue: {}", backend.queue.status().as_str());
                result.context("backend rejected the command")?;
            }
        }
        Commands::Scheduled => {
            backend.start().await;
            let jobs = match backend.api.scheduled_jobs().await {
                Ok(jobs) => jobs,
                Err(e) if e.is_network() => {
                    warn!("backend unreachable ({e}), showing cached jobs");
                    backend.api.cached_scheduled_jobs().await
                }
                Err(e) => return Err(e.into()),
            };
            for job in jobs {
                println!("{job}");
            }
        }
        Commands::Rules => {
            backend.start().await;
            for rule in backend.api.auto_reply_rules().await? {
                println!("{rule}");
            }
        }
        Commands::BackendConfig => {
            backend.start().await;
            let remote = backend.api.backend_config().await?;
            println!("{}", serde_json::to_string_pretty(&remote)?);
        }
        Commands::Login { username, password } => {
            backend.start().await;
            let user = backend.api.login(&username, &password).await?;
            println!("Logged in as {} ({})", user.username, user.id);
        }
        Commands::Logout => {
            backend.api.logout().await?;
            println!("Logged out");
        }
    }

    backend.shutdown().await;
    Ok(())
}

/// Print realtime events and queue status until Ctrl+C.
async fn watch(backend: &Backend, grace: std::time::Duration) -> anyhow::Result<()> {
    let channel = backend.connect_realtime().await?;
    let mut events = channel.subscribe();
    let mut queue_status = backend.queue.subscribe();

    let pump = tokio::spawn(follow_progress(
        Arc::clone(&backend.queue),
        channel.subscribe(),
        grace,
    ));
    let ticker = spawn_countdown(Arc::clone(&backend.queue));

    info!("Watching realtime events (Ctrl+C to stop)");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RealtimeEvent::BulkProgress(p)) => {
                    let batch = match (p.batch, p.total_batches) {
                        (Some(b), Some(n)) => format!(" batch {b}/{n}"),
                        _ => String::new(),
                    };
                    println!("bulk_progress {}/{}{batch}", p.current, p.total);
                }
                Ok(RealtimeEvent::Other { name, data }) => println!("{name} {data}"),
                Ok(RealtimeEvent::Disconnected(reason)) => {
                    println!("disconnect ({})", reason.as_str());
                }
                Ok(RealtimeEvent::ConnectError(e)) => println!("connect_error {e}"),
                Ok(event) => println!("{}", event.name()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("dropped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            Ok(()) = queue_status.changed() => {
                let status = *queue_status.borrow_and_update();
                match backend.queue.countdown_secs() {
                    Some(secs) => println!("queue {} (next batch in {secs}s)", status.as_str()),
                    None => println!("queue {}", status.as_str()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    ticker.abort();
    pump.abort();
    Ok(())
}

/// Logs go to stderr and to `{data_dir}/logs/wapanel.log`.
fn init_logging(cfg: &config::Config) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.panel.log_level))
    };
    let stderr = fmt::layer().with_writer(std::io::stderr).with_filter(filter());

    let log_dir = format!("{}/logs", shellexpand(&cfg.panel.data_dir));
    let (file, guard) = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&log_dir, "wapanel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("wapanel: file logging disabled, cannot create {log_dir}: {e}");
            (None, None)
        }
    };

    tracing_subscriber::registry().with(stderr).with(file).init();
    guard
}
