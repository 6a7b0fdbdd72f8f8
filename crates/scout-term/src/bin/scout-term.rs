//! scout-term gateway entry point.
//!
//! Serves the browser terminal: authenticates the session cookie, then hands
//! each WebSocket to the per-session pseudo-terminal multiplexer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use scout_term::config::{parse_env_pair, DEFAULT_COOKIE_NAME};
use scout_term::terminal::scrollback::DEFAULT_SCROLLBACK_BYTES;
use scout_term::{
    build_router, CookieAuthenticator, GatewayState, PtySpawner, RegistryConfig, SessionRegistry,
    SpawnConfig,
};

/// Web terminal gateway for the scout pipeline.
#[derive(Parser, Debug)]
#[command(name = "scout-term")]
#[command(about = "Browser terminal gateway backed by per-session PTYs")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SCOUT_BIND", default_value = "127.0.0.1:8765")]
    bind: SocketAddr,

    /// Program launched inside each terminal
    #[arg(long, env = "SCOUT_SHELL", default_value = "scout-shell")]
    shell: String,

    /// Extra argument for the shell program (repeatable)
    #[arg(long = "shell-arg", allow_hyphen_values = true)]
    shell_args: Vec<String>,

    /// Working directory of the spawned shell
    #[arg(long, env = "SCOUT_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Extra environment for the spawned shell, as KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Name of the session cookie
    #[arg(long, env = "SCOUT_COOKIE_NAME", default_value = DEFAULT_COOKIE_NAME)]
    cookie_name: String,

    /// HMAC secret the session token is signed with
    #[arg(long, env = "SCOUT_COOKIE_SECRET", hide_env_values = true)]
    cookie_secret: String,

    /// Scrollback kept per terminal, in bytes
    #[arg(long, env = "SCOUT_SCROLLBACK_BYTES", default_value_t = DEFAULT_SCROLLBACK_BYTES)]
    scrollback_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::default().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if args.cookie_secret.is_empty() {
        anyhow::bail!("--cookie-secret must not be empty");
    }

    info!(
        bind = %args.bind,
        shell = %args.shell,
        workdir = %args.workdir.display(),
        scrollback_bytes = args.scrollback_bytes,
        "Starting scout-term"
    );

    let mut spawn = SpawnConfig::new(&args.shell).cwd(&args.workdir);
    for arg in &args.shell_args {
        spawn = spawn.arg(arg);
    }
    for (key, value) in &args.env {
        spawn = spawn.env(key, value);
    }

    let registry = SessionRegistry::new(
        Arc::new(PtySpawner::new(spawn)),
        RegistryConfig {
            scrollback_bytes: args.scrollback_bytes,
        },
    );
    let auth = Arc::new(CookieAuthenticator::new(
        &args.cookie_name,
        args.cookie_secret.as_bytes(),
    ));
    let app = build_router(GatewayState::new(registry.clone(), auth));

    let listener = TcpListener::bind(args.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    let terminated = registry.shutdown();
    info!(terminated, "scout-term stopped");
    Ok(())
}
