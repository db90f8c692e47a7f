//! Tsudoi chat server.
//!
//! Serves room-based chat over WebSocket. Clients upgrade on
//! `ws://<host>:<port>/ws?token=<socket token>`; tokens and rooms come from the
//! SQLite database, or from `--demo-user` when running without one.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin tsudoi-server -- --database tsudoi.db add-room lobby
//! cargo run --bin tsudoi-server -- --database tsudoi.db issue-token alice
//! cargo run --bin tsudoi-server -- --database tsudoi.db --port 3000
//! cargo run --bin tsudoi-server -- serve --demo-user alice --demo-user bob
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};

use tsudoi_server::{
    domain::{ChatStore, ScreenName},
    infrastructure::{
        repository::{InMemoryChatStore, SqliteChatStore},
        websocket::DEFAULT_MAX_FRAME_SIZE,
    },
    ui::{Server, ServerConfig, ShutdownHandle},
};
use tsudoi_shared::logger::setup_logger;

/// Room created for in-memory demo sessions.
const DEMO_ROOM: &str = "general";

#[derive(Parser, Debug)]
#[command(name = "tsudoi-server")]
#[command(about = "Room-based WebSocket chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "WS_HOST")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value_t = 8080, env = "WS_PORT")]
    port: u16,

    /// SQLite database file; an in-memory store is used when omitted
    #[arg(long, env = "TSUDOI_DATABASE")]
    database: Option<PathBuf>,

    /// Event loop heartbeat in milliseconds
    #[arg(long, default_value_t = 1000, env = "TSUDOI_TICK_MILLIS")]
    tick_millis: u64,

    /// Close connections silent for this many seconds (disabled when omitted)
    #[arg(long, env = "TSUDOI_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    /// Largest accepted frame payload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE, env = "TSUDOI_MAX_FRAME_BYTES")]
    max_frame_bytes: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chat server (default)
    Serve {
        /// Seed a user and log its token (in-memory store only)
        #[arg(long = "demo-user")]
        demo_users: Vec<String>,
    },
    /// Create a room, optionally protected by a passphrase
    AddRoom {
        name: String,
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Create the user on first use and print a fresh socket token
    IssueToken { screen_name: String },
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            tick: Duration::from_millis(self.tick_millis.max(1)),
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            max_frame_size: self.max_frame_bytes,
            ..ServerConfig::default()
        }
    }

    fn open_database(&self) -> Result<SqliteChatStore, Box<dyn std::error::Error>> {
        let path = self
            .database
            .as_ref()
            .ok_or("this command needs --database (or TSUDOI_DATABASE)")?;
        Ok(SqliteChatStore::open(path)?)
    }
}

fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        None => serve(&args, &[]),
        Some(Command::Serve { demo_users }) => serve(&args, demo_users),
        Some(Command::AddRoom { name, passphrase }) => {
            let store = args.open_database()?;
            let room_id = store.add_room(name, passphrase.as_deref())?;
            println!("{}", room_id);
            Ok(())
        }
        Some(Command::IssueToken { screen_name }) => {
            let store = args.open_database()?;
            let user_id = store.add_user(&ScreenName::new(screen_name)?)?;
            let token = store.issue_socket_token(user_id)?;
            println!("{}", token.as_str());
            Ok(())
        }
    }
}

fn serve(args: &Args, demo_users: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // 1. Create the store
    let store: Arc<dyn ChatStore> = match &args.database {
        Some(path) => {
            if !demo_users.is_empty() {
                tracing::warn!("--demo-user is ignored when a database is configured");
            }
            tracing::info!("Using SQLite database {}", path.display());
            Arc::new(SqliteChatStore::open(path)?)
        }
        None => Arc::new(demo_store(demo_users)?),
    };

    // 2. Bind the server
    let server = Server::bind(args.server_config(), store)?;

    // 3. Stop gracefully on Ctrl+C
    spawn_shutdown_signal(server.shutdown_handle())?;
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    // 4. Run the event loop on this thread
    server.run()?;
    Ok(())
}

/// Wait for Ctrl+C on a side thread and stop the event loop.
fn spawn_shutdown_signal(handle: ShutdownHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    std::thread::Builder::new()
        .name("shutdown-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => tracing::info!("Shutdown signal received"),
                    Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
                }
            });
            handle.shutdown();
        })?;
    Ok(())
}

/// In-memory store with one open room and the requested users.
fn demo_store(demo_users: &[String]) -> Result<InMemoryChatStore, Box<dyn std::error::Error>> {
    let store = InMemoryChatStore::new();
    let room_id = store.add_room(DEMO_ROOM, None)?;
    tracing::warn!("No database configured; state is lost on exit");
    tracing::info!("Room {} '{}' created!", room_id, DEMO_ROOM);

    for name in demo_users {
        let user_id = store.add_user(&ScreenName::new(name)?)?;
        let token = store.issue_socket_token(user_id)?;
        tracing::info!("Demo user '{}' token: {}", name, token.as_str());
    }
    Ok(store)
}
