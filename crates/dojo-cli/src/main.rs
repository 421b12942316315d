//! dojo - command-line client for the studio backend.
//!
//! Signs in, shows who is signed in, and fetches data from the REST API.
//! The session is kept in a storage directory so it survives between runs.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dojo_core::models::Credentials;
use dojo_core::{Config, FileStorage, HttpClient, QueryCache, SessionCoordinator, SharedCache, Storage};

#[derive(Parser, Debug)]
#[command(name = "dojo", version, about = "Studio management from the command line")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and remember the session
    Login {
        /// Account email (defaults to the last one used)
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show who is signed in
    Status,
    /// Fetch an API path and print the JSON response
    Get {
        /// Path relative to the API base URL, e.g. `students?page=2`
        path: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

struct App {
    config: Config,
    config_path: PathBuf,
    session: SessionCoordinator,
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)?.with_env_overrides()?;

    let storage_dir = config.storage_dir()?;
    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::open(&storage_dir)
            .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?,
    );
    debug!(dir = %storage_dir.display(), api = config.api_base_url(), "Starting");

    let http = HttpClient::builder()
        .base_url(config.api_base_url())
        .storage(Arc::clone(&storage))
        .timeout(config.request_timeout())
        .build()?;
    let session = SessionCoordinator::start(http, storage);

    let mut app = App {
        config,
        config_path,
        session,
    };

    match cli.command {
        Command::Login { email } => login(&mut app, email).await,
        Command::Logout => {
            app.session.logout();
            println!("Logged out.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            status(&app);
            Ok(ExitCode::SUCCESS)
        }
        Command::Get { path } => get(&app, &path).await,
    }
}

async fn login(app: &mut App, email: Option<String>) -> Result<ExitCode> {
    let email = match email.or_else(|| app.config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var("DOJO_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let user = app
        .session
        .login(&Credentials::new(email.clone(), password))
        .await
        .context("Login failed")?;

    app.config.last_email = Some(email);
    if let Err(e) = app.config.save_to(&app.config_path) {
        // Not fatal: the session itself is already stored
        eprintln!("Warning: could not save config: {:#}", e);
    }

    info!(user_id = user.id, "Signed in");
    println!("Logged in as {} ({}).", user.name, user.role_display());
    Ok(ExitCode::SUCCESS)
}

fn status(app: &App) {
    match app.session.user() {
        Some(user) if app.session.is_authenticated() => {
            println!(
                "Logged in as {} <{}> ({}).",
                user.name,
                user.email,
                user.role_display()
            );
        }
        _ => println!("Not logged in."),
    }
}

async fn get(app: &App, path: &str) -> Result<ExitCode> {
    let provider = SharedCache::new(app.config.cache_size()?)?;
    let query: QueryCache = QueryCache::new(app.session.http().clone(), provider);
    let _clear_on_expiry = query.clear_on_session_expiry();

    match query.fetch_value(path).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_unauthorized() => {
            let message = app
                .session
                .session_expired_message()
                .unwrap_or_else(|| e.to_string());
            eprintln!("{}", message);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to fetch {}", path)),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("No input given");
    }
    Ok(value)
}
