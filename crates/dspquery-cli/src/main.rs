//! dspq - command-line front end for the DSP natural-language query service.
//!
//! Each invocation opens the per-origin credential store, so a login in one
//! shell is visible to every other `dspq` sharing the same storage.

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dspquery_core::{AccessDecision, App, Config, SessionState, StorageBackend};

/// Password source for non-interactive use
const ENV_PASSWORD: &str = "DSP_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "dspq", version, about = "Query the DSP service in natural language")]
struct Cli {
    /// Backend base address; empty means same-origin [env: DSP_BACKEND_URL]
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Credential storage: file, keyring or memory [env: DSP_STORAGE]
    #[arg(long, global = true)]
    storage: Option<StorageBackend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session token
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account and store the session token
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Submit a natural-language prompt
    Query {
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Remove the stored session token
    Logout,
    /// Show whether a session is active
    Status,
    /// Show where a route resolves for the current session
    Route { path: String },
    /// Print session changes until Ctrl-C
    Watch,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level, e.g. RUST_LOG=dspquery_core=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    // File, then DSP_* environment, then flags
    let mut config = Config::load()?;
    if let Some(url) = cli.backend_url {
        config.backend_url = Some(url);
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }

    let app = App::from_config(config)?;
    info!(base_url = app.api().base_url(), "dspq starting");

    match cli.command {
        Command::Login { email } => login(&app, email).await,
        Command::Signup { name, email } => signup(&app, &name, &email).await,
        Command::Query { prompt } => {
            let text = app.run_query(&prompt.join(" ")).await?;
            println!("{}", text);
            Ok(())
        }
        Command::Logout => {
            app.logout();
            println!("Logged out");
            Ok(())
        }
        Command::Status => {
            println!("{}", describe(&app.state()));
            Ok(())
        }
        Command::Route { path } => {
            route(&app, &path);
            Ok(())
        }
        Command::Watch => watch(&app).await,
    }
}

async fn login(app: &App, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    let password = read_password()?;
    app.attempt_login(&email, &password).await?;
    println!("Logged in");
    Ok(())
}

async fn signup(app: &App, name: &str, email: &str) -> Result<()> {
    let password = read_password()?;
    app.attempt_signup(name, email, &password).await?;
    println!("Account created");
    Ok(())
}

fn route(app: &App, path: &str) {
    match app.resolve(path) {
        AccessDecision::Allow => println!("{} -> allowed", path),
        decision => {
            let target = decision.redirect_target().unwrap_or(path);
            println!("{} -> redirect to {}", path, target);
        }
    }
}

async fn watch(app: &App) -> Result<()> {
    println!("{}", describe(&app.state()));

    let _subscription = app.session().subscribe(|state| println!("{}", describe(state)));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok(())
}

fn describe(state: &SessionState) -> &'static str {
    if state.is_authenticated {
        "Authenticated"
    } else {
        "Not authenticated"
    }
}

fn prompt_line(label: &str) -> Result<String> {
    eprint!("{}", label);
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    rpassword::prompt_password("Password: ").context("Failed to read password")
}
