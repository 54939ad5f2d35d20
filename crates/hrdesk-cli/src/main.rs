//! hrdesk - command-line client for the hrdesk HR backend.
//!
//! Signs in, keeps the session token fresh across invocations, and runs
//! authenticated queries against the API.

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hrdesk_core::auth::{CredentialStore, GuardState, SignOutReason};
use hrdesk_core::{Config, Credentials, SessionManager};

/// Role used when none is given and none was remembered
const DEFAULT_ROLE: &str = "Employee";

/// Password source checked before the keychain and the prompt
const ENV_PASSWORD: &str = "HRDESK_PASSWORD";

/// Log file name inside the cache directory
const LOG_FILE: &str = "hrdesk.log";

#[derive(Parser)]
#[command(name = "hrdesk", version, about = "Command-line client for the hrdesk HR backend")]
struct Cli {
    /// Backend base URL (overrides config and HRDESK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Also write logs to the cache directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email, password and role
    Login {
        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        role: Option<String>,

        /// Remember the password in the OS keychain
        #[arg(long)]
        remember: bool,
    },
    /// Show the stored session
    Status,
    /// Refresh the access token now
    Refresh,
    /// Authenticated GET, printing the JSON response
    Get {
        /// API path, e.g. /employees/me
        path: String,
    },
    /// Sign out and clear the stored session
    Logout {
        /// Also forget the password remembered in the keychain
        #[arg(long)]
        forget: bool,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<std::path::PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
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

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_env();
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let log_dir = if cli.log_file {
        Some(config.cache_dir()?)
    } else {
        None
    };
    let _log_guard = init_tracing(log_dir);
    debug!(api = %config.api_base_url, "hrdesk starting");

    let manager = SessionManager::open(&config)?;

    match cli.command {
        Command::Login {
            email,
            role,
            remember,
        } => login(&manager, &mut config, email, role, remember).await,
        Command::Status => {
            status(&manager);
            Ok(())
        }
        Command::Refresh => refresh(&manager).await,
        Command::Get { path } => get(&manager, &path).await,
        Command::Logout { forget } => logout(&manager, &config, forget),
    }
}

async fn login(
    manager: &SessionManager,
    config: &mut Config,
    email: Option<String>,
    role: Option<String>,
    remember: bool,
) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    let role = role
        .or_else(|| config.last_role.clone())
        .unwrap_or_else(|| DEFAULT_ROLE.to_string());

    let password = match std::env::var(ENV_PASSWORD).ok().filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => match CredentialStore::get_password(&email) {
            Ok(password) => {
                debug!("Using password from keychain");
                password
            }
            Err(_) => rpassword::prompt_password("Password: ")?,
        },
    };

    let credentials = Credentials::new(email.clone(), password, role.clone());
    match manager.sign_in(&credentials).await {
        Ok(session) => {
            if remember {
                CredentialStore::store(&email, &credentials.password)?;
            }
            config.last_email = Some(email);
            config.last_role = Some(role);
            config.save()?;

            info!(user_id = %session.user.id, "Login complete");
            println!(
                "Signed in as {} ({})",
                session.user.display_name(),
                session.user.role
            );
            Ok(())
        }
        Err(e) => {
            debug!(error = %e, "Login failed");
            anyhow::bail!("{}", e.user_message())
        }
    }
}

fn status(manager: &SessionManager) {
    let Some(session) = manager.current() else {
        println!("Not signed in");
        return;
    };

    println!("User:    {} <{}>", session.user.display_name(), session.user.email);
    println!("Role:    {}", session.user.role);
    match manager.state() {
        Some(GuardState::Valid) => println!(
            "Session: valid, expires in {} min",
            session.minutes_until_expiry()
        ),
        Some(GuardState::NeedsRefresh) => println!("Session: expired, refreshes on next request"),
        Some(GuardState::Terminal) => println!("Session: ended, sign in again"),
        None => println!("Session: cleared by another client"),
    }
}

async fn refresh(manager: &SessionManager) -> Result<()> {
    match manager.refresh_now().await {
        Ok(session) => {
            println!(
                "Access token refreshed, expires in {} min",
                session.minutes_until_expiry()
            );
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", e.user_message()),
    }
}

async fn get(manager: &SessionManager, path: &str) -> Result<()> {
    let value: serde_json::Value = manager.get_json(path).await.map_err(|e| match e {
        hrdesk_core::auth::RequestError::Auth(auth) => anyhow::anyhow!(auth.user_message()),
        other => anyhow::Error::new(other),
    })?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn logout(manager: &SessionManager, config: &Config, forget: bool) -> Result<()> {
    let email = manager
        .current()
        .map(|s| s.user.email)
        .or_else(|| config.last_email.clone());

    let outcome = manager.sign_out(SignOutReason::UserRequested);

    if forget {
        if let Some(ref email) = email {
            CredentialStore::delete(email)?;
        }
    }

    if let Some(notice) = outcome.notice {
        println!("{}", notice);
    }
    println!("Signed out. Sign in again with `hrdesk login` ({})", outcome.redirect_to);
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::Write;

    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}
