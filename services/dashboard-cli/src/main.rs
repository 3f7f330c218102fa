//! Clinic dashboard command-line client
//!
//! Operator front end for the dashboard API:
//! 1. Loads configuration and restores any persisted session
//! 2. Runs one command through the authenticated API client
//! 3. Prints the result as JSON on stdout, logs on stderr
//!
//! Remembered sessions live in the configured session file; the rest are
//! kept in memory and end with the process.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use api_client::{ApiClient, ParsedBody, RequestOptions, log_redirect};
use common::Secret;
use session_store::{FileBackend, MemoryBackend, SessionStore, StoragePolicy};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: dashboard-cli [--config PATH] <command>

commands:
  login <email> [--remember]   sign in (password from DASHBOARD_PASSWORD)
  logout                       sign out and clear the stored session
  whoami                       show the current session
  get <path>                   GET an API endpoint
  post <path> <json>           POST a JSON body to an API endpoint
  refresh                      exchange the refresh token now";

#[derive(Debug, PartialEq)]
enum Command {
    Login { email: String, remember: bool },
    Logout,
    Whoami,
    Get { path: String },
    Post { path: String, body: serde_json::Value },
    Refresh,
}

/// Split argv into the optional `--config` value and the command.
fn parse_args(args: &[String]) -> Result<(Option<&str>, Command)> {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config requires a path")?;
            config_path = Some(path.as_str());
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["login", email] => Command::Login {
            email: (*email).to_string(),
            remember: false,
        },
        ["login", email, "--remember"] | ["login", "--remember", email] => Command::Login {
            email: (*email).to_string(),
            remember: true,
        },
        ["logout"] => Command::Logout,
        ["whoami"] => Command::Whoami,
        ["get", path] => Command::Get {
            path: (*path).to_string(),
        },
        ["post", path, body] => Command::Post {
            path: (*path).to_string(),
            body: serde_json::from_str(body).context("post body must be valid JSON")?,
        },
        ["refresh"] => Command::Refresh,
        _ => bail!("{USAGE}"),
    };
    Ok((config_path, command))
}

fn build_session(config: &Config) -> Result<Arc<SessionStore>> {
    let durable = FileBackend::open(config.storage.session_file.clone()).with_context(|| {
        format!(
            "failed to open session file {}",
            config.storage.session_file.display()
        )
    })?;
    let policy = StoragePolicy::new(Arc::new(durable), Arc::new(MemoryBackend::new()));
    Ok(Arc::new(SessionStore::restore(
        policy,
        config.storage.session_key.clone(),
    )))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_body(body: ParsedBody) -> Result<()> {
    match body {
        ParsedBody::Json(value) => print_json(&value),
        ParsedBody::Text(text) => {
            println!("{text}");
            Ok(())
        }
    }
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login { email, remember } => {
            let password = std::env::var("DASHBOARD_PASSWORD")
                .ok()
                .and_then(|p| Secret::<String>::non_empty(p))
                .context("DASHBOARD_PASSWORD must be set to log in")?;
            let session = client
                .login(&email, &password, remember)
                .await
                .context("login failed")?;
            info!(remember, "logged in");
            print_json(&serde_json::json!({
                "user": session.user,
                "profileCompleted": session.profile_completed,
                "rememberMe": session.remember_me,
            }))
        }
        Command::Logout => {
            client.logout().await;
            info!("logged out");
            Ok(())
        }
        Command::Whoami => {
            let session = client.session().snapshot();
            print_json(&serde_json::json!({
                "isAuthenticated": session.is_authenticated(),
                "user": session.user,
                "profileCompleted": session.profile_completed,
                "rememberMe": session.remember_me,
            }))
        }
        Command::Get { path } => {
            let body = client
                .dispatch(&path, RequestOptions::get())
                .await
                .with_context(|| format!("GET {path} failed"))?;
            print_body(body)
        }
        Command::Post { path, body } => {
            let body = client
                .dispatch(&path, RequestOptions::post(body))
                .await
                .with_context(|| format!("POST {path} failed"))?;
            print_body(body)
        }
        Command::Refresh => match client.refresh().await {
            Some(_) => {
                info!("access token refreshed");
                Ok(())
            }
            None => bail!("token refresh failed; log in again"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output, so logs go to stderr
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (cli_config_path, command) = parse_args(&args)?;

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = config.api.base_url().unwrap_or("<unset>"),
        session_file = %config.storage.session_file.display(),
        "configuration loaded"
    );

    let session = build_session(&config)?;
    let client = ApiClient::new(config.api, session).with_redirect(|route: &str| {
        log_redirect(route);
        eprintln!("session expired; run `dashboard-cli login` to sign in again");
    });

    run(&client, command).await
}
