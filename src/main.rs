use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::auth::oauth::GoogleOAuthClient;
use tollgate::banner::{print_banner, status_lines};
use tollgate::consts::{DEFAULT_CREDENTIALS_PATH, now_ms};
use tollgate::spinner::Spinner;
use tollgate::{AuthError, Authorizer};

#[derive(Parser)]
#[command(
    name = "tollgate",
    version,
    about = "Keeps an OAuth2 grant for one Google app alive."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Credential file (key=value lines)
    #[arg(short, long, env = "TOLLGATE_CREDENTIALS", default_value = DEFAULT_CREDENTIALS_PATH, global = true)]
    credentials: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Reuse a valid token or run the browser authorization flow (default)
    Authorize {
        /// Give up waiting for the browser redirect after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the authorization URL without trying to open a browser
        #[arg(long, default_value_t = false)]
        no_browser: bool,
    },
    /// Show what the credential file currently holds
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Authorize {
        timeout: None,
        no_browser: false,
    }) {
        Command::Authorize {
            timeout,
            no_browser,
        } => handle_authorize(cli.credentials, timeout, no_browser).await,
        Command::Status => handle_status(cli.credentials),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollgate=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn handle_authorize(
    credentials: PathBuf,
    timeout: Option<u64>,
    no_browser: bool,
) -> anyhow::Result<()> {
    print_banner(&credentials);

    let mut authorizer = Authorizer::load(&credentials)
        .with_context(|| format!("failed to load {}", credentials.display()))?
        .with_url_handler(move |url| {
            println!("Authorize this app by visiting this url:\n");
            println!("  {url}\n");
            if !no_browser {
                // Try to open browser, silently ignore failures (e.g. headless/SSH)
                let _ = open::that(url);
            }
        });
    let record = authorizer.record();
    let client = Arc::new(GoogleOAuthClient::from_record(&record));
    let spinner = Spinner::follow(
        authorizer.watch_state(),
        record.redirect_uri().unwrap_or_default().to_string(),
    );

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn(cancel_on_signal(cancel.clone(), timeout));

    let result = authorizer.authorize(client, cancel).await;
    watchdog.abort();
    spinner.finish().await;

    match result {
        Ok(()) => {
            println!("✓ Authorized.");
            print!("{}", status_lines(&authorizer.record(), now_ms()));
            Ok(())
        }
        Err(AuthError::Cancelled) => anyhow::bail!("authorization cancelled before the browser returned"),
        Err(e) => Err(e).context("authorization failed"),
    }
}

/// Cancel on Ctrl+C, or once `timeout` seconds have passed.
async fn cancel_on_signal(cancel: CancellationToken, timeout: Option<u64>) {
    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = deadline => tracing::warn!("timed out waiting for authorization"),
    }
    cancel.cancel();
}

fn handle_status(credentials: PathBuf) -> anyhow::Result<()> {
    let authorizer = Authorizer::load(&credentials)
        .with_context(|| format!("failed to load {}", credentials.display()))?;
    println!("  file      {}", authorizer.store().path().display());
    print!("{}", status_lines(&authorizer.record(), now_ms()));
    Ok(())
}
