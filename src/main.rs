use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use x_timeline_archiver::accounts::{self, Account};
use x_timeline_archiver::browser::BrowserSession;
use x_timeline_archiver::config::Config;
use x_timeline_archiver::crawl::handle_account;
use x_timeline_archiver::media::MediaFetcher;
use x_timeline_archiver::session::{self, SessionGuard, StateCipher};
use x_timeline_archiver::store::PostRepository;
use x_timeline_archiver::timeline::TimelineClient;
use x_timeline_archiver::translate::{PassOutcome, Translator};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    init_tracing()?;

    info!("Starting x-timeline-archiver");

    // Load and validate configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| {
            format!("Failed to create data directory: {}", config.data_dir.display())
        })?;

    let mut accounts = accounts::load_accounts(&config.accounts_path)
        .await
        .context("Failed to load account list")?;
    info!(accounts = accounts.len(), "Account list loaded");

    // Decryption failure aborts here, before any network activity.
    let cipher =
        StateCipher::from_base64(&config.encrypt_key).context("Invalid ENCRYPT_KEY")?;
    let guard = SessionGuard::unlock(&config.state_path, cipher)
        .context("Failed to unlock session state")?;

    // Seal on success and on failure alike; the session must never stay
    // decrypted on disk after the process exits.
    let crawl_result = crawl_all(&config, &mut accounts).await;
    let seal_result = guard.seal();
    crawl_result?;
    seal_result.context("Failed to seal session state")?;

    accounts::save_accounts(&config.accounts_path, &accounts)
        .await
        .context("Failed to write back account list")?;

    if let Some(translator) = Translator::from_config(&config)? {
        match translator.run(&config.data_dir, &accounts).await? {
            PassOutcome::Completed => info!("Translation pass complete"),
            PassOutcome::ProviderOverloaded => {
                warn!("Translation pass stopped early on provider overload");
            }
        }
    }

    info!("Run complete");
    Ok(())
}

/// Crawl every configured account inside one browser session.
///
/// On success the browser exports its cookie jar to the plaintext state
/// file before closing; on failure the browser is dropped and the pre-run
/// state stays authoritative.
async fn crawl_all(config: &Config, accounts: &mut [Account]) -> Result<()> {
    let state =
        session::load_or_bootstrap(&config.state_path, config.initial_cookies.as_deref()).await?;
    let browser = BrowserSession::launch(config, state).await?;

    let repo = PostRepository::new(config.data_dir.clone());
    let media = MediaFetcher::new(config.data_dir.clone(), config.http_timeout)?;
    let mut client = TimelineClient::new(&browser, config)?;

    for account in accounts.iter_mut() {
        let username = account.x.screen_name.clone();
        info!(username, "Archiving account");
        handle_account(&mut client, &repo, &media, account, config.max_pages)
            .await
            .with_context(|| format!("Failed to archive account {username}"))?;
    }

    browser
        .close()
        .await
        .context("Failed to close browser session")?;
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,x_timeline_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        // Pretty-printed logging for development
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
